//! Assignment statement syntax.
//!
//! ```text
//! $foo = $bar                  copy a variable
//! $$foo = "quoted literal"     literal into a global
//! $foo = 42                    number literal
//! $foo = [<top><a>1</a></top>] inline XML
//! $foo = @data.xml             load a file
//! $foo = get-config source=running
//! @out.xml = get               file target
//! @$fname = $foo               file named by a variable
//! $foo =                       unset
//! ```
//!
//! This module only parses. Scope resolution and execution live in the
//! server context, which owns the variables and the pending result slot.

use crate::document::needs_quotes;
use crate::error::{NcliError, Result};
use crate::vars::{VarRef, VarScope};
use std::path::PathBuf;

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lhs {
    Var(VarRef),
    /// `@path`
    File(String),
    /// `@$var`, the variable holds the path
    FileFromVar(VarRef),
}

/// Right-hand side value evaluated without contacting the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    Quoted(String),
    Var(VarRef),
    Number(String),
    /// `[<xml/>]`
    InlineXml(String),
    /// `@file`
    FileRef(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rhs {
    /// Nothing after `=`: unset the variable or delete the file
    Empty,
    Value(ValueExpr),
    /// Rest of the line is a command whose reply is assigned later
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignStatement {
    pub lhs: Lhs,
    pub rhs: Rhs,
}

/// Where a deferred command result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultTarget {
    Var { name: String, scope: VarScope },
    File(PathBuf),
}

impl std::fmt::Display for ResultTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultTarget::Var { name, scope } => write!(f, "{scope} variable '{name}'"),
            ResultTarget::File(path) => write!(f, "file '{}'", path.display()),
        }
    }
}

/// Parses an assignment statement. Returns `Ok(None)` when the line is not
/// an assignment and should run as a plain command.
pub fn parse_assignment(line: &str) -> Result<Option<AssignStatement>> {
    let s = line.trim_start();

    let (file, s) = match s.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let (lhs, rest) = if s.starts_with('$') {
        let (var, rest) = VarRef::parse_prefix(s)
            .ok_or_else(|| NcliError::assignment(format!("invalid variable reference in '{line}'")))?;
        let lhs = if file {
            Lhs::FileFromVar(var)
        } else {
            Lhs::Var(var)
        };
        (lhs, rest)
    } else if file {
        let end = s
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(s.len());
        (Lhs::File(s[..end].to_string()), &s[end..])
    } else {
        return Ok(None);
    };

    let rest = rest.trim_start();
    if rest.is_empty() {
        return Err(NcliError::assignment("truncated assignment statement"));
    }
    let Some(rhs_text) = rest.strip_prefix('=') else {
        return Err(NcliError::assignment("equals sign '=' expected"));
    };
    let rhs_text = rhs_text.trim();

    let rhs = if rhs_text.is_empty() {
        Rhs::Empty
    } else {
        match parse_value(rhs_text)? {
            Some(value) => Rhs::Value(value),
            None => Rhs::Command(rhs_text.to_string()),
        }
    };
    Ok(Some(AssignStatement { lhs, rhs }))
}

/// Recognizes the immediate value forms. `None` means the text is a command.
fn parse_value(text: &str) -> Result<Option<ValueExpr>> {
    let first = text.chars().next().unwrap_or(' ');
    match first {
        '"' | '\'' => {
            let inner = &text[1..];
            let end = inner
                .find(first)
                .ok_or_else(|| NcliError::assignment(format!("unterminated string: {text}")))?;
            if !inner[end + 1..].trim().is_empty() {
                return Err(NcliError::assignment(format!(
                    "unexpected text after string: {}",
                    inner[end + 1..].trim()
                )));
            }
            Ok(Some(ValueExpr::Quoted(inner[..end].to_string())))
        }
        '$' => VarRef::parse(text)
            .map(|v| Some(ValueExpr::Var(v)))
            .ok_or_else(|| NcliError::assignment(format!("invalid variable reference: {text}"))),
        '[' => {
            let inner = text
                .strip_suffix(']')
                .ok_or_else(|| NcliError::assignment("inline XML must end with ']'"))?;
            Ok(Some(ValueExpr::InlineXml(inner[1..].trim().to_string())))
        }
        '@' => Ok(Some(ValueExpr::FileRef(text[1..].trim().to_string()))),
        _ if is_number(text) => Ok(Some(ValueExpr::Number(text.to_string()))),
        _ => Ok(None),
    }
}

fn is_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Validates a file assignment target. Only plain path characters are
/// accepted; a leading `~/` is expanded with `home`.
pub fn check_filespec(filespec: &str, var_name: Option<&str>, home: Option<&str>) -> Result<PathBuf> {
    let what = match var_name {
        Some(v) => format!("file assignment variable '{v}'"),
        None => "file assignment filespec".to_string(),
    };
    if filespec.is_empty() {
        return Err(NcliError::assignment(format!("{what} is empty string")));
    }
    if needs_quotes(filespec) {
        return Err(NcliError::assignment(format!(
            "{what} contains whitespace ({filespec})"
        )));
    }
    let expanded = match (filespec.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.trim_end_matches('/')),
        _ => filespec.to_string(),
    };
    let valid = expanded
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
    if !valid {
        return Err(NcliError::assignment(format!(
            "{what} contains invalid filespec ({filespec})"
        )));
    }
    Ok(PathBuf::from(expanded))
}
