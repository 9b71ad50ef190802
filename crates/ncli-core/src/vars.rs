//! User variables.
//!
//! `$name` refers to the current script frame's local scope, `$$name` to the
//! process-wide scopes. System variables are read-only and seeded from the
//! environment; config variables are views onto session preferences and are
//! handled by the server context.

use crate::document::Node;
use crate::error::{NcliError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static VAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\$\$?)([A-Za-z_][A-Za-z0-9_.\-]*)$").expect("variable reference pattern")
});

/// Storage class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum VarScope {
    /// Read-only environment values
    System,
    /// Live preference values
    Config,
    Global,
    /// Per-session storage, used when `use_session_vars` is on
    Session,
    /// Current script frame
    Local,
}

/// A variable's value: a simple string or a document tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarValue {
    Text(String),
    Tree(Node),
}

impl VarValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            VarValue::Text(t) => Some(t),
            VarValue::Tree(_) => None,
        }
    }

    /// Renders the value for display.
    pub fn display(&self, indent: usize) -> String {
        match self {
            VarValue::Text(t) => t.clone(),
            VarValue::Tree(node) => node.to_text(indent),
        }
    }
}

/// Variable reference as written: `$name` or `$$name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub name: String,
    /// `$$` form
    pub global: bool,
}

impl VarRef {
    /// Parses a complete `$name` / `$$name` token.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VAR_REF.captures(text)?;
        Some(Self {
            global: &caps[1] == "$$",
            name: caps[2].to_string(),
        })
    }

    /// Parses the variable name at the start of `text` (which must begin with
    /// `$`) and returns it with the unparsed remainder.
    pub fn parse_prefix(text: &str) -> Option<(Self, &str)> {
        let (global, rest) = if let Some(r) = text.strip_prefix("$$") {
            (true, r)
        } else {
            (false, text.strip_prefix('$')?)
        };
        let end = rest
            .char_indices()
            .find(|(i, c)| {
                !(c.is_ascii_alphanumeric()
                    || *c == '_'
                    || (*i > 0 && (*c == '-' || *c == '.')))
            })
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if end == 0 || rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        Some((
            Self {
                name: rest[..end].to_string(),
                global,
            },
            &rest[end..],
        ))
    }
}

/// Local variables of one script frame.
pub type Locals = BTreeMap<String, VarValue>;

/// Process-scoped variables: system and global.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    system: BTreeMap<String, String>,
    globals: BTreeMap<String, VarValue>,
}

impl VarStore {
    /// Creates a store with system variables taken from the environment.
    pub fn from_env() -> Self {
        let mut store = Self::default();
        for key in ["HOME", "USER", "HOSTNAME", "PWD", "SHELL"] {
            if let Ok(value) = std::env::var(key) {
                store.system.insert(key.to_string(), value);
            }
        }
        store
    }

    pub fn set_system(&mut self, name: &str, value: &str) {
        self.system.insert(name.to_string(), value.to_string());
    }

    pub fn is_system(&self, name: &str) -> bool {
        self.system.contains_key(name)
    }

    pub fn system(&self, name: &str) -> Option<VarValue> {
        self.system.get(name).cloned().map(VarValue::Text)
    }

    pub fn global(&self, name: &str) -> Option<&VarValue> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: VarValue) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn unset_global(&mut self, name: &str) -> Result<()> {
        self.globals
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NcliError::not_found("variable", name))
    }

    pub fn globals(&self) -> impl Iterator<Item = (&String, &VarValue)> {
        self.globals.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_ref_parse() {
        assert_eq!(
            VarRef::parse("$x"),
            Some(VarRef { name: "x".into(), global: false })
        );
        assert_eq!(
            VarRef::parse("$$echo-replies"),
            Some(VarRef { name: "echo-replies".into(), global: true })
        );
        assert!(VarRef::parse("x").is_none());
        assert!(VarRef::parse("$1abc").is_none());
        assert!(VarRef::parse("$x y").is_none());
    }

    #[test]
    fn test_var_ref_prefix() {
        let (var, rest) = VarRef::parse_prefix("$$cfg = get-config").unwrap();
        assert!(var.global);
        assert_eq!(var.name, "cfg");
        assert_eq!(rest, " = get-config");
        assert!(VarRef::parse_prefix("$ = 1").is_none());
    }

    #[test]
    fn test_globals() {
        let mut store = VarStore::default();
        store.set_global("a", VarValue::Text("1".into()));
        assert_eq!(store.global("a").and_then(VarValue::as_text), Some("1"));
        store.unset_global("a").unwrap();
        assert!(store.unset_global("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_system_vars_are_marked() {
        let mut store = VarStore::default();
        store.set_system("HOME", "/home/op");
        assert!(store.is_system("HOME"));
        assert_eq!(store.system("HOME"), Some(VarValue::Text("/home/op".into())));
    }
}
