//! Command line parsing, parameter validation and request building.
//!
//! A command line is `name [param[=value]]...`. Values may be quoted with
//! single or double quotes, or be `$var` / `$$var` references resolved at
//! validation time.

use crate::document::Node;
use crate::error::{NcliError, Result};
use crate::schema::{ObjectDescriptor, ParamDescriptor, ParamType, SchemaModel};
use crate::vars::{VarRef, VarValue};

/// A parameter as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParam {
    pub name: String,
    pub value: Option<String>,
    /// The value was quoted, so it is never treated as a variable reference
    pub quoted: bool,
}

/// A tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub params: Vec<RawParam>,
}

impl Invocation {
    /// Splits a command line into a command name and raw parameters.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let mut iter = tokens.into_iter();
        let (name, _) = iter
            .next()
            .ok_or_else(|| NcliError::execution("empty command"))?;
        let mut params = Vec::new();
        for (token, quoted_value) in iter {
            let token = token.trim_start_matches('-');
            match token.split_once('=') {
                Some((n, v)) => params.push(RawParam {
                    name: n.to_string(),
                    value: Some(v.to_string()),
                    quoted: quoted_value,
                }),
                None => params.push(RawParam {
                    name: token.to_string(),
                    value: None,
                    quoted: false,
                }),
            }
        }
        Ok(Self { name, params })
    }

    pub fn param(&self, name: &str) -> Option<&RawParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Splits on whitespace outside quotes. Returns each token with a flag that
/// tells whether any part of it was quoted.
fn tokenize(line: &str) -> Result<Vec<(String, bool)>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                let close = c;
                in_token = true;
                quoted = true;
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == close {
                        closed = true;
                        break;
                    }
                    cur.push(q);
                }
                if !closed {
                    return Err(NcliError::execution(format!(
                        "unterminated string in '{line}'"
                    )));
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push((std::mem::take(&mut cur), quoted));
                    quoted = false;
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                cur.push(c);
            }
        }
    }
    if in_token {
        tokens.push((cur, quoted));
    }
    Ok(tokens)
}

/// Value of a validated parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundValue {
    Flag,
    Text(String),
    Tree(Node),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    pub descriptor: ParamDescriptor,
    pub value: BoundValue,
    /// Filled in from the schema default rather than by the user
    pub set_by_default: bool,
}

impl BoundParam {
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            BoundValue::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// A command checked against its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub descriptor: ObjectDescriptor,
    pub params: Vec<BoundParam>,
}

impl ValidatedCommand {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_local(&self) -> bool {
        self.descriptor.is_local()
    }

    pub fn param(&self, name: &str) -> Option<&BoundParam> {
        self.params.iter().find(|p| p.descriptor.name == name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(BoundParam::text)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    pub fn uint(&self, name: &str) -> Result<Option<u32>> {
        self.text(name)
            .map(|t| {
                t.parse::<u32>().map_err(|_| {
                    NcliError::execution(format!("parameter '{name}' must be a number, got '{t}'"))
                })
            })
            .transpose()
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.text(name).map(|t| t == "true")
    }

    /// Builds the request document for a remote operation.
    pub fn to_request(&self) -> Node {
        let mut rpc = Node::new(self.descriptor.name.clone());
        for param in &self.params {
            let name = param.descriptor.name.as_str();
            let node = match (&param.descriptor.ty, &param.value) {
                (_, BoundValue::Flag) => Node::new(name),
                (ParamType::Datastore, BoundValue::Text(ds)) => {
                    Node::new(name).with_child(Node::new(ds.clone()))
                }
                (_, BoundValue::Text(t)) => Node::leaf(name, t.clone()),
                (_, BoundValue::Tree(tree)) => wrap_tree(name, tree),
            };
            rpc.push(node);
        }
        rpc
    }
}

/// Places a variable's tree under a parameter node. A `data`/`config`
/// wrapper is unwrapped so its children become the parameter content.
fn wrap_tree(param: &str, tree: &Node) -> Node {
    if tree.name == param {
        return tree.clone();
    }
    let mut node = Node::new(param);
    if tree.name == "data" || tree.name == "config" {
        node.children = tree.children.clone();
        node.value = tree.value.clone();
    } else {
        node.push(tree.clone());
    }
    node
}

/// Parses and validates a command line.
///
/// `resolve` looks up `$var`/`$$var` references used as parameter values.
pub fn validate(
    schema: &dyn SchemaModel,
    line: &str,
    resolve: &dyn Fn(&VarRef) -> Option<VarValue>,
) -> Result<ValidatedCommand> {
    let invocation = Invocation::parse(line)?;
    let descriptor = schema
        .find_object(None, &invocation.name)
        .ok_or_else(|| NcliError::not_found("command", invocation.name.clone()))?
        .clone();

    let mut params: Vec<BoundParam> = Vec::new();
    for raw in &invocation.params {
        let pdesc = descriptor.find_param(&raw.name).ok_or_else(|| {
            NcliError::execution(format!(
                "unknown parameter '{}' for '{}'",
                raw.name, descriptor.name
            ))
        })?;
        if params.iter().any(|p| p.descriptor.name == raw.name) {
            return Err(NcliError::execution(format!(
                "parameter '{}' given more than once",
                raw.name
            )));
        }
        let value = bind_value(pdesc, raw, resolve)?;
        params.push(BoundParam {
            descriptor: pdesc.clone(),
            value,
            set_by_default: false,
        });
    }

    for pdesc in &descriptor.params {
        if params.iter().any(|p| p.descriptor.name == pdesc.name) {
            continue;
        }
        if let Some(default) = &pdesc.default {
            params.push(BoundParam {
                descriptor: pdesc.clone(),
                value: BoundValue::Text(default.clone()),
                set_by_default: true,
            });
        } else if pdesc.mandatory {
            return Err(NcliError::execution(format!(
                "missing mandatory parameter '{}' for '{}'",
                pdesc.name, descriptor.name
            )));
        }
    }

    Ok(ValidatedCommand { descriptor, params })
}

fn bind_value(
    pdesc: &ParamDescriptor,
    raw: &RawParam,
    resolve: &dyn Fn(&VarRef) -> Option<VarValue>,
) -> Result<BoundValue> {
    let Some(text) = &raw.value else {
        return match pdesc.ty {
            ParamType::Empty => Ok(BoundValue::Flag),
            // a bare boolean means true
            ParamType::Boolean => Ok(BoundValue::Text("true".to_string())),
            _ => Err(NcliError::execution(format!(
                "parameter '{}' needs a value",
                pdesc.name
            ))),
        };
    };

    let value = match VarRef::parse(text).filter(|_| !raw.quoted) {
        Some(var) => match resolve(&var) {
            Some(VarValue::Text(t)) => BoundValue::Text(t),
            Some(VarValue::Tree(tree)) => BoundValue::Tree(tree),
            None => return Err(NcliError::not_found("variable", var.name.clone())),
        },
        None => BoundValue::Text(text.clone()),
    };

    if let BoundValue::Text(t) = &value {
        check_simple(pdesc, t)?;
    }
    Ok(value)
}

fn check_simple(pdesc: &ParamDescriptor, value: &str) -> Result<()> {
    let bad = |what: &str| {
        Err(NcliError::execution(format!(
            "invalid value '{value}' for parameter '{}': {what}",
            pdesc.name
        )))
    };
    match &pdesc.ty {
        ParamType::Uint32 if value.parse::<u32>().is_err() => bad("expected a number"),
        ParamType::Boolean if value != "true" && value != "false" => bad("expected true or false"),
        ParamType::Enumeration(allowed) if !allowed.iter().any(|a| a == value) => {
            bad(&format!("expected one of {}", allowed.join(", ")))
        }
        ParamType::Empty => bad("flag takes no value"),
        ParamType::AnyData => bad("needs a variable holding a tree"),
        _ => Ok(()),
    }
}
