//! Assignment execution: variable scopes, deferred results and file output.

use super::ServerContext;
use crate::assign::{AssignStatement, Lhs, ResultTarget, Rhs, ValueExpr, check_filespec};
use crate::document::{DisplayMode, Node};
use crate::error::{NcliError, Result};
use crate::session::SessionPrefs;
use crate::transport::{LineOrigin, MessageId};
use crate::vars::{VarRef, VarScope, VarValue};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

impl ServerContext {
    pub(super) fn execute_assignment(
        &mut self,
        stmt: AssignStatement,
        origin: LineOrigin,
    ) -> Result<Option<MessageId>> {
        let target = self.resolve_target(&stmt.lhs, matches!(stmt.rhs, Rhs::Empty))?;
        match stmt.rhs {
            Rhs::Empty => {
                self.clear_target(&target)?;
                Ok(None)
            }
            Rhs::Value(expr) => {
                let value = self.evaluate(&expr)?;
                self.assign_value(&target, value)?;
                Ok(None)
            }
            Rhs::Command(line) => self.execute_command(&line, origin, Some(target)),
        }
    }

    /// Works out where an assignment goes.
    fn resolve_target(&self, lhs: &Lhs, removing: bool) -> Result<ResultTarget> {
        match lhs {
            Lhs::Var(var) => {
                if self.vars.is_system(&var.name) {
                    return Err(NcliError::assignment(if removing {
                        "cannot remove system variables"
                    } else {
                        "system variables are read-only"
                    }));
                }
                let scope = if !var.global {
                    VarScope::Local
                } else if SessionPrefs::is_config_var(&var.name) {
                    VarScope::Config
                } else if self.current_session().prefs.use_session_vars {
                    VarScope::Session
                } else {
                    VarScope::Global
                };
                Ok(ResultTarget::Var {
                    name: var.name.clone(),
                    scope,
                })
            }
            Lhs::File(spec) => Ok(ResultTarget::File(check_filespec(spec, None, self.home().as_deref())?)),
            Lhs::FileFromVar(var) => {
                let spec = self.file_var(var)?;
                Ok(ResultTarget::File(check_filespec(
                    &spec,
                    Some(&var.name),
                    self.home().as_deref(),
                )?))
            }
        }
    }

    fn home(&self) -> Option<String> {
        self.vars
            .system("HOME")
            .and_then(|v| v.as_text().map(str::to_string))
    }

    fn file_var(&self, var: &VarRef) -> Result<String> {
        match self.lookup_var(var) {
            Some(VarValue::Text(text)) => Ok(text),
            Some(VarValue::Tree(_)) => Err(NcliError::assignment(format!(
                "file assignment variable '{}' is not a simple string",
                var.name
            ))),
            None => Err(NcliError::not_found("variable", var.name.clone())),
        }
    }

    /// Evaluates an immediate right-hand side.
    fn evaluate(&self, expr: &ValueExpr) -> Result<VarValue> {
        match expr {
            ValueExpr::Quoted(text) | ValueExpr::Number(text) => Ok(VarValue::Text(text.clone())),
            ValueExpr::Var(var) => self
                .lookup_var(var)
                .ok_or_else(|| NcliError::not_found("variable", var.name.clone())),
            ValueExpr::InlineXml(xml) => Ok(VarValue::Tree(Node::from_xml(xml)?)),
            ValueExpr::FileRef(spec) => {
                let path = check_filespec(spec, None, self.home().as_deref())?;
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    NcliError::io(format!("cannot read '{}': {e}", path.display()))
                })?;
                match DisplayMode::from_path(&path) {
                    DisplayMode::Xml => Ok(VarValue::Tree(Node::from_xml(&content)?)),
                    _ => Ok(VarValue::Text(content.trim_end().to_string())),
                }
            }
        }
    }

    /// Stores a value in a variable or writes it to a file.
    pub(super) fn assign_value(&mut self, target: &ResultTarget, value: VarValue) -> Result<()> {
        match target {
            ResultTarget::Var { name, scope } => {
                match scope {
                    VarScope::System => {
                        return Err(NcliError::assignment("system variables are read-only"));
                    }
                    VarScope::Config => {
                        let Some(text) = value.as_text() else {
                            return Err(NcliError::assignment(format!(
                                "config variable '{name}' takes a simple value"
                            )));
                        };
                        let id = self.current;
                        self.session_mut(id)?.prefs.set(name, text)?;
                        self.defaults.set(name, text)?;
                        if name == "indent" {
                            let indent = self.defaults.indent;
                            self.test_engine.set_indent(indent);
                            self.recorder.set_indent(indent);
                        }
                    }
                    VarScope::Global => self.vars.set_global(name, value),
                    VarScope::Session => {
                        let id = self.current;
                        self.session_mut(id)?.session_vars.insert(name.clone(), value);
                    }
                    VarScope::Local => {
                        self.runstack.locals_mut().insert(name.clone(), value);
                    }
                }
                debug!("set {scope} variable '{name}'");
                Ok(())
            }
            ResultTarget::File(path) => self.write_result_file(path, &value),
        }
    }

    /// Empty right-hand side: unset the variable or delete the file.
    fn clear_target(&mut self, target: &ResultTarget) -> Result<()> {
        match target {
            ResultTarget::Var { name, scope } => match scope {
                VarScope::System => Err(NcliError::assignment("cannot remove system variables")),
                VarScope::Config => Err(NcliError::assignment(format!(
                    "cannot remove config variable '{name}'"
                ))),
                VarScope::Global => self.vars.unset_global(name),
                VarScope::Session => {
                    let id = self.current;
                    self.session_mut(id)?
                        .session_vars
                        .remove(name)
                        .map(|_| ())
                        .ok_or_else(|| NcliError::not_found("variable", name.clone()))
                }
                VarScope::Local => self
                    .runstack
                    .locals_mut()
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| NcliError::not_found("variable", name.clone())),
            },
            ResultTarget::File(path) => delete_file(path),
        }
    }

    fn write_result_file(&self, path: &Path, value: &VarValue) -> Result<()> {
        let prefs = &self.current_session().prefs;
        if path.exists() && !prefs.overwrite_filevars {
            return Err(NcliError::assignment(format!(
                "file '{}' already exists and overwrite-filevars is off",
                path.display()
            )));
        }
        let mut content = match value {
            VarValue::Text(text) => text.clone(),
            VarValue::Tree(node) => node.render(DisplayMode::from_path(path), prefs.indent)?,
        };
        if !content.ends_with('\n') {
            content.push('\n');
        }
        std::fs::write(path, content)
            .map_err(|e| NcliError::io(format!("cannot write '{}': {e}", path.display())))?;
        info!("Wrote result to file '{}'", path.display());
        Ok(())
    }

    /// Delivers a reply payload to the pending target.
    pub(super) fn finish_result_assign(&mut self, target: ResultTarget, payload: Node) -> Result<()> {
        let value = match payload.value {
            Some(text) if payload.children.is_empty() => VarValue::Text(text),
            _ => VarValue::Tree(payload),
        };
        self.assign_value(&target, value)
    }
}

fn delete_file(path: &PathBuf) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|_| {
        NcliError::assignment(format!("file '{}' does not exist", path.display()))
    })?;
    if !meta.is_file() {
        return Err(NcliError::assignment(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    std::fs::remove_file(path)
        .map_err(|e| NcliError::io(format!("cannot delete '{}': {e}", path.display())))?;
    info!("Deleted file '{}'", path.display());
    Ok(())
}
