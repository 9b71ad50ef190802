//! Automatic sequences: post-connect steps, shadow configuration, the
//! save chain, apply-config and auto-test.

use super::{ClientEvent, ServerContext};
use crate::command::{BoundValue, ValidatedCommand};
use crate::document::Node;
use crate::error::{NcliError, Result};
use crate::rpc::{Reply, RequestOrigin};
use crate::session::{AutotestState, AutotestStep, CommandMode};
use crate::transport::{ModuleRef, SessionId};
use crate::vars::{VarRef, VarValue};
use tracing::{debug, error, info, warn};

/// Whether `do_save` put a request on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SaveStart {
    Sent,
    /// Nothing to send for this server
    Skipped,
}

fn datastore_node(wrapper: &str, ds: &str) -> Node {
    Node::new(wrapper).with_child(Node::new(ds))
}

fn get_schema_request(module: &ModuleRef) -> Node {
    let mut rpc = Node::new("get-schema").with_child(Node::leaf("identifier", module.name.clone()));
    if let Some(rev) = &module.revision {
        rpc.push(Node::leaf("version", rev.clone()));
    }
    rpc.with_child(Node::leaf("format", "yang"))
}

fn edit_config_request(target: &str, config: Node) -> Node {
    Node::new("edit-config")
        .with_child(datastore_node("target", target))
        .with_child(Node::leaf("default-operation", "merge"))
        .with_child(config)
}

/// Nests `value` under the path segments inside a `<config>` element.
fn config_for_path(path: &[String], value: &str) -> Node {
    let mut node: Option<Node> = None;
    for (i, segment) in path.iter().enumerate().rev() {
        node = Some(match node {
            None if i == path.len() - 1 => Node::leaf(segment.clone(), value),
            None => Node::new(segment.clone()),
            Some(child) => Node::new(segment.clone()).with_child(child),
        });
    }
    let mut config = Node::new("config");
    if let Some(node) = node {
        config.push(node);
    }
    config
}

/// `<config>` element holding a variable's tree.
fn config_from_tree(tree: &Node) -> Node {
    if tree.name == "config" {
        return tree.clone();
    }
    let mut config = Node::new("config");
    if tree.name == "data" {
        config.children = tree.children.clone();
    } else {
        config.push(tree.clone());
    }
    config
}

impl ServerContext {
    /// One step of the post-connect sequence. Sends at most one request.
    pub(super) fn post_connect(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        if !session.post_connect.reported {
            session.post_connect.reported = true;
            let caps = &session.capabilities;
            let mut text = format!(
                "Session '{}' connected: {} capabilities, {} modules",
                session.name,
                caps.uris.len(),
                caps.modules.len()
            );
            for uri in &caps.uris {
                text.push_str("\n  ");
                text.push_str(uri);
            }
            self.events.push(ClientEvent::Info(text));
        }

        if !session.post_connect.autoload_done {
            session.post_connect.autoload_done = true;
            if session.prefs.autoload {
                let missing: Vec<ModuleRef> = session
                    .capabilities
                    .modules
                    .iter()
                    .filter(|m| !self.schema.has_module(&m.name, m.revision.as_deref()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    info!(session = %session.name, "autoload: retrieving {} modules", missing.len());
                    session.autoload.queue = missing.into();
                    self.set_mode(id, CommandMode::AutoLoad);
                    self.send_next_schema(id);
                    return;
                }
            }
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.post_connect.autoconfig_done {
            session.post_connect.autoconfig_done = true;
            if session.prefs.autoconfig {
                if let Err(e) = self.start_update_config(id) {
                    error!("Error: autoconfig not started: {e}");
                }
                return;
            }
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.post_connect.autonotif_done {
            session.post_connect.autonotif_done = true;
            if session.prefs.autonotif && session.capabilities.has_notifications() {
                let request = Node::new("create-subscription");
                if let Err(e) =
                    self.send_request(id, &request, CommandMode::AutoNotif, RequestOrigin::Automatic)
                {
                    error!("Error: notification subscription not sent: {e}");
                }
                return;
            }
        }

        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if session.prefs.autoconfig && session.config_dirty {
            debug!(session = %session.name, "shadow config is stale, refreshing");
            if let Err(e) = self.start_update_config(id) {
                error!("Error: update-config failed: {e}");
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.config_dirty = false;
                }
            }
        }
    }

    /// Requests the next queued module, or ends autoload.
    fn send_next_schema(&mut self, id: SessionId) {
        loop {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            let Some(module) = session.autoload.queue.pop_front() else {
                session.autoload.current = None;
                info!(
                    session = %session.name,
                    retrieved = session.autoload.retrieved.len(),
                    failed = session.autoload.failed.len(),
                    "autoload finished"
                );
                self.set_mode(id, CommandMode::Normal);
                return;
            };
            session.autoload.current = Some(module.clone());
            let request = get_schema_request(&module);
            match self.send_request(id, &request, CommandMode::AutoLoad, RequestOrigin::Automatic) {
                Ok(_) => return,
                Err(e) => {
                    warn!("<get-schema> for '{}' not sent: {e}", module.name);
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.autoload.current = None;
                        session.autoload.failed.push(module);
                    }
                }
            }
        }
    }

    pub(super) fn on_autoload_reply(&mut self, id: SessionId, reply: &Reply) -> Result<()> {
        let session = self.session_mut(id)?;
        if let Some(module) = session.autoload.current.take() {
            if reply.is_error() {
                warn!(session = %session.name, "<get-schema> for '{}' failed: {}", module.name, reply.error_summary());
                session.autoload.failed.push(module);
            } else {
                let payload = reply.payload();
                let source = payload
                    .text()
                    .map(str::to_string)
                    .unwrap_or_else(|| payload.to_text(0));
                debug!(session = %session.name, "retrieved module '{}'", module.name);
                session.autoload.retrieved.insert(module.name, source);
            }
        }
        self.send_next_schema(id);
        Ok(())
    }

    /// Sends `<get-config>` for the running datastore to refresh the
    /// shadow configuration.
    pub(super) fn start_update_config(&mut self, id: SessionId) -> Result<()> {
        let request = Node::new("get-config").with_child(datastore_node("source", "running"));
        self.send_request(id, &request, CommandMode::AutoConfig, RequestOrigin::Automatic)?;
        Ok(())
    }

    pub(super) fn on_autoconfig_reply(&mut self, id: SessionId, reply: &Reply) {
        self.set_mode(id, CommandMode::Normal);
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        // a failed refresh is not retried until the next change notification
        session.config_dirty = false;
        if reply.is_error() {
            error!(session = %session.name, "autoconfig <get-config> failed: {}", reply.error_summary());
            return;
        }
        match reply.document.child("data") {
            Some(data) => {
                session.shadow_config = Some(data.clone());
                debug!(session = %session.name, "shadow config updated");
            }
            None => error!(session = %session.name, "No <data> element found in <get-config> reply"),
        }
    }

    pub(super) fn cmd_update_config(&mut self) -> Result<()> {
        let id = self.current;
        let session = self.session_mut(id)?;
        if !session.prefs.autoconfig {
            return Err(NcliError::invalid_state(
                "update-config needs autoconfig to be enabled",
            ));
        }
        self.start_update_config(id)
    }

    pub(super) fn cmd_save(&mut self) -> Result<()> {
        let id = self.current;
        self.do_save(id).map(|_| ())
    }

    /// Commits the candidate or copies running to startup, whichever the
    /// server needs.
    pub(super) fn do_save(&mut self, id: SessionId) -> Result<SaveStart> {
        let session = self.session_mut(id)?;
        let mode = session.mode().unwrap_or_default();
        let from_autotest = mode == CommandMode::AutoTest;
        let caps = &session.capabilities;
        let (candidate, startup, writable) = (
            caps.has_candidate(),
            caps.has_startup(),
            caps.has_writable_running(),
        );

        if candidate {
            let send_mode = if !from_autotest && startup {
                CommandMode::Save
            } else {
                mode
            };
            self.send_request(id, &Node::new("commit"), send_mode, RequestOrigin::Automatic)?;
            return Ok(SaveStart::Sent);
        }
        if writable {
            if startup && !from_autotest {
                self.send_copy_to_startup(id)?;
                return Ok(SaveStart::Sent);
            }
            info!("No distinct save operation needed for this server");
            return Ok(SaveStart::Skipped);
        }
        warn!("No writable targets supported on this server");
        Ok(SaveStart::Skipped)
    }

    /// Copies running to startup when the server has one.
    pub(super) fn finish_save(&mut self, id: SessionId) -> Result<()> {
        let startup = self
            .sessions
            .get(&id)
            .is_some_and(|s| s.capabilities.has_startup());
        if startup {
            info!("Final step saving configuration to non-volatile storage");
            self.send_copy_to_startup(id)?;
        }
        Ok(())
    }

    fn send_copy_to_startup(&mut self, id: SessionId) -> Result<()> {
        let request = Node::new("copy-config")
            .with_child(datastore_node("target", "startup"))
            .with_child(datastore_node("source", "running"));
        self.send_request(id, &request, CommandMode::Normal, RequestOrigin::Automatic)?;
        Ok(())
    }

    /// Default edit target: candidate, else writable running.
    fn edit_target(&self, id: SessionId) -> Result<&'static str> {
        let caps = self
            .sessions
            .get(&id)
            .map(|s| &s.capabilities)
            .ok_or_else(|| NcliError::not_found("session", id.to_string()))?;
        if caps.has_candidate() {
            Ok("candidate")
        } else if caps.has_writable_running() {
            Ok("running")
        } else {
            Err(NcliError::invalid_state(
                "No writable targets supported on this server",
            ))
        }
    }

    pub(super) fn cmd_apply_config(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let id = self.current;
        let tree = match cmd.param("var").map(|p| &p.value) {
            Some(BoundValue::Tree(tree)) => tree.clone(),
            Some(BoundValue::Text(name)) => {
                let var = VarRef {
                    name: name.clone(),
                    global: false,
                };
                match self.lookup_var(&var) {
                    Some(VarValue::Tree(tree)) => tree,
                    Some(VarValue::Text(_)) => {
                        return Err(NcliError::execution(format!(
                            "variable '{name}' does not hold a configuration tree"
                        )));
                    }
                    None => return Err(NcliError::not_found("variable", name.clone())),
                }
            }
            _ => return Err(NcliError::execution("missing var")),
        };
        let target = self.edit_target(id)?;
        let request = edit_config_request(target, config_from_tree(&tree));
        self.send_request(id, &request, CommandMode::ConfigApply, RequestOrigin::Automatic)?;
        Ok(())
    }

    pub(super) fn cmd_auto_test(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let target: Vec<String> = cmd
            .text("target")
            .ok_or_else(|| NcliError::execution("missing target"))?
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if target.is_empty() {
            return Err(NcliError::execution("auto-test target path is empty"));
        }
        let iterations = cmd.uint("iterations")?.unwrap_or(1);
        if iterations == 0 {
            return Err(NcliError::execution("iterations must be at least 1"));
        }
        let id = match cmd.text("session-name") {
            Some(name) => self
                .session_id_by_name(name)
                .ok_or_else(|| NcliError::not_found("session", name))?,
            None => self.current,
        };
        self.edit_target(id)?;

        let session = self.session_mut(id)?;
        if !session.phase.accepts_user_input() {
            return Err(NcliError::invalid_state(format!(
                "session '{}' is not ready for auto-test",
                session.name
            )));
        }
        info!(session = %session.name, iterations, "auto-test started on /{}", target.join("/"));
        session.autotest = Some(AutotestState {
            target,
            iterations,
            cur_iteration: 0,
            step: AutotestStep::WaitEdit,
        });
        self.set_mode(id, CommandMode::AutoTest);
        if let Err(e) = self.send_autotest_edit(id) {
            self.cancel_autotest(id);
            return Err(e);
        }
        Ok(())
    }

    /// Sends the next random edit.
    fn send_autotest_edit(&mut self, id: SessionId) -> Result<()> {
        let target = self.edit_target(id)?;
        let session = self.session_mut(id)?;
        let Some(test) = session.autotest.as_mut() else {
            return Err(NcliError::invalid_state("auto-test is not running"));
        };
        test.cur_iteration += 1;
        test.step = AutotestStep::WaitEdit;
        let value = rand::random::<u32>().to_string();
        debug!(iteration = test.cur_iteration, "auto-test edit value {value}");
        let config = config_for_path(&test.target, &value);
        let request = edit_config_request(target, config);
        self.send_request(id, &request, CommandMode::AutoTest, RequestOrigin::Automatic)?;
        Ok(())
    }

    /// An iteration's edit (and save, if any) is complete.
    pub(super) fn autotest_iteration_done(&mut self, id: SessionId) -> Result<()> {
        let Some(test) = self.sessions.get(&id).and_then(|s| s.autotest.as_ref()) else {
            return Ok(());
        };
        if test.cur_iteration >= test.iterations {
            let iterations = test.iterations;
            self.set_mode(id, CommandMode::Normal);
            if let Some(session) = self.sessions.get_mut(&id) {
                session.autotest = None;
            }
            info!("auto-test finished after {iterations} iterations");
            return self.finish_save(id);
        }
        if let Err(e) = self.send_autotest_edit(id) {
            self.cancel_autotest(id);
            return Err(e);
        }
        Ok(())
    }

    pub(super) fn cancel_autotest(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            if session.autotest.take().is_some() {
                info!(session = %session.name, "auto-test canceled");
            }
        }
        self.set_mode(id, CommandMode::Normal);
    }
}
