//! Command line handling and the local commands.

use super::{ClientEvent, ServerContext};
use crate::assign::{ResultTarget, parse_assignment};
use crate::command::{ValidatedCommand, validate};
use crate::error::{NcliError, Result};
use crate::record::FinishOutcome;
use crate::rpc::RequestOrigin;
use crate::session::{CommandMode, Session, SessionPhase};
use crate::test_run::{StopReason, describe_suite};
use crate::transport::{ConnectParams, LineOrigin, MessageId, SessionId};
use crate::vars::VarRef;
use tracing::{debug, error, info, warn};

impl ServerContext {
    /// Handles one input line from any source.
    ///
    /// Returns the message id when a request went out whose reply is still
    /// to come. A failure cancels any running script; a line from the test
    /// engine reports its outcome back to the engine.
    pub fn handle_line(&mut self, line: &str, origin: LineOrigin) -> Result<Option<MessageId>> {
        let result = self.dispatch_line(line, origin);
        if let Err(e) = &result {
            error!("Error: {e}");
            self.cancel_scripts();
        }
        if origin == LineOrigin::TestEngine {
            let reply_pending = matches!(result, Ok(Some(_)));
            let outcome = result.as_ref().map(|_| ());
            self.test_engine
                .handle_return(&mut self.suites, outcome, reply_pending);
        }
        result
    }

    fn dispatch_line(&mut self, line: &str, origin: LineOrigin) -> Result<Option<MessageId>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        if origin == LineOrigin::User && !self.input_ready() {
            return Err(NcliError::busy(format!(
                "session '{}' is busy ({})",
                self.current_session().name,
                self.current_session().connection_state()
            )));
        }
        match parse_assignment(line)? {
            Some(stmt) => self.execute_assignment(stmt, origin),
            None => self.execute_command(line, origin, None),
        }
    }

    /// Validates and runs a command. `target` receives the reply payload
    /// of a remote command.
    pub(super) fn execute_command(
        &mut self,
        line: &str,
        origin: LineOrigin,
        target: Option<ResultTarget>,
    ) -> Result<Option<MessageId>> {
        let cmd = {
            let resolve = |v: &VarRef| self.lookup_var(v);
            validate(self.schema.as_ref(), line, &resolve)?
        };

        let session_name = self.current_session().name.clone();

        if cmd.is_local() {
            if let Some(target) = target {
                return Err(NcliError::assignment(format!(
                    "'{}' does not return a result for {target}",
                    cmd.name()
                )));
            }
            self.run_local(&cmd)?;
            self.record_command(&cmd, &session_name);
            return Ok(None);
        }

        let id = self.current;
        let session = self.current_session();
        if !session.phase.is_connected() {
            return Err(NcliError::invalid_state(format!(
                "session '{}' is not connected",
                session.name
            )));
        }
        if !session.phase.accepts_user_input() {
            return Err(NcliError::busy(format!(
                "session '{}' is busy ({} {})",
                session.name,
                session.connection_state(),
                session.mode().unwrap_or_default()
            )));
        }

        if let Some(target) = target {
            if let Some(old) = &self.pending {
                return Err(NcliError::busy(format!(
                    "result for {old} still pending, {target} not assigned"
                )));
            }
            self.pending = Some(target);
        }
        let request = cmd.to_request();
        let message_id = match self.send_request(
            id,
            &request,
            CommandMode::Normal,
            RequestOrigin::Command(origin),
        ) {
            Ok(message_id) => message_id,
            Err(e) => {
                self.clear_pending("send failed");
                return Err(e);
            }
        };
        self.record_command(&cmd, &session_name);
        if cmd.name() == "close-session" {
            let now = self.clock.now();
            let session = self.session_mut(id)?;
            session.phase = SessionPhase::CloseWait {
                message_id,
                since: now,
            };
        }
        Ok(Some(message_id))
    }

    /// Captures a command that ran or went out while recording.
    fn record_command(&mut self, cmd: &ValidatedCommand, session_name: &str) {
        if let Err(e) = self.recorder.record_command(cmd, session_name) {
            warn!("Warning: command not recorded: {e}");
        }
    }

    fn run_local(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        debug!("local command '{}'", cmd.name());
        match cmd.name() {
            "connect" => self.cmd_connect(cmd),
            "session" => self.cmd_session(cmd),
            "get-locks" => self.cmd_get_locks(cmd),
            "release-locks" => self.cmd_release_locks(),
            "save" => self.cmd_save(),
            "update-config" => self.cmd_update_config(),
            "apply-config" => self.cmd_apply_config(cmd),
            "auto-test" => self.cmd_auto_test(cmd),
            "record-test" => self.cmd_record_test(cmd),
            "test-suite" => self.cmd_test_suite(cmd),
            "run" => self.cmd_run(cmd),
            other => Err(NcliError::not_found("local command", other)),
        }
    }

    fn cmd_connect(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let id = self.current;
        let host = cmd
            .text("host")
            .ok_or_else(|| NcliError::execution("missing host"))?
            .to_string();
        let port = cmd.uint("port")?.unwrap_or(830);
        let port = u16::try_from(port)
            .map_err(|_| NcliError::execution(format!("port {port} is out of range")))?;
        let params = ConnectParams {
            host,
            port,
            user: cmd.text("user").map(str::to_string),
            password: cmd.text("password").map(str::to_string),
        };

        let session = self.session_mut(id)?;
        if !matches!(session.phase, SessionPhase::Init | SessionPhase::Idle) {
            return Err(NcliError::invalid_state(format!(
                "session '{}' is already {}",
                session.name,
                session.connection_state()
            )));
        }
        self.transport.connect(id, &params)?;
        let now = self.clock.now();
        let session = self.session_mut(id)?;
        info!(target: "ncli::session", session = %session.name, "connecting to {}:{}", params.host, params.port);
        session.connect_params = Some(params);
        session.phase = SessionPhase::Connecting { since: now };
        Ok(())
    }

    fn cmd_session(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        if let Some(name) = cmd.text("add") {
            if self.session_id_by_name(name).is_some() {
                return Err(NcliError::invalid_state(format!(
                    "session '{name}' already exists"
                )));
            }
            let id = SessionId(self.next_session);
            self.next_session += 1;
            let mut session = Session::new(id, name, self.defaults.clone());
            session.phase = SessionPhase::Idle;
            self.sessions.insert(id, session);
            info!(target: "ncli::session", session = name, "session added");
        }
        if let Some(name) = cmd.text("delete") {
            let id = self
                .session_id_by_name(name)
                .ok_or_else(|| NcliError::not_found("session", name))?;
            if id == self.default_session {
                return Err(NcliError::invalid_state(
                    "the default session cannot be deleted",
                ));
            }
            if self.sessions.get(&id).is_some_and(|s| s.phase.is_connected()) {
                self.drop_session(id, "session deleted");
            }
            self.sessions.remove(&id);
            self.correlator.drop_session(id);
            if self.current == id {
                self.current = self.default_session;
            }
            info!(target: "ncli::session", session = name, "session deleted");
        }
        if let Some(name) = cmd.text("set-current") {
            let id = self
                .session_id_by_name(name)
                .ok_or_else(|| NcliError::not_found("session", name))?;
            self.current = id;
            info!("current session is now '{name}'");
        }
        if cmd.flag("list") || cmd.params.is_empty() {
            for session in self.sessions.values() {
                let marker = if session.id == self.current { "*" } else { " " };
                self.events
                    .push(ClientEvent::Info(format!("{marker} {}", session.summary())));
            }
        }
        Ok(())
    }

    fn cmd_record_test(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let suite = cmd.text("suite-name");
        let test = cmd.text("test-name");
        if cmd.flag("start") {
            let (Some(suite), Some(test)) = (suite, test) else {
                return Err(NcliError::execution(
                    "record-test start needs suite-name and test-name",
                ));
            };
            return self.recorder.start(&self.suites, suite, test);
        }
        if cmd.flag("finish") {
            let outcome =
                self.recorder
                    .finish(&mut self.suites, self.suite_repo.as_mut(), suite, test)?;
            let text = match outcome {
                FinishOutcome::Empty => "recording had no steps and was dropped".to_string(),
                FinishOutcome::Saved { suite, test, steps } => {
                    format!("saved test '{suite}/{test}' with {steps} steps")
                }
            };
            self.events.push(ClientEvent::Info(text));
            return Ok(());
        }
        if cmd.flag("cancel") {
            return self.recorder.cancel(suite, test);
        }
        if cmd.flag("pause") {
            return self.recorder.pause(suite, test);
        }
        if cmd.flag("resume") {
            return self.recorder.resume(suite, test);
        }
        let state = match self.recorder.target() {
            Some((s, t)) => format!("recording {s}/{t}: {}", self.recorder.state()),
            None => "no recording is active".to_string(),
        };
        self.events.push(ClientEvent::Info(state));
        Ok(())
    }

    fn cmd_test_suite(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let current = self.current_session().name.clone();
        if let Some(name) = cmd.text("run") {
            return self.test_engine.start(&mut self.suites, Some(name), &current);
        }
        if cmd.flag("run-all") {
            return self.test_engine.start(&mut self.suites, None, &current);
        }
        if cmd.flag("stop") {
            self.test_engine.stop(&mut self.suites, StopReason::Cancelled)?;
            self.emit_reports();
            return Ok(());
        }
        if let Some(name) = cmd.text("show") {
            let suite = self
                .suites
                .find(name)
                .ok_or_else(|| NcliError::not_found("test-suite", name))?;
            self.events.push(ClientEvent::Info(describe_suite(suite)));
            return Ok(());
        }
        if let Some(name) = cmd.text("delete") {
            if self.test_engine.is_busy() {
                return Err(NcliError::busy("a test-suite is running"));
            }
            let before = self.suites.clone();
            match cmd.text("test") {
                Some(test) => {
                    self.suites.delete_test(name, test)?;
                }
                None => {
                    self.suites.delete_suite(name)?;
                }
            }
            if let Err(e) = self.suite_repo.save(&self.suites) {
                self.suites = before;
                return Err(e);
            }
            info!("deleted test-suite entry '{name}'");
            return Ok(());
        }
        // list is the default action
        let lines: Vec<String> = self
            .suites
            .suites
            .iter()
            .map(|s| format!("{} ({} tests)", s.name, s.tests.len()))
            .collect();
        if lines.is_empty() {
            self.events
                .push(ClientEvent::Info("no test-suites loaded".to_string()));
        }
        for line in lines {
            self.events.push(ClientEvent::Info(line));
        }
        Ok(())
    }

    fn cmd_run(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let file = cmd
            .text("file")
            .ok_or_else(|| NcliError::execution("missing file"))?;
        let home = self.vars.system("HOME").and_then(|v| v.as_text().map(str::to_string));
        let path = crate::assign::check_filespec(file, None, home.as_deref())?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NcliError::io(format!("cannot read script '{}': {e}", path.display())))?;
        self.run_script(file, content.lines())
    }
}
