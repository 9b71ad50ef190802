//! Server context: the top-level owner of every session and engine.
//!
//! # Module Structure
//!
//! - `events`: `ClientEvent`, what the front ends render
//! - `input`: line handling and the local commands
//! - `assign`: assignment execution and file output
//! - `reply`: transport events and the reply dispatcher
//! - `locks`: get-locks / release-locks sequences
//! - `auto`: post-connect sequence, autoconfig, save chain and auto-test
//! - `tick`: idle-time timeout polling
//!
//! Everything runs on the caller's thread. `pump` drains transport events,
//! polls timeouts and feeds lines from the test engine and the run stack
//! until nothing more can happen without user input.

mod assign;
mod auto;
mod events;
mod input;
mod locks;
mod reply;
mod tick;

pub use events::ClientEvent;

use crate::assign::ResultTarget;
use crate::document::Node;
use crate::error::{NcliError, Result};
use crate::notif::NotificationRegistry;
use crate::record::RecordEngine;
use crate::rpc::{Correlator, InFlightRequest, RequestOrigin};
use crate::schema::SchemaModel;
use crate::script::RunStack;
use crate::session::{CommandMode, Session, SessionPhase, SessionPrefs, Waiting};
use crate::test_run::{RunState, StopReason, TestRunEngine};
use crate::testsuite::{
    MemorySnapshotStore, MemorySuiteRepository, SnapshotStore, SuiteRepository, SuiteSet,
};
use crate::transport::{Clock, LineOrigin, MessageId, SessionId, SystemClock, Transport};
use crate::vars::{VarRef, VarStore, VarValue};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the session that always exists.
pub const DEFAULT_SESSION: &str = "default";

pub struct ServerContext {
    id: Uuid,
    sessions: BTreeMap<SessionId, Session>,
    default_session: SessionId,
    current: SessionId,
    next_session: u32,
    /// Process defaults copied into each new session
    defaults: SessionPrefs,
    vars: VarStore,
    runstack: RunStack,
    /// Target of the command whose reply is still to be assigned
    pending: Option<ResultTarget>,
    correlator: Correlator,
    test_engine: TestRunEngine,
    recorder: RecordEngine,
    suites: SuiteSet,
    notifications: NotificationRegistry,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    schema: Box<dyn SchemaModel>,
    suite_repo: Box<dyn SuiteRepository>,
    snapshots: Box<dyn SnapshotStore>,
    events: Vec<ClientEvent>,
    /// Bumped on every send, mode change and disconnect
    changes: u64,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("id", &self.id)
            .field("sessions", &self.sessions.len())
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("in_flight", &self.correlator.len())
            .field("test_state", &self.test_engine.state())
            .field("record_state", &self.recorder.state())
            .finish()
    }
}

impl ServerContext {
    /// Creates a context with one idle default session. Suites and
    /// snapshots are kept in memory until real stores are supplied.
    pub fn new(transport: Box<dyn Transport>, schema: Box<dyn SchemaModel>) -> Self {
        let defaults = SessionPrefs::default();
        let default_session = SessionId(0);
        let mut session = Session::new(default_session, DEFAULT_SESSION, defaults.clone());
        session.phase = SessionPhase::Idle;
        let mut sessions = BTreeMap::new();
        sessions.insert(default_session, session);

        Self {
            id: Uuid::new_v4(),
            sessions,
            default_session,
            current: default_session,
            next_session: 1,
            defaults,
            vars: VarStore::from_env(),
            runstack: RunStack::default(),
            pending: None,
            correlator: Correlator::default(),
            test_engine: TestRunEngine::new(),
            recorder: RecordEngine::new(),
            suites: SuiteSet::default(),
            notifications: NotificationRegistry::with_builtin(),
            transport,
            clock: Box::new(SystemClock),
            schema,
            suite_repo: Box::new(MemorySuiteRepository::default()),
            snapshots: Box::new(MemorySnapshotStore::default()),
            events: Vec::new(),
            changes: 0,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the process defaults. Sessions that are still idle take
    /// the new values.
    pub fn with_defaults(mut self, defaults: SessionPrefs) -> Self {
        for session in self.sessions.values_mut() {
            if !session.phase.is_connected() {
                session.prefs = defaults.clone();
            }
        }
        self.test_engine.set_indent(defaults.indent);
        self.recorder.set_indent(defaults.indent);
        self.defaults = defaults;
        self
    }

    pub fn with_vars(mut self, vars: VarStore) -> Self {
        self.vars = vars;
        self
    }

    /// Uses `repo` for suites and loads them.
    pub fn with_suite_repository(mut self, repo: Box<dyn SuiteRepository>) -> Result<Self> {
        self.suites = repo.load()?;
        self.suite_repo = repo;
        info!(suites = self.suites.suites.len(), "test-suites loaded");
        Ok(self)
    }

    pub fn with_snapshot_store(mut self, snapshots: Box<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_by_name(&self, name: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.name == name)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn current_id(&self) -> SessionId {
        self.current
    }

    pub fn current_session(&self) -> &Session {
        // the current id always names a live session
        &self.sessions[&self.current]
    }

    pub fn defaults(&self) -> &SessionPrefs {
        &self.defaults
    }

    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    pub fn runstack(&self) -> &RunStack {
        &self.runstack
    }

    pub fn pending(&self) -> Option<&ResultTarget> {
        self.pending.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.correlator.len()
    }

    pub fn suites(&self) -> &SuiteSet {
        &self.suites
    }

    pub fn test_engine(&self) -> &TestRunEngine {
        &self.test_engine
    }

    pub fn recorder(&self) -> &RecordEngine {
        &self.recorder
    }

    pub fn schema(&self) -> &dyn SchemaModel {
        self.schema.as_ref()
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationRegistry {
        &mut self.notifications
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Prompt for the interactive line editor.
    pub fn prompt(&self) -> String {
        let session = self.current_session();
        match session.mode() {
            Some(mode) if !mode.is_normal() => format!("ncli[{}:{mode}]> ", session.name),
            _ => format!("ncli[{}]> ", session.name),
        }
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Current session can take another command line: no request is
    /// outstanding, no automatic sequence runs and the connection is not
    /// half-open.
    fn input_ready(&self) -> bool {
        if self.correlator.has_command_pending() {
            return false;
        }
        let session = self.current_session();
        match session.phase {
            SessionPhase::Init | SessionPhase::Idle => true,
            SessionPhase::Connected(_) => session.phase.accepts_user_input(),
            _ => false,
        }
    }

    /// True when the next line must come from the user.
    pub fn wants_user_input(&self) -> bool {
        self.input_ready() && !self.test_engine.is_active() && !self.runstack.is_running()
    }

    /// Nothing is in flight and no automatic sequence, script or test run
    /// is in progress.
    pub fn is_idle(&self) -> bool {
        self.correlator.is_empty()
            && self.wants_user_input()
            && self.sessions.values().all(|s| {
                s.mode().is_none_or(CommandMode::is_normal)
                    && !matches!(
                        s.phase,
                        SessionPhase::Connecting { .. } | SessionPhase::HelloWait { .. }
                    )
            })
    }

    /// Runs everything that can run without user input.
    pub fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Some((session, event)) = self.transport.poll_event() {
                self.handle_transport_event(session, event);
                progressed = true;
            }
            if self.tick() {
                progressed = true;
            }
            if self.feed_internal_line() {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Feeds one line from the test engine or the run stack. Returns false
    /// when neither had anything to run.
    fn feed_internal_line(&mut self) -> bool {
        if !self.input_ready() {
            return false;
        }
        if self.test_engine.is_active() {
            return self.feed_test_line();
        }
        match self.runstack.next_line() {
            Some(line) => {
                debug!(script = %line.script, line = line.line_no, "script line: {}", line.text);
                // failures are logged and cancel the run stack inside handle_line
                let _ = self.handle_line(&line.text, LineOrigin::Script);
                true
            }
            None => false,
        }
    }

    fn feed_test_line(&mut self) -> bool {
        let current_name = self.current_session().name.clone();
        let Some(line) = self.test_engine.next_line(&mut self.suites) else {
            self.finish_test_run();
            return true;
        };

        if let Some(target) = self.test_engine.target_session(&self.suites, &current_name) {
            match self.session_id_by_name(&target) {
                Some(id) => self.current = id,
                None => {
                    let err = NcliError::not_found("session", target);
                    error!("Error: test step cannot run: {err}");
                    self.test_engine.handle_return(&mut self.suites, Err(&err), false);
                    return true;
                }
            }
        }
        let _ = self.handle_line(&line, LineOrigin::TestEngine);
        true
    }

    /// Called when the engine has no more lines.
    fn finish_test_run(&mut self) {
        if self.test_engine.state() == RunState::Error {
            self.events
                .push(ClientEvent::Warning("test-suite run ended with an error".to_string()));
        } else if let Err(e) = self.test_engine.stop(&mut self.suites, StopReason::Finished) {
            debug!("test engine stop: {e}");
        }
        self.emit_reports();
    }

    fn emit_reports(&mut self) {
        for report in self.test_engine.take_reports() {
            self.events.push(ClientEvent::TestReport(report));
        }
    }

    /// Starts a script; its lines run before further user input.
    pub fn run_script<I, S>(&mut self, name: &str, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runstack.push(name, lines)?;
        info!(script = name, level = self.runstack.level(), "script started");
        Ok(())
    }

    /// User interrupt: aborts scripts and test runs, cleans up lock
    /// sequences and abandons the current request.
    pub fn interrupt(&mut self) {
        let dropped = self.runstack.cancel();
        if dropped > 0 {
            info!("Script canceled ({dropped} levels)");
        }
        if self.test_engine.is_busy() {
            if let Err(e) = self
                .test_engine
                .stop(&mut self.suites, StopReason::Failed("canceled by user".to_string()))
            {
                warn!("test engine stop failed: {e}");
            }
            self.emit_reports();
        }
        if self.recorder.is_recording() {
            debug!("recording stays active across an interrupt");
        }
        self.clear_pending("interrupted");

        let id = self.current;
        let now = self.clock.now();
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let (mode, waiting) = (session.mode(), session.phase.waiting());
        match (mode, waiting) {
            (Some(CommandMode::AutoLock | CommandMode::AutoDiscard), _) => {
                self.drop_waiting(id);
                self.locks_cleanup(id);
            }
            (Some(_), Some(w)) => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    info!(session = %session.name, msg_id = w.message_id, "request canceled, reply will be dropped");
                    session.phase = SessionPhase::CancelWait {
                        message_id: w.message_id,
                        since: now,
                    };
                }
            }
            (Some(mode), None) if !mode.is_normal() => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.autotest = None;
                }
                self.set_mode(id, CommandMode::Normal);
            }
            _ => {}
        }
    }

    /// Closes every connection.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.get_mut(&id) {
                if session.phase.is_connected() || session.phase.expected_reply().is_some() {
                    self.transport.disconnect(id);
                }
                session.phase = SessionPhase::ShuttingDown;
            }
            self.correlator.drop_session(id);
        }
        self.runstack.cancel();
        self.pending = None;
        info!("shutdown complete");
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn session_id_by_name(&self, name: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| *id)
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| NcliError::not_found("session", id.to_string()))
    }

    fn session_name(&self, id: SessionId) -> String {
        self.sessions
            .get(&id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Sets a session's command mode and reports the change.
    fn set_mode(&mut self, id: SessionId, mode: CommandMode) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let before = session.mode();
        if !session.phase.set_mode(mode) || before == Some(mode) {
            return;
        }
        info!(target: "ncli::session", session = %session.name, mode = %mode, "command mode changed");
        self.changes += 1;
        self.events.push(ClientEvent::ModeChanged {
            session: session.name.clone(),
            mode,
        });
    }

    /// Sends a request on a connected session and records it as in
    /// flight. The session enters CONNECTED_WAIT_REPLY in `mode`.
    fn send_request(
        &mut self,
        id: SessionId,
        request: &Node,
        mode: CommandMode,
        origin: RequestOrigin,
    ) -> Result<MessageId> {
        let session = self.session_mut(id)?;
        if !session.phase.is_connected() {
            return Err(NcliError::invalid_state(format!(
                "session '{}' is not connected",
                session.name
            )));
        }
        if let Some(w) = session.phase.waiting() {
            return Err(NcliError::busy(format!(
                "session '{}' is waiting for reply {}",
                session.name, w.message_id
            )));
        }

        let message_id = self.transport.send_request(id, request)?;
        let now = self.clock.now();
        self.set_mode(id, mode);
        let session = self.session_mut(id)?;
        session.phase.set_waiting(Some(Waiting {
            message_id,
            sent_at: now,
        }));
        debug!(session = %session.name, msg_id = message_id, mode = %mode, "sent <{}>", request.name);
        self.correlator.register(InFlightRequest {
            message_id,
            session: id,
            mode,
            origin,
            rpc_name: request.name.clone(),
            sent_at: now,
        });
        self.bump();
        Ok(message_id)
    }

    /// Forgets the request a session is blocked on.
    fn drop_waiting(&mut self, id: SessionId) -> Option<InFlightRequest> {
        let session = self.sessions.get_mut(&id)?;
        let waiting = session.phase.waiting()?;
        session.phase.set_waiting(None);
        self.correlator.take(waiting.message_id)
    }

    /// Drops a session's connection and returns it to IDLE.
    fn drop_session(&mut self, id: SessionId, reason: &str) {
        self.transport.disconnect(id);
        self.correlator.drop_session(id);
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.reset_connection();
        self.changes += 1;
        info!(target: "ncli::session", session = %session.name, "session closed: {reason}");
        self.events.push(ClientEvent::Disconnected {
            session: session.name.clone(),
            reason: reason.to_string(),
        });
    }

    fn bump(&mut self) {
        self.changes += 1;
    }

    fn cancel_scripts(&mut self) {
        let dropped = self.runstack.cancel();
        if dropped > 0 {
            info!("Script canceled ({dropped} levels)");
        }
    }

    fn clear_pending(&mut self, why: &str) {
        if let Some(target) = self.pending.take() {
            debug!("result for {target} dropped: {why}");
        }
    }

    /// Looks up a variable the way command parameters see it: a `$name`
    /// reference tries the current frame first, then the global chain.
    pub fn lookup_var(&self, var: &VarRef) -> Option<VarValue> {
        if !var.global {
            if let Some(value) = self.runstack.locals().get(&var.name) {
                return Some(value.clone());
            }
        }
        let session = self.current_session();
        if let Some(text) = session.prefs.get(&var.name) {
            return Some(VarValue::Text(text));
        }
        if let Some(value) = self.vars.system(&var.name) {
            return Some(value);
        }
        if session.prefs.use_session_vars {
            if let Some(value) = session.session_vars.get(&var.name) {
                return Some(value.clone());
            }
        }
        self.vars.global(&var.name).cloned()
    }
}
