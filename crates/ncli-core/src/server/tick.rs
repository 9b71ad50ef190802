//! Timeout polling and idle-time work.

use super::ServerContext;
use crate::rpc::RequestOrigin;
use crate::session::{CommandMode, Connected, LockOutcome, SessionPhase};
use crate::transport::{LineOrigin, MessageId, SessionId};
use std::time::{Duration, Instant};
use tracing::{error, warn};

fn expired(timeout: Option<Duration>, since: Instant, now: Instant) -> bool {
    timeout.is_some_and(|t| now.saturating_duration_since(since) >= t)
}

impl ServerContext {
    /// Checks every session's deadlines and runs due automatic steps.
    /// Returns true when anything changed.
    pub fn tick(&mut self) -> bool {
        let before = self.changes;
        let now = self.clock.now();
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.tick_session(id, now);
        }
        self.changes != before
    }

    fn tick_session(&mut self, id: SessionId, now: Instant) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let timeout = session.prefs.reply_timeout();
        let phase = session.phase;
        match phase {
            SessionPhase::Connecting { since } | SessionPhase::HelloWait { since }
                if expired(timeout, since, now) =>
            {
                warn!(session = %session.name, "connect timed out in {}", phase.connection_state());
                self.drop_session(id, "connect timeout");
            }
            SessionPhase::CancelWait { message_id, since }
            | SessionPhase::CloseWait { message_id, since }
                if expired(timeout, since, now) =>
            {
                warn!(session = %session.name, msg_id = message_id, "no reply in {}", phase.connection_state());
                self.correlator.take(message_id);
                self.drop_session(id, "reply timeout");
            }
            SessionPhase::Connected(c) => self.tick_connected(id, c, timeout, now),
            _ => {}
        }
    }

    fn tick_connected(&mut self, id: SessionId, c: Connected, timeout: Option<Duration>, now: Instant) {
        if let Some(w) = c.waiting {
            if expired(timeout, w.sent_at, now) {
                self.on_reply_timeout(id, w.message_id);
                return;
            }
        }

        if c.mode.is_lock_mode() {
            let timed_out = self
                .sessions
                .get(&id)
                .is_some_and(|s| s.locks.is_active() && s.locks.timed_out(now));
            if timed_out {
                self.on_lock_timeout(id, c.mode);
                return;
            }
        }

        if c.waiting.is_some() {
            return;
        }
        match c.mode {
            CommandMode::AutoLock => {
                let retry_due = self.sessions.get(&id).is_some_and(|s| s.locks.is_waiting());
                if retry_due {
                    self.advance_locks(id, false);
                }
            }
            CommandMode::Normal => self.post_connect(id),
            _ => {}
        }
    }

    fn on_lock_timeout(&mut self, id: SessionId, mode: CommandMode) {
        error!(session = %self.session_name(id), "lock sequence timed out in {mode}");
        self.cancel_scripts();
        self.drop_waiting(id);
        match mode {
            CommandMode::AutoLock | CommandMode::AutoDiscard => {
                self.set_lock_result(id, LockOutcome::TimedOut);
                self.set_mode(id, CommandMode::AutoLock);
                self.locks_cleanup(id);
            }
            _ => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.locks.clear();
                }
                self.set_mode(id, CommandMode::Normal);
            }
        }
        self.bump();
    }

    /// The request a connected session waits on went unanswered.
    fn on_reply_timeout(&mut self, id: SessionId, message_id: MessageId) {
        let request = self.correlator.take(message_id);
        let current_mode = self
            .sessions
            .get(&id)
            .and_then(|s| s.mode())
            .unwrap_or_default();
        let mode = request.as_ref().map_or(current_mode, |r| r.mode);
        let rpc = request
            .as_ref()
            .map_or_else(|| "request".to_string(), |r| format!("<{}>", r.rpc_name));
        error!(session = %self.session_name(id), msg_id = message_id, "No reply for {rpc} within the reply timeout");

        self.cancel_scripts();
        if let Some(session) = self.sessions.get_mut(&id) {
            session.phase.set_waiting(None);
        }
        self.clear_pending("reply timeout");
        if request.is_some_and(|r| r.origin == RequestOrigin::Command(LineOrigin::TestEngine)) {
            self.test_engine.handle_timeout(&mut self.suites);
        }

        match mode {
            CommandMode::Normal => {}
            CommandMode::AutoLoad => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    let mut pending: Vec<_> = session.autoload.current.take().into_iter().collect();
                    pending.extend(session.autoload.queue.drain(..));
                    session.autoload.failed.extend(pending);
                }
                warn!("autoload stopped after a reply timeout");
                self.set_mode(id, CommandMode::Normal);
            }
            CommandMode::AutoDiscard => {
                self.set_mode(id, CommandMode::AutoLock);
                self.set_lock_result(id, LockOutcome::Failed);
                self.locks_cleanup(id);
            }
            CommandMode::AutoLock => {
                self.set_lock_result(id, LockOutcome::Failed);
                self.locks_cleanup(id);
            }
            CommandMode::AutoUnlock => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.locks.clear();
                }
                self.set_mode(id, CommandMode::Normal);
            }
            CommandMode::AutoConfig => {
                warn!("autoconfig <get-config> failed");
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.config_dirty = false;
                }
                self.set_mode(id, CommandMode::Normal);
            }
            CommandMode::AutoNotif => {
                warn!("notification subscription failed");
                self.set_mode(id, CommandMode::Normal);
            }
            CommandMode::AutoTest => self.cancel_autotest(id),
            CommandMode::ConfigApply => {
                error!("apply-config <edit-config> failed");
                self.set_mode(id, CommandMode::Normal);
            }
            CommandMode::Save => self.set_mode(id, CommandMode::Normal),
        }
        self.bump();
    }
}
