//! Transport events and the reply dispatcher.

use super::{ClientEvent, ServerContext};
use crate::document::Node;
use crate::error::Result;
use crate::lock::LockReplyAction;
use crate::rpc::{InFlightRequest, Reply, ReplyKind, RequestOrigin};
use crate::session::{AutotestStep, CommandMode, LockOutcome, SessionPhase};
use crate::test_run::StopReason;
use crate::transport::{LineOrigin, MessageId, SessionId, TransportEvent};
use tracing::{Level, debug, error, info, warn};

/// Notifications kept per session for display.
const MAX_KEPT_NOTIFICATIONS: usize = 100;

impl ServerContext {
    pub fn handle_transport_event(&mut self, id: SessionId, event: TransportEvent) {
        match event {
            TransportEvent::Accepted => {
                let now = self.clock.now();
                if let Some(session) = self.sessions.get_mut(&id) {
                    debug!(session = %session.name, "transport accepted, waiting for hello");
                    session.phase = SessionPhase::HelloWait { since: now };
                }
            }
            TransportEvent::HelloComplete { capabilities } => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                if !matches!(
                    session.phase,
                    SessionPhase::HelloWait { .. } | SessionPhase::Connecting { .. }
                ) {
                    warn!(session = %session.name, "unexpected hello in {}", session.connection_state());
                    return;
                }
                session.phase = SessionPhase::connected();
                session.config_update_supported = capabilities.has_config_change();
                let count = capabilities.uris.len() + capabilities.modules.len();
                session.capabilities = capabilities;
                info!(target: "ncli::session", session = %session.name, "session connected");
                self.events.push(ClientEvent::Connected {
                    session: session.name.clone(),
                    capabilities: count,
                });
            }
            TransportEvent::Reply { message_id, result } => {
                self.on_reply(id, message_id, result);
            }
            TransportEvent::Notification(node) => self.on_notification(id, node),
            TransportEvent::Closed { reason } => {
                if self.test_engine.is_busy() {
                    if let Err(e) = self
                        .test_engine
                        .stop(&mut self.suites, StopReason::Failed("session lost".to_string()))
                    {
                        warn!("test engine stop failed: {e}");
                    }
                    self.emit_reports();
                }
                self.cancel_scripts();
                self.clear_pending("session closed");
                self.drop_session(id, &reason);
            }
        }
    }

    fn on_notification(&mut self, id: SessionId, node: Node) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.notifications.push_back(node.clone());
        while session.notifications.len() > MAX_KEPT_NOTIFICATIONS {
            session.notifications.pop_front();
        }
        let handled = self.notifications.dispatch(session, &node);
        if !handled && session.prefs.echo_notifs {
            let text = node
                .render(session.prefs.display_mode, session.prefs.indent)
                .unwrap_or_else(|_| node.to_text(session.prefs.indent));
            self.events.push(ClientEvent::Notification {
                session: session.name.clone(),
                text,
            });
        }
    }

    fn on_reply(
        &mut self,
        id: SessionId,
        message_id: MessageId,
        result: std::result::Result<Node, String>,
    ) {
        if self.correlator.get(message_id).is_none_or(|r| r.session != id) {
            warn!(session = %self.session_name(id), msg_id = message_id, "Dropping reply for unknown request");
            return;
        }
        let Some(req) = self.correlator.take(message_id) else {
            return;
        };
        let reply = match result {
            Ok(doc) => Reply::classify(doc),
            Err(msg) => Reply::transport_error(&msg),
        };
        let Some(session) = self.sessions.get(&id) else {
            return;
        };

        if let SessionPhase::CancelWait { message_id: m, .. } = session.phase {
            if m == message_id {
                debug!(session = %session.name, msg_id = message_id, "canceled reply dropped");
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.phase = SessionPhase::connected();
                }
                return;
            }
        }

        self.echo_reply(id, &req, &reply);

        if let RequestOrigin::Command(origin) = req.origin {
            if origin == LineOrigin::TestEngine {
                self.test_engine
                    .handle_reply(&mut self.suites, self.snapshots.as_mut(), &reply);
            }
            if let Err(e) = self.recorder.record_reply(&reply, self.snapshots.as_mut()) {
                warn!("Warning: reply not recorded: {e}");
            }
            let mut failed = reply.is_error();
            if let Some(target) = self.pending.take() {
                if !failed {
                    if let Err(e) = self.finish_result_assign(target, reply.payload()) {
                        error!("Error: {e}");
                        failed = true;
                    }
                }
            }
            if failed {
                self.cancel_scripts();
            }
        }

        let closing = matches!(
            self.sessions.get(&id).map(|s| s.phase),
            Some(SessionPhase::CloseWait { .. })
        );
        if closing {
            self.drop_session(id, "closed");
            return;
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            session.phase.set_waiting(None);
        }

        if let Err(e) = self.dispatch_mode_reply(id, req.mode, &reply) {
            error!(session = %self.session_name(id), "Error: {e}");
            self.set_mode(id, CommandMode::Normal);
        }
    }

    fn echo_reply(&mut self, id: SessionId, req: &InFlightRequest, reply: &Reply) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let wanted = session.prefs.echo_replies && req.mode == CommandMode::Normal;
        if !wanted && !tracing::enabled!(Level::DEBUG) {
            return;
        }
        let text = match reply.kind {
            ReplyKind::Ok => "OK".to_string(),
            _ => reply
                .document
                .render(session.prefs.display_mode, session.prefs.indent)
                .unwrap_or_else(|_| reply.document.to_text(session.prefs.indent)),
        };
        if wanted {
            self.events.push(ClientEvent::Reply {
                session: session.name.clone(),
                message_id: req.message_id,
                kind: reply.kind,
                text,
            });
        } else {
            debug!(session = %session.name, msg_id = req.message_id, "<{}> reply:\n{text}", req.rpc_name);
        }
    }

    /// Continues the automatic sequence that sent the request.
    fn dispatch_mode_reply(&mut self, id: SessionId, mode: CommandMode, reply: &Reply) -> Result<()> {
        match mode {
            CommandMode::Normal => Ok(()),
            CommandMode::AutoLoad => self.on_autoload_reply(id, reply),
            CommandMode::AutoLock => {
                let action = match self.sessions.get_mut(&id) {
                    Some(session) => session.locks.on_lock_reply(reply.error_tag()),
                    None => return Ok(()),
                };
                if reply.is_error() {
                    info!(session = %self.session_name(id), "<lock> failed: {}", reply.error_summary());
                }
                match action {
                    LockReplyAction::Continue => self.advance_locks(id, false),
                    LockReplyAction::DiscardCandidate => {
                        if let Err(e) = self.send_discard_changes(id) {
                            error!("Error: <discard-changes> not sent: {e}");
                            self.set_lock_result(id, LockOutcome::Failed);
                            self.locks_cleanup(id);
                        }
                    }
                    LockReplyAction::Abort => {
                        self.set_lock_result(id, LockOutcome::Failed);
                        self.locks_cleanup(id);
                    }
                }
                Ok(())
            }
            CommandMode::AutoUnlock => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.locks.on_unlock_reply(!reply.is_error());
                }
                if reply.is_error() {
                    warn!(session = %self.session_name(id), "<unlock> failed: {}", reply.error_summary());
                }
                self.advance_release(id);
                Ok(())
            }
            CommandMode::AutoDiscard => {
                self.set_mode(id, CommandMode::AutoLock);
                if reply.is_error() {
                    error!(session = %self.session_name(id), "<discard-changes> failed: {}", reply.error_summary());
                    self.set_lock_result(id, LockOutcome::Failed);
                    self.locks_cleanup(id);
                } else {
                    self.advance_locks(id, false);
                }
                Ok(())
            }
            CommandMode::AutoConfig => {
                self.on_autoconfig_reply(id, reply);
                Ok(())
            }
            CommandMode::AutoNotif => {
                self.set_mode(id, CommandMode::Normal);
                if reply.is_error() {
                    warn!(session = %self.session_name(id), "notification subscription failed; shadow config update disabled for this session");
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.config_update_supported = false;
                    }
                }
                Ok(())
            }
            CommandMode::AutoTest => self.on_autotest_reply(id, reply),
            CommandMode::ConfigApply => {
                self.set_mode(id, CommandMode::Normal);
                if reply.is_error() {
                    warn!("Config mode 'save' canceled because <edit-config> failed");
                    return Ok(());
                }
                if let Err(e) = self.do_save(id) {
                    warn!("Config mode 'save' failed ({e})");
                }
                Ok(())
            }
            CommandMode::Save => {
                self.set_mode(id, CommandMode::Normal);
                if reply.is_error() {
                    warn!("Final <copy-config> canceled because <commit> failed");
                    return Ok(());
                }
                self.finish_save(id)
            }
        }
    }

    fn on_autotest_reply(&mut self, id: SessionId, reply: &Reply) -> Result<()> {
        if reply.is_error() {
            error!("auto-test canceled: {}", reply.error_summary());
            self.cancel_autotest(id);
            return Ok(());
        }
        let Some(step) = self
            .sessions
            .get(&id)
            .and_then(|s| s.autotest.as_ref())
            .map(|t| t.step)
        else {
            self.set_mode(id, CommandMode::Normal);
            return Ok(());
        };
        if step == AutotestStep::WaitEdit {
            match self.do_save(id)? {
                super::auto::SaveStart::Sent => {
                    if let Some(test) = self.sessions.get_mut(&id).and_then(|s| s.autotest.as_mut()) {
                        test.step = AutotestStep::WaitSave;
                    }
                    return Ok(());
                }
                super::auto::SaveStart::Skipped => {}
            }
        }
        self.autotest_iteration_done(id)
    }
}
