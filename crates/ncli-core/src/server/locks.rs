//! get-locks / release-locks sequences driven through the lock table.

use super::ServerContext;
use crate::command::ValidatedCommand;
use crate::document::Node;
use crate::error::{NcliError, Result};
use crate::lock::{AcquireStep, Datastore};
use crate::rpc::RequestOrigin;
use crate::session::{CommandMode, LockOutcome};
use crate::transport::{MessageId, SessionId};
use std::time::Duration;
use tracing::{error, info, warn};

/// `<lock>`/`<unlock>` request for one datastore.
fn target_request(op: &str, ds: Datastore) -> Node {
    Node::new(op).with_child(Node::new("target").with_child(Node::new(ds.to_string())))
}

impl ServerContext {
    pub(super) fn cmd_get_locks(&mut self, cmd: &ValidatedCommand) -> Result<()> {
        let id = self.current;
        let now = self.clock.now();
        let lock_timeout = cmd.uint("lock-timeout")?;
        let retry = cmd.uint("retry-interval")?;
        let cleanup = cmd.boolean("cleanup");

        let session = self.session_mut(id)?;
        if session.locks.is_active() {
            return Err(NcliError::invalid_state(format!(
                "locks are already active on session '{}'",
                session.name
            )));
        }
        if !session.phase.accepts_user_input() {
            return Err(NcliError::invalid_state(format!(
                "session '{}' is not ready for get-locks",
                session.name
            )));
        }
        let timeout = Duration::from_secs(lock_timeout.map_or(session.prefs.lock_timeout_secs, u64::from));
        let retry = Duration::from_secs(retry.map_or(session.prefs.lock_retry_secs, u64::from));
        let cleanup = cleanup.unwrap_or(session.prefs.lock_cleanup);
        let caps = session.capabilities.clone();
        session.locks.setup(&caps, timeout, retry, cleanup, now);
        session.last_lock_result = None;

        self.set_mode(id, CommandMode::AutoLock);
        self.advance_locks(id, true);
        Ok(())
    }

    pub(super) fn cmd_release_locks(&mut self) -> Result<()> {
        let id = self.current;
        let now = self.clock.now();
        let session = self.session_mut(id)?;
        if !session.locks.is_active() {
            return Err(NcliError::invalid_state(format!(
                "no locks are active on session '{}'",
                session.name
            )));
        }
        if !session.locks.begin_release(now) {
            info!("No locks to release");
            session.locks.clear();
            return Ok(());
        }
        self.set_mode(id, CommandMode::AutoUnlock);
        self.advance_release(id);
        Ok(())
    }

    pub(super) fn set_lock_result(&mut self, id: SessionId, outcome: LockOutcome) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_lock_result = Some(outcome);
        }
    }

    /// Sends the next `<lock>` or finishes the acquire sequence.
    pub(super) fn advance_locks(&mut self, id: SessionId, first: bool) {
        let now = self.clock.now();
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match session.locks.next_acquire(first, now) {
            AcquireStep::Send(ds) => {
                if let Err(e) = self.send_lock_op(id, "lock", ds, CommandMode::AutoLock) {
                    error!("Error: <lock> for {ds} not sent: {e}");
                    self.set_lock_result(id, LockOutcome::Failed);
                    self.locks_cleanup(id);
                }
            }
            AcquireStep::Waiting => {}
            AcquireStep::Done => {
                if session.locks.all_acquired() {
                    info!(session = %session.name, "get-locks finished OK");
                    session.last_lock_result = Some(LockOutcome::Acquired);
                    self.set_mode(id, CommandMode::Normal);
                } else {
                    error!(session = %session.name, "get-locks failed, starting cleanup");
                    session.last_lock_result = Some(LockOutcome::Failed);
                    self.locks_cleanup(id);
                }
            }
            AcquireStep::Fatal(ds) => {
                error!(session = %session.name, "get-locks failed on {ds}, starting cleanup");
                session.last_lock_result = Some(LockOutcome::Failed);
                self.locks_cleanup(id);
            }
            AcquireStep::TimedOut => {
                error!(session = %session.name, "get-locks timed out, starting cleanup");
                session.last_lock_result = Some(LockOutcome::TimedOut);
                self.locks_cleanup(id);
            }
        }
    }

    fn send_lock_op(
        &mut self,
        id: SessionId,
        op: &str,
        ds: Datastore,
        mode: CommandMode,
    ) -> Result<MessageId> {
        let message_id = self.send_request(id, &target_request(op, ds), mode, RequestOrigin::Automatic)?;
        let now = self.clock.now();
        if let Some(session) = self.sessions.get_mut(&id) {
            session.locks.mark_sent(ds, op == "lock", now);
        }
        Ok(message_id)
    }

    /// Candidate lock failed hard; its pending changes are dropped before
    /// the sequence continues.
    pub(super) fn send_discard_changes(&mut self, id: SessionId) -> Result<()> {
        self.send_request(
            id,
            &Node::new("discard-changes"),
            CommandMode::AutoDiscard,
            RequestOrigin::Automatic,
        )?;
        Ok(())
    }

    /// Releases whatever was acquired. With cleanup off the lock table is
    /// emptied without sending `<unlock>`.
    pub(super) fn locks_cleanup(&mut self, id: SessionId) {
        let now = self.clock.now();
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.locks.cleanup_enabled() {
            // held locks stay on the server; only the local table goes
            session.locks.reset();
            self.set_mode(id, CommandMode::Normal);
        } else if session.locks.begin_release(now) {
            self.set_mode(id, CommandMode::AutoUnlock);
            self.advance_release(id);
        } else {
            session.locks.clear();
            self.set_mode(id, CommandMode::Normal);
        }
    }

    /// Sends the next `<unlock>` or ends the release sequence.
    pub(super) fn advance_release(&mut self, id: SessionId) {
        loop {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            let Some(ds) = session.locks.next_release() else {
                info!(session = %session.name, "release-locks finished");
                session.locks.clear();
                self.set_mode(id, CommandMode::Normal);
                return;
            };
            match self.send_lock_op(id, "unlock", ds, CommandMode::AutoUnlock) {
                Ok(_) => return,
                Err(e) => {
                    warn!("<unlock> for {ds} not sent: {e}");
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.locks.mark_sent(ds, false, self.clock.now());
                        session.locks.on_unlock_reply(false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_request_shape() {
        let node = target_request("unlock", Datastore::Candidate);
        assert_eq!(node.name, "unlock");
        assert!(node.find_path(&["target", "candidate"]).is_some());
    }
}
