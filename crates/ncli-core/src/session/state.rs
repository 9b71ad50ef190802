//! Connection state and command mode.
//!
//! The two dimensions are held in one `SessionPhase` value. A command mode
//! exists only while the session is connected, and an outstanding request
//! exists only inside a connected phase, so combinations such as
//! "AUTOLOCK while connecting" cannot be built.

use crate::transport::MessageId;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Flat view of the session's transport/protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Init,
    Idle,
    Connecting,
    HelloWait,
    ConnectedIdle,
    ConnectedWaitReply,
    CancelWait,
    CloseWait,
    ShuttingDown,
}

/// The automatic sequence currently driving request dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
pub enum CommandMode {
    #[default]
    #[strum(serialize = "NORMAL")]
    Normal,
    #[strum(serialize = "AUTOLOAD")]
    AutoLoad,
    #[strum(serialize = "AUTOLOCK")]
    AutoLock,
    #[strum(serialize = "AUTOUNLOCK")]
    AutoUnlock,
    #[strum(serialize = "AUTODISCARD")]
    AutoDiscard,
    #[strum(serialize = "AUTOCONFIG")]
    AutoConfig,
    #[strum(serialize = "AUTONOTIF")]
    AutoNotif,
    #[strum(serialize = "AUTOTEST")]
    AutoTest,
    #[strum(serialize = "CONFIG_APPLY")]
    ConfigApply,
    /// Commit sent; the final copy to startup follows its reply
    #[strum(serialize = "SAVE")]
    Save,
}

impl CommandMode {
    pub fn is_normal(self) -> bool {
        self == CommandMode::Normal
    }

    /// Modes owned by the lock coordinator.
    pub fn is_lock_mode(self) -> bool {
        matches!(
            self,
            CommandMode::AutoLock | CommandMode::AutoUnlock | CommandMode::AutoDiscard
        )
    }
}

/// Request the session is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiting {
    pub message_id: MessageId,
    pub sent_at: Instant,
}

/// Connected sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub mode: CommandMode,
    pub waiting: Option<Waiting>,
}

/// Combined connection state and command mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Init,
    Idle,
    Connecting { since: Instant },
    HelloWait { since: Instant },
    Connected(Connected),
    /// User interrupted a request; its reply will be dropped
    CancelWait { message_id: MessageId, since: Instant },
    /// `close-session` sent; the reply frees the session
    CloseWait { message_id: MessageId, since: Instant },
    ShuttingDown,
}

impl SessionPhase {
    pub fn connected() -> Self {
        SessionPhase::Connected(Connected {
            mode: CommandMode::Normal,
            waiting: None,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self {
            SessionPhase::Init => ConnectionState::Init,
            SessionPhase::Idle => ConnectionState::Idle,
            SessionPhase::Connecting { .. } => ConnectionState::Connecting,
            SessionPhase::HelloWait { .. } => ConnectionState::HelloWait,
            SessionPhase::Connected(Connected { waiting: None, .. }) => {
                ConnectionState::ConnectedIdle
            }
            SessionPhase::Connected(Connected { waiting: Some(_), .. }) => {
                ConnectionState::ConnectedWaitReply
            }
            SessionPhase::CancelWait { .. } => ConnectionState::CancelWait,
            SessionPhase::CloseWait { .. } => ConnectionState::CloseWait,
            SessionPhase::ShuttingDown => ConnectionState::ShuttingDown,
        }
    }

    /// Command mode, present only while connected.
    pub fn mode(&self) -> Option<CommandMode> {
        match self {
            SessionPhase::Connected(c) => Some(c.mode),
            _ => None,
        }
    }

    /// The outstanding request, if the session is blocked on one.
    pub fn waiting(&self) -> Option<Waiting> {
        match self {
            SessionPhase::Connected(c) => c.waiting,
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionPhase::Connected(_))
    }

    /// Connected with nothing outstanding.
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionPhase::Connected(Connected { waiting: None, .. }))
    }

    /// Connected, nothing outstanding and no automatic sequence running.
    pub fn accepts_user_input(&self) -> bool {
        matches!(
            self,
            SessionPhase::Connected(Connected {
                waiting: None,
                mode: CommandMode::Normal
            })
        )
    }

    /// Sets the command mode. Returns false when not connected.
    pub fn set_mode(&mut self, mode: CommandMode) -> bool {
        match self {
            SessionPhase::Connected(c) => {
                c.mode = mode;
                true
            }
            _ => false,
        }
    }

    /// Marks a request outstanding. Returns false when not connected.
    pub fn set_waiting(&mut self, waiting: Option<Waiting>) -> bool {
        match self {
            SessionPhase::Connected(c) => {
                c.waiting = waiting;
                true
            }
            _ => false,
        }
    }

    /// Message id the session expects a reply for, in any waiting phase.
    pub fn expected_reply(&self) -> Option<MessageId> {
        match self {
            SessionPhase::Connected(Connected {
                waiting: Some(w), ..
            }) => Some(w.message_id),
            SessionPhase::CancelWait { message_id, .. }
            | SessionPhase::CloseWait { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_projection() {
        let mut phase = SessionPhase::connected();
        assert_eq!(phase.connection_state(), ConnectionState::ConnectedIdle);
        assert!(phase.accepts_user_input());

        phase.set_waiting(Some(Waiting {
            message_id: 7,
            sent_at: Instant::now(),
        }));
        assert_eq!(phase.connection_state(), ConnectionState::ConnectedWaitReply);
        assert_eq!(phase.expected_reply(), Some(7));
        assert!(!phase.accepts_user_input());
    }

    #[test]
    fn test_mode_only_while_connected() {
        let mut phase = SessionPhase::Idle;
        assert!(phase.mode().is_none());
        assert!(!phase.set_mode(CommandMode::AutoLock));

        let mut phase2 = SessionPhase::connected();
        assert!(phase2.set_mode(CommandMode::AutoLock));
        assert_eq!(phase2.mode(), Some(CommandMode::AutoLock));
        assert!(!phase2.accepts_user_input());
        phase = phase2;
        assert!(phase.is_connected());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ConnectionState::ConnectedWaitReply.to_string(), "CONNECTED_WAIT_REPLY");
        assert_eq!(CommandMode::AutoDiscard.to_string(), "AUTODISCARD");
        assert_eq!(CommandMode::Save.to_string(), "SAVE");
    }
}
