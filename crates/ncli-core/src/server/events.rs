//! Events produced for display and logging collaborators.

use crate::rpc::ReplyKind;
use crate::session::CommandMode;
use crate::test_run::SuiteReport;
use crate::transport::MessageId;
use serde::Serialize;

/// Something the front end may want to show. Collected by the server
/// context and handed out through `ServerContext::drain_events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Connected {
        session: String,
        capabilities: usize,
    },
    Disconnected {
        session: String,
        reason: String,
    },
    ModeChanged {
        session: String,
        mode: CommandMode,
    },
    /// An echoed reply, already rendered in the session's display mode
    Reply {
        session: String,
        message_id: MessageId,
        #[serde(serialize_with = "serialize_kind")]
        kind: ReplyKind,
        text: String,
    },
    Notification {
        session: String,
        text: String,
    },
    TestReport(SuiteReport),
    Info(String),
    Warning(String),
}

fn serialize_kind<S: serde::Serializer>(kind: &ReplyKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&kind.to_string())
}

impl ClientEvent {
    /// Session the event belongs to, if any.
    pub fn session(&self) -> Option<&str> {
        match self {
            ClientEvent::Connected { session, .. }
            | ClientEvent::Disconnected { session, .. }
            | ClientEvent::ModeChanged { session, .. }
            | ClientEvent::Reply { session, .. }
            | ClientEvent::Notification { session, .. } => Some(session),
            _ => None,
        }
    }
}
