//! Request/reply correlation and reply classification.

use crate::document::Node;
use crate::session::CommandMode;
use crate::transport::{LineOrigin, MessageId, SessionId};
use std::collections::BTreeMap;
use std::time::Instant;

/// What caused a request to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// A command line from the user, a script or the test engine
    Command(LineOrigin),
    /// An automatic sequence (locks, autoload, autoconfig, ...)
    Automatic,
}

/// An outstanding request. The owning session and the command mode are
/// captured at send time; reply handling uses these, never the current
/// session pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightRequest {
    pub message_id: MessageId,
    pub session: SessionId,
    pub mode: CommandMode,
    pub origin: RequestOrigin,
    pub rpc_name: String,
    pub sent_at: Instant,
}

/// Tracks outstanding requests by message id.
#[derive(Debug, Default)]
pub struct Correlator {
    in_flight: BTreeMap<MessageId, InFlightRequest>,
}

impl Correlator {
    pub fn register(&mut self, request: InFlightRequest) {
        self.in_flight.insert(request.message_id, request);
    }

    /// Removes and returns the request a reply belongs to.
    pub fn take(&mut self, message_id: MessageId) -> Option<InFlightRequest> {
        self.in_flight.remove(&message_id)
    }

    pub fn get(&self, message_id: MessageId) -> Option<&InFlightRequest> {
        self.in_flight.get(&message_id)
    }

    pub fn pending_for(&self, session: SessionId) -> Option<&InFlightRequest> {
        self.in_flight.values().find(|r| r.session == session)
    }

    /// True while a request sent for a command line is outstanding.
    pub fn has_command_pending(&self) -> bool {
        self.in_flight
            .values()
            .any(|r| matches!(r.origin, RequestOrigin::Command(_)))
    }

    /// Forgets every request of a session that went away.
    pub fn drop_session(&mut self, session: SessionId) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, r| r.session != session);
        before - self.in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Reply classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReplyKind {
    Ok,
    Data,
    Error,
}

/// One `<rpc-error>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcError {
    pub tag: String,
    pub app_tag: Option<String>,
    pub message: Option<String>,
    /// Children of `<error-info>`
    pub info: Vec<Node>,
}

/// A reply with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub errors: Vec<RpcError>,
    pub document: Node,
}

/// Error tag used for transport failures reported in place of a reply.
pub const TRANSPORT_ERROR_TAG: &str = "operation-failed";

impl Reply {
    /// Classifies a reply document: any `<rpc-error>` makes it an error,
    /// an `<ok/>` makes it OK, anything else is data.
    pub fn classify(document: Node) -> Self {
        let errors: Vec<RpcError> = document
            .children_named("rpc-error")
            .map(|e| RpcError {
                tag: e
                    .child("error-tag")
                    .and_then(Node::text)
                    .unwrap_or(TRANSPORT_ERROR_TAG)
                    .to_string(),
                app_tag: e.child("error-app-tag").and_then(Node::text).map(str::to_string),
                message: e.child("error-message").and_then(Node::text).map(str::to_string),
                info: e
                    .child("error-info")
                    .map(|i| i.children.clone())
                    .unwrap_or_default(),
            })
            .collect();

        let kind = if !errors.is_empty() {
            ReplyKind::Error
        } else if document.child("ok").is_some() {
            ReplyKind::Ok
        } else {
            ReplyKind::Data
        };
        Self {
            kind,
            errors,
            document,
        }
    }

    /// Builds an error reply for a transport failure.
    pub fn transport_error(message: &str) -> Self {
        let document = Node::new("rpc-reply").with_child(
            Node::new("rpc-error")
                .with_child(Node::leaf("error-type", "transport"))
                .with_child(Node::leaf("error-tag", TRANSPORT_ERROR_TAG))
                .with_child(Node::leaf("error-message", message)),
        );
        Self::classify(document)
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReplyKind::Error
    }

    /// Primary error tag.
    pub fn error_tag(&self) -> Option<&str> {
        self.errors.first().map(|e| e.tag.as_str())
    }

    /// Primary error message, or the tag when there is none.
    pub fn error_summary(&self) -> String {
        match self.errors.first() {
            Some(RpcError {
                message: Some(m),
                tag,
                ..
            }) => format!("{tag}: {m}"),
            Some(e) => e.tag.clone(),
            None => String::new(),
        }
    }

    /// Payload for result assignment: the `data` child, else the single
    /// child, else the whole reply.
    pub fn payload(&self) -> Node {
        if let Some(data) = self.document.child("data") {
            return data.clone();
        }
        match self.document.children.as_slice() {
            [only] => only.clone(),
            _ => self.document.clone(),
        }
    }
}
