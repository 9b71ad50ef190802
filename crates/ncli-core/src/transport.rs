//! Collaborator contracts: transport, clock and line sources.
//!
//! The core never performs network I/O. It hands request documents to a
//! `Transport` and later receives `TransportEvent`s from it, polled by the
//! event loop. Time comes from a `Clock` so timeouts can be driven by tests.

use crate::document::Node;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Identifies one logical session inside the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request identifier assigned by the transport.
pub type MessageId = u32;

/// Parameters of a `connect` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Well-known capability URIs.
pub mod capability {
    pub const BASE: &str = "urn:ietf:params:netconf:base:1.0";
    pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
    pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
    pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
    pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
    pub const CONFIG_CHANGE: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications";
}

/// A module advertised by the server in its hello message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub revision: Option<String>,
}

impl ModuleRef {
    pub fn new(name: &str, revision: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            revision: revision.map(str::to_string),
        }
    }
}

/// Capabilities and modules announced by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub uris: BTreeSet<String>,
    pub modules: Vec<ModuleRef>,
}

impl Capabilities {
    pub fn with_uri(mut self, uri: &str) -> Self {
        self.uris.insert(uri.to_string());
        self
    }

    pub fn with_module(mut self, name: &str, revision: Option<&str>) -> Self {
        self.modules.push(ModuleRef::new(name, revision));
        self
    }

    pub fn has(&self, uri: &str) -> bool {
        self.uris.contains(uri)
    }

    pub fn has_candidate(&self) -> bool {
        self.has(capability::CANDIDATE)
    }

    pub fn has_startup(&self) -> bool {
        self.has(capability::STARTUP)
    }

    pub fn has_writable_running(&self) -> bool {
        self.has(capability::WRITABLE_RUNNING)
    }

    pub fn has_notifications(&self) -> bool {
        self.has(capability::NOTIFICATION)
    }

    pub fn has_config_change(&self) -> bool {
        self.has(capability::CONFIG_CHANGE)
            || self.modules.iter().any(|m| m.name == "ietf-netconf-notifications")
    }
}

/// Asynchronous event delivered by the transport collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection was accepted; the hello exchange is under way
    Accepted,
    /// The peer's hello arrived and our own hello drained
    HelloComplete { capabilities: Capabilities },
    /// Reply for an outstanding request, or a transport failure for it
    Reply {
        message_id: MessageId,
        result: std::result::Result<Node, String>,
    },
    Notification(Node),
    /// The peer dropped the connection
    Closed { reason: String },
}

/// Transport/protocol collaborator.
pub trait Transport: Send {
    /// Starts connecting a session. Progress arrives as events.
    fn connect(&mut self, session: SessionId, params: &ConnectParams) -> Result<()>;

    /// Sends one request document and returns its message id.
    fn send_request(&mut self, session: SessionId, request: &Node) -> Result<MessageId>;

    /// Drops a session's transport without waiting for the peer.
    fn disconnect(&mut self, session: SessionId);

    /// Returns the next pending event, if any.
    fn poll_event(&mut self) -> Option<(SessionId, TransportEvent)>;
}

/// Time source used for every deadline in the core.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Where a line of input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LineOrigin {
    User,
    Script,
    TestEngine,
}

/// Supplier of interactive input lines.
pub trait LineSource {
    /// Returns the next line, or `None` at end of input.
    fn next_line(&mut self, prompt: &str) -> Option<String>;
}

/// Line source backed by a fixed list, used by batch runs and tests.
#[derive(Debug, Clone, Default)]
pub struct VecLineSource {
    lines: VecDeque<String>,
}

impl VecLineSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineSource for VecLineSource {
    fn next_line(&mut self, _prompt: &str) -> Option<String> {
        self.lines.pop_front()
    }
}
