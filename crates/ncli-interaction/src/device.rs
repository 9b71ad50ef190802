//! The simulated NETCONF server behind `LoopbackTransport`.

use crate::datastore::{merge, wrapped};
use chrono::Utc;
use ncli_core::document::Node;
use ncli_core::lock::Datastore;
use ncli_core::notif::{CONFIG_CHANGE_EVENT, CONFIG_CHANGE_MODULE};
use ncli_core::transport::{Capabilities, SessionId, capability};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

/// Owner recorded for locks taken through `lock_externally`.
pub const EXTERNAL_OWNER: SessionId = SessionId(u32::MAX);

/// What the device advertises and starts with.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub capabilities: Capabilities,
    pub config: Node,
    /// Module sources served by `<get-schema>`
    pub schemas: BTreeMap<String, String>,
}

impl DeviceProfile {
    /// Candidate, startup and notifications, like most routers.
    pub fn router() -> Self {
        Self {
            capabilities: Capabilities::default()
                .with_uri(capability::BASE)
                .with_uri(capability::CANDIDATE)
                .with_uri(capability::STARTUP)
                .with_uri(capability::NOTIFICATION)
                .with_module(CONFIG_CHANGE_MODULE, Some("2012-02-06"))
                .with_module("acme-system", Some("2024-01-01")),
            config: Node::new("config").with_child(
                Node::new("system")
                    .with_child(Node::leaf("hostname", "loopback"))
                    .with_child(Node::leaf("location", "lab")),
            ),
            schemas: BTreeMap::from([(
                "acme-system".to_string(),
                "module acme-system { namespace \"urn:acme:system\"; prefix sys; }".to_string(),
            )]),
        }
    }

    /// Writable running only, no startup and no notifications.
    pub fn switch() -> Self {
        Self {
            capabilities: Capabilities::default()
                .with_uri(capability::BASE)
                .with_uri(capability::WRITABLE_RUNNING),
            config: Node::new("config"),
            schemas: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: Node) -> Self {
        self.config = config;
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::router()
    }
}

/// An `<rpc-error>` produced by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub tag: &'static str,
    pub message: String,
    pub session_id: Option<SessionId>,
}

impl DeviceError {
    fn new(tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            tag,
            message: message.into(),
            session_id: None,
        }
    }

    fn to_node(&self) -> Node {
        let mut error = Node::new("rpc-error")
            .with_child(Node::leaf("error-type", "protocol"))
            .with_child(Node::leaf("error-tag", self.tag))
            .with_child(Node::leaf("error-severity", "error"))
            .with_child(Node::leaf("error-message", self.message.clone()));
        if let Some(owner) = self.session_id {
            error.push(Node::new("error-info").with_child(Node::leaf("session-id", owner.to_string())));
        }
        error
    }
}

type RpcResult = Result<Option<Node>, DeviceError>;

/// Device state shared by every session of one loopback transport.
#[derive(Debug)]
pub struct LoopbackDevice {
    profile: DeviceProfile,
    running: Node,
    candidate: Node,
    startup: Node,
    candidate_dirty: bool,
    locks: BTreeMap<Datastore, SessionId>,
    sessions: BTreeSet<SessionId>,
    subscribers: BTreeSet<SessionId>,
    /// Requests handled, by operation name
    handled: Vec<String>,
}

impl LoopbackDevice {
    pub fn new(profile: DeviceProfile) -> Self {
        let config = profile.config.clone();
        Self {
            running: config.clone(),
            candidate: config.clone(),
            startup: config,
            candidate_dirty: false,
            locks: BTreeMap::new(),
            sessions: BTreeSet::new(),
            subscribers: BTreeSet::new(),
            handled: Vec::new(),
            profile,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.profile.capabilities
    }

    pub fn open(&mut self, session: SessionId) {
        self.sessions.insert(session);
    }

    /// Ends a session and drops whatever it held.
    pub fn close(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        self.subscribers.remove(&session);
        self.locks.retain(|_, owner| *owner != session);
    }

    pub fn is_open(&self, session: SessionId) -> bool {
        self.sessions.contains(&session)
    }

    pub fn datastore(&self, ds: Datastore) -> &Node {
        match ds {
            Datastore::Running => &self.running,
            Datastore::Candidate => &self.candidate,
            Datastore::Startup => &self.startup,
        }
    }

    pub fn lock_owner(&self, ds: Datastore) -> Option<SessionId> {
        self.locks.get(&ds).copied()
    }

    pub fn lock_externally(&mut self, ds: Datastore) {
        self.locks.insert(ds, EXTERNAL_OWNER);
    }

    pub fn release_external(&mut self, ds: Datastore) {
        if self.locks.get(&ds) == Some(&EXTERNAL_OWNER) {
            self.locks.remove(&ds);
        }
    }

    /// Leaves uncommitted changes in the candidate, as another client would.
    pub fn dirty_candidate(&mut self) {
        self.candidate_dirty = true;
    }

    pub fn handled(&self) -> &[String] {
        &self.handled
    }

    pub fn subscribers(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Runs one request and builds the `<rpc-reply>`. The second value is
    /// true when the running configuration changed.
    pub fn handle(&mut self, session: SessionId, request: &Node) -> (Node, bool) {
        self.handled.push(request.name.clone());
        let before = self.running.clone();
        let body = match self.dispatch(session, request) {
            Ok(Some(data)) => data,
            Ok(None) => Node::new("ok"),
            Err(e) => {
                debug!(session = %session, "{} -> {}", request.name, e.tag);
                e.to_node()
            }
        };
        let changed = self.running != before;
        (Node::new("rpc-reply").with_child(body), changed)
    }

    /// `<netconf-config-change>` for the running datastore.
    pub fn config_change(&self, by: SessionId) -> Node {
        Node::new("notification")
            .with_child(Node::leaf("eventTime", Utc::now().to_rfc3339()))
            .with_child(
                Node::new(CONFIG_CHANGE_EVENT)
                    .with_child(
                        Node::new("changed-by").with_child(Node::leaf("session-id", by.to_string())),
                    )
                    .with_child(Node::leaf("datastore", "running")),
            )
    }

    fn dispatch(&mut self, session: SessionId, request: &Node) -> RpcResult {
        match request.name.as_str() {
            "get" => Ok(Some(self.state_data())),
            "get-config" => {
                let ds = self.datastore_param(request, "source")?;
                Ok(Some(wrapped("data", self.datastore(ds))))
            }
            "edit-config" => self.edit_config(session, request),
            "copy-config" => self.copy_config(session, request),
            "delete-config" => {
                let ds = self.datastore_param(request, "target")?;
                if ds != Datastore::Startup {
                    return Err(DeviceError::new("invalid-value", format!("cannot delete {ds}")));
                }
                self.check_writable(session, ds)?;
                self.startup = Node::new("config");
                Ok(None)
            }
            "lock" => self.lock(session, request),
            "unlock" => self.unlock(session, request),
            "commit" => {
                self.require(capability::CANDIDATE)?;
                self.check_writable(session, Datastore::Running)?;
                self.running = self.candidate.clone();
                self.candidate_dirty = false;
                Ok(None)
            }
            "discard-changes" => {
                self.require(capability::CANDIDATE)?;
                self.candidate = self.running.clone();
                self.candidate_dirty = false;
                Ok(None)
            }
            "validate" => {
                self.datastore_param(request, "source")?;
                Ok(None)
            }
            "get-schema" => {
                let identifier = request
                    .child("identifier")
                    .and_then(Node::text)
                    .ok_or_else(|| DeviceError::new("missing-element", "identifier"))?;
                self.profile
                    .schemas
                    .get(identifier)
                    .map(|source| Some(Node::leaf("data", source.clone())))
                    .ok_or_else(|| {
                        DeviceError::new("invalid-value", format!("no schema for '{identifier}'"))
                    })
            }
            "create-subscription" => {
                self.require(capability::NOTIFICATION)?;
                if !self.subscribers.insert(session) {
                    return Err(DeviceError::new("in-use", "subscription already active"));
                }
                Ok(None)
            }
            "close-session" => {
                self.locks.retain(|_, owner| *owner != session);
                self.subscribers.remove(&session);
                Ok(None)
            }
            "kill-session" => {
                let target = request
                    .child("session-id")
                    .and_then(Node::text)
                    .and_then(|t| t.parse::<u32>().ok())
                    .map(SessionId)
                    .ok_or_else(|| DeviceError::new("missing-element", "session-id"))?;
                if target == session {
                    return Err(DeviceError::new("invalid-value", "cannot kill own session"));
                }
                self.close(target);
                Ok(None)
            }
            other => Err(DeviceError::new(
                "operation-not-supported",
                format!("unknown operation '{other}'"),
            )),
        }
    }

    fn state_data(&self) -> Node {
        let mut sessions = Node::new("sessions");
        for id in &self.sessions {
            sessions.push(Node::leaf("session-id", id.to_string()));
        }
        let mut data = wrapped("data", &self.running);
        data.push(Node::new("netconf-state").with_child(sessions));
        data
    }

    fn require(&self, uri: &str) -> Result<(), DeviceError> {
        if self.profile.capabilities.has(uri) {
            Ok(())
        } else {
            Err(DeviceError::new("operation-not-supported", format!("{uri} not supported")))
        }
    }

    fn datastore_param(&self, request: &Node, param: &str) -> Result<Datastore, DeviceError> {
        let name = request
            .child(param)
            .and_then(|p| p.children.first())
            .map(|c| c.name.as_str())
            .ok_or_else(|| DeviceError::new("missing-element", param))?;
        let ds = Datastore::from_str(name)
            .map_err(|_| DeviceError::new("invalid-value", format!("unknown datastore '{name}'")))?;
        let supported = match ds {
            Datastore::Running => true,
            Datastore::Candidate => self.profile.capabilities.has_candidate(),
            Datastore::Startup => self.profile.capabilities.has_startup(),
        };
        if supported {
            Ok(ds)
        } else {
            Err(DeviceError::new("invalid-value", format!("{ds} is not supported")))
        }
    }

    /// A datastore locked by someone else cannot be written.
    fn check_writable(&self, session: SessionId, ds: Datastore) -> Result<(), DeviceError> {
        match self.locks.get(&ds) {
            Some(owner) if *owner != session => Err(DeviceError {
                session_id: Some(*owner),
                ..DeviceError::new("in-use", format!("{ds} is locked by session {owner}"))
            }),
            _ => Ok(()),
        }
    }

    fn edit_config(&mut self, session: SessionId, request: &Node) -> RpcResult {
        let ds = self.datastore_param(request, "target")?;
        if ds == Datastore::Running && !self.profile.capabilities.has_writable_running() {
            return Err(DeviceError::new("operation-not-supported", "running is not writable"));
        }
        self.check_writable(session, ds)?;
        let patch = request
            .child("config")
            .ok_or_else(|| DeviceError::new("missing-element", "config"))?;
        match ds {
            Datastore::Running => merge(&mut self.running, patch),
            Datastore::Candidate => {
                merge(&mut self.candidate, patch);
                self.candidate_dirty = true;
            }
            Datastore::Startup => merge(&mut self.startup, patch),
        }
        Ok(None)
    }

    fn copy_config(&mut self, session: SessionId, request: &Node) -> RpcResult {
        let target = self.datastore_param(request, "target")?;
        self.check_writable(session, target)?;
        let inline = request.child("source").and_then(|s| s.child("config"));
        let content = match inline {
            Some(config) => wrapped("config", config),
            None => self.datastore(self.datastore_param(request, "source")?).clone(),
        };
        match target {
            Datastore::Running => self.running = content,
            Datastore::Candidate => {
                self.candidate = content;
                self.candidate_dirty = true;
            }
            Datastore::Startup => self.startup = content,
        }
        Ok(None)
    }

    fn lock(&mut self, session: SessionId, request: &Node) -> RpcResult {
        let ds = self.datastore_param(request, "target")?;
        if let Some(owner) = self.locks.get(&ds) {
            return Err(DeviceError {
                session_id: Some(*owner),
                ..DeviceError::new("lock-denied", format!("{ds} is already locked"))
            });
        }
        if ds == Datastore::Candidate && self.candidate_dirty {
            return Err(DeviceError::new(
                "resource-denied",
                "candidate has uncommitted changes",
            ));
        }
        self.locks.insert(ds, session);
        Ok(None)
    }

    fn unlock(&mut self, session: SessionId, request: &Node) -> RpcResult {
        let ds = self.datastore_param(request, "target")?;
        match self.locks.get(&ds) {
            Some(owner) if *owner == session => {
                self.locks.remove(&ds);
                Ok(None)
            }
            _ => Err(DeviceError::new(
                "operation-failed",
                format!("{ds} is not locked by this session"),
            )),
        }
    }
}
