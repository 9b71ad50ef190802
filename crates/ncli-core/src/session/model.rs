use super::prefs::SessionPrefs;
use super::state::{CommandMode, ConnectionState, SessionPhase};
use crate::document::Node;
use crate::lock::LockTable;
use crate::transport::{Capabilities, ConnectParams, ModuleRef, SessionId};
use crate::vars::VarValue;
use std::collections::{BTreeMap, VecDeque};

/// Progress of the one-time post-connect sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostConnect {
    /// Capability report printed
    pub reported: bool,
    pub autoload_done: bool,
    pub autoconfig_done: bool,
    pub autonotif_done: bool,
}

/// Schema retrieval for modules the server has but the client lacks.
#[derive(Debug, Clone, Default)]
pub struct AutoloadState {
    pub queue: VecDeque<ModuleRef>,
    pub current: Option<ModuleRef>,
    /// Retrieved module sources, by module name
    pub retrieved: BTreeMap<String, String>,
    pub failed: Vec<ModuleRef>,
}

/// Where an auto-test iteration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutotestStep {
    WaitEdit,
    WaitSave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutotestState {
    /// Path of the leaf that receives random values
    pub target: Vec<String>,
    pub iterations: u32,
    pub cur_iteration: u32,
    pub step: AutotestStep,
}

/// Result of the last get-locks sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Failed,
    TimedOut,
}

/// One logical connection to a server.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub phase: SessionPhase,
    pub prefs: SessionPrefs,
    pub locks: LockTable,
    pub connect_params: Option<ConnectParams>,
    pub capabilities: Capabilities,
    /// Mirror of the server's running configuration
    pub shadow_config: Option<Node>,
    pub config_dirty: bool,
    /// The server sends config-change notifications
    pub config_update_supported: bool,
    pub notifications: VecDeque<Node>,
    pub post_connect: PostConnect,
    pub autoload: AutoloadState,
    pub autotest: Option<AutotestState>,
    pub session_vars: BTreeMap<String, VarValue>,
    pub last_lock_result: Option<LockOutcome>,
}

impl Session {
    pub fn new(id: SessionId, name: impl Into<String>, prefs: SessionPrefs) -> Self {
        Self {
            id,
            name: name.into(),
            phase: SessionPhase::Init,
            prefs,
            locks: LockTable::default(),
            connect_params: None,
            capabilities: Capabilities::default(),
            shadow_config: None,
            config_dirty: false,
            config_update_supported: false,
            notifications: VecDeque::new(),
            post_connect: PostConnect::default(),
            autoload: AutoloadState::default(),
            autotest: None,
            session_vars: BTreeMap::new(),
            last_lock_result: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.phase.connection_state()
    }

    pub fn mode(&self) -> Option<CommandMode> {
        self.phase.mode()
    }

    /// Drops all per-connection state and returns to IDLE. Preferences,
    /// session variables and the shadow config survive.
    pub fn reset_connection(&mut self) {
        self.phase = SessionPhase::Idle;
        self.locks.reset();
        self.capabilities = Capabilities::default();
        self.config_update_supported = false;
        self.post_connect = PostConnect::default();
        self.autoload = AutoloadState::default();
        self.autotest = None;
    }

    /// Short status line for `session list`.
    pub fn summary(&self) -> String {
        let target = self
            .connect_params
            .as_ref()
            .map(|p| format!("{}:{}", p.host, p.port))
            .unwrap_or_else(|| "-".to_string());
        let mode = self
            .mode()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} [{}] {} {}",
            self.name,
            target,
            self.connection_state(),
            mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_in_init() {
        let s = Session::new(SessionId(1), "lab", SessionPrefs::default());
        assert_eq!(s.connection_state(), ConnectionState::Init);
        assert!(s.mode().is_none());
    }

    #[test]
    fn test_reset_connection_keeps_prefs_and_vars() {
        let mut prefs = SessionPrefs::default();
        prefs.echo_replies = false;
        let mut s = Session::new(SessionId(1), "lab", prefs);
        s.phase = SessionPhase::connected();
        s.session_vars
            .insert("x".into(), VarValue::Text("1".into()));
        s.post_connect.reported = true;
        s.reset_connection();
        assert_eq!(s.connection_state(), ConnectionState::Idle);
        assert!(!s.prefs.echo_replies);
        assert!(s.session_vars.contains_key("x"));
        assert!(!s.post_connect.reported);
    }

    #[test]
    fn test_summary_mentions_state() {
        let s = Session::new(SessionId(3), "edge", SessionPrefs::default());
        assert!(s.summary().contains("INIT"));
        assert!(s.summary().starts_with("edge"));
    }
}
