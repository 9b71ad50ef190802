//! Saved connection targets in `sessions.toml`.

use crate::paths::NcliPaths;
use crate::storage::AtomicTomlFile;
use ncli_core::error::{NcliError, Result};
use ncli_core::transport::ConnectParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_NETCONF_PORT: u16 = 830;

fn default_port() -> u16 {
    DEFAULT_NETCONF_PORT
}

/// A named connection target. Passwords are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl SessionConfig {
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: None,
        }
    }

    /// The `connect` command line for this target.
    pub fn connect_line(&self) -> String {
        let mut line = format!("connect host={} port={}", self.host, self.port);
        if let Some(user) = &self.user {
            line.push_str(&format!(" user={user}"));
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SessionsFile {
    #[serde(default)]
    sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone)]
pub struct SessionConfigRepository {
    file: AtomicTomlFile<SessionsFile>,
}

impl SessionConfigRepository {
    pub fn new(paths: &NcliPaths) -> Self {
        Self::with_path(paths.sessions_file())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }

    pub fn list(&self) -> Result<Vec<SessionConfig>> {
        Ok(self.file.load_or_default()?.sessions)
    }

    pub fn get(&self, name: &str) -> Result<SessionConfig> {
        self.list()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| NcliError::not_found("session config", name))
    }

    /// Inserts or replaces by name.
    pub fn upsert(&self, config: SessionConfig) -> Result<()> {
        self.file.update(SessionsFile::default(), |file| {
            match file.sessions.iter_mut().find(|s| s.name == config.name) {
                Some(existing) => *existing = config,
                None => file.sessions.push(config),
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Returns false when no entry had that name.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let removed = self.file.update(SessionsFile::default(), |file| {
            let before = file.sessions.len();
            file.sessions.retain(|s| s.name != name);
            Ok(file.sessions.len() != before)
        })?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lab() -> SessionConfig {
        SessionConfig {
            name: "lab".into(),
            host: "lab.example.net".into(),
            port: 830,
            user: Some("admin".into()),
        }
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let dir = TempDir::new().unwrap();
        let repo = SessionConfigRepository::with_path(dir.path().join("sessions.toml"));
        repo.upsert(lab()).unwrap();
        repo.upsert(SessionConfig {
            port: 2022,
            ..lab()
        })
        .unwrap();

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(repo.get("lab").unwrap().port, 2022);
    }

    #[test]
    fn test_port_defaults_to_netconf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.toml");
        std::fs::write(&path, "[[sessions]]\nname = \"r1\"\nhost = \"10.0.0.1\"\n").unwrap();
        let repo = SessionConfigRepository::with_path(path);
        let r1 = repo.get("r1").unwrap();
        assert_eq!(r1.port, DEFAULT_NETCONF_PORT);
        assert_eq!(r1.connect_line(), "connect host=10.0.0.1 port=830");
    }

    #[test]
    fn test_remove_and_missing_lookup() {
        let dir = TempDir::new().unwrap();
        let repo = SessionConfigRepository::with_path(dir.path().join("sessions.toml"));
        repo.upsert(lab()).unwrap();
        assert!(repo.remove("lab").unwrap());
        assert!(!repo.remove("lab").unwrap());
        assert!(repo.get("lab").unwrap_err().is_not_found());
    }
}
