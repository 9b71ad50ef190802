//! Where ncli keeps its files.
//!
//! ```text
//! ~/.config/ncli/              # config directory
//! ├── config.toml              # [defaults] session preferences, [logging]
//! ├── sessions.toml            # saved session configurations
//! ├── test-suites.toml         # recorded and hand-written suites
//! └── history.txt              # REPL history
//!
//! ~/.local/share/ncli/         # data directory
//! └── recordtest/              # step snapshots, {suite}_{test}_{step}_{record|run}.xml
//! ```

use ncli_core::error::NcliError;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "ncli";

#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for NcliError {
    fn from(e: PathError) -> Self {
        NcliError::config(e.to_string())
    }
}

/// Resolved config and data directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcliPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl NcliPaths {
    /// Platform directories (XDG on Linux).
    pub fn resolve() -> Result<Self, PathError> {
        let config_dir = dirs::config_dir().ok_or(PathError::HomeDirNotFound)?;
        let data_dir = dirs::data_dir().ok_or(PathError::HomeDirNotFound)?;
        Ok(Self {
            config_dir: config_dir.join(APP_DIR),
            data_dir: data_dir.join(APP_DIR),
        })
    }

    /// Everything below one directory, for tests and `--home` overrides.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.config_dir.join("sessions.toml")
    }

    pub fn suites_file(&self) -> PathBuf {
        self.config_dir.join("test-suites.toml")
    }

    pub fn history_file(&self) -> PathBuf {
        self.config_dir.join("history.txt")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("recordtest")
    }
}
