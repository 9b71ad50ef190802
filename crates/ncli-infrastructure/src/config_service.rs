//! `config.toml`: process-wide session defaults and logging settings.

use crate::paths::NcliPaths;
use crate::storage::AtomicTomlFile;
use ncli_core::error::Result;
use ncli_core::session::SessionPrefs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `NCLI_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NcliConfig {
    pub defaults: SessionPrefs,
    pub logging: LoggingSettings,
}

/// Loads and stores `config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigService {
    file: AtomicTomlFile<NcliConfig>,
}

impl ConfigService {
    pub fn new(paths: &NcliPaths) -> Self {
        Self::with_path(paths.config_file())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }

    /// Current settings; built-in defaults when the file does not exist.
    pub fn load(&self) -> Result<NcliConfig> {
        Ok(self.file.load_or_default()?)
    }

    pub fn save(&self, config: &NcliConfig) -> Result<()> {
        self.file.save(config)?;
        info!(path = %self.file.path().display(), "saved configuration");
        Ok(())
    }

    /// Replaces the `[defaults]` table, keeping the rest of the file.
    pub fn save_defaults(&self, defaults: &SessionPrefs) -> Result<()> {
        self.file.update(NcliConfig::default(), |config| {
            config.defaults = defaults.clone();
            Ok(())
        })?;
        info!(path = %self.file.path().display(), "saved session defaults");
        Ok(())
    }
}
