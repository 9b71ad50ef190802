//! Tracing subscriber setup shared by both binaries.

use crate::session_layer::{DEFAULT_CAPACITY, SessionEventLayer, SessionLog};
use ncli_core::error::{NcliError, Result};
use ncli_infrastructure::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding a filter directive; it overrides `level`.
pub const LOG_ENV: &str = "NCLI_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    /// Size of the in-memory session event buffer
    pub session_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            session_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            json: settings.json,
            ..Self::default()
        }
    }
}

impl LogConfig {
    /// `NCLI_LOG` when set and valid, the configured level otherwise.
    pub fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| NcliError::config(format!("invalid log level '{}': {e}", self.level)))
    }
}

/// Installs the global subscriber: env filter, a compact or JSON fmt layer
/// on stderr, and the session event layer. Returns the handle to the
/// session event buffer.
pub fn init_tracing(config: &LogConfig) -> Result<SessionLog> {
    let log = SessionLog::new(config.session_capacity);
    let (compact, json) = if config.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(fmt::layer().compact().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(config.filter()?)
        .with(compact)
        .with(json)
        .with(SessionEventLayer::new(log.clone()))
        .try_init()
        .map_err(|e| NcliError::internal(format!("tracing already initialised: {e}")))?;
    Ok(log)
}
