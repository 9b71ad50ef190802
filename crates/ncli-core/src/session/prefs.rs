//! Per-session preferences.
//!
//! The server context keeps the process defaults; each new session takes a
//! copy at creation. The same fields are exposed as `config` class
//! variables (`$$echo-replies`, `$$timeout`, ...).

use crate::document::DisplayMode;
use crate::error::{NcliError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Names of the config variables, in display order.
pub const CONFIG_VARS: &[&str] = &[
    "echo-replies",
    "echo-notifs",
    "timeout",
    "display-mode",
    "indent",
    "autoload",
    "autoconfig",
    "autonotif",
    "overwrite-filevars",
    "use-session-vars",
    "lock-timeout",
    "lock-retry-interval",
    "lock-cleanup",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPrefs {
    /// Echo replies in NORMAL mode
    pub echo_replies: bool,
    pub echo_notifs: bool,
    /// Reply timeout in seconds; 0 waits forever
    pub timeout_secs: u64,
    pub display_mode: DisplayMode,
    pub indent: usize,
    pub autoload: bool,
    pub autoconfig: bool,
    pub autonotif: bool,
    /// Allow `@file = ...` to replace an existing file
    pub overwrite_filevars: bool,
    pub use_session_vars: bool,
    pub lock_timeout_secs: u64,
    pub lock_retry_secs: u64,
    pub lock_cleanup: bool,
}

impl Default for SessionPrefs {
    fn default() -> Self {
        Self {
            echo_replies: true,
            echo_notifs: true,
            timeout_secs: 30,
            display_mode: DisplayMode::Plain,
            indent: 2,
            autoload: true,
            autoconfig: false,
            autonotif: false,
            overwrite_filevars: true,
            use_session_vars: false,
            lock_timeout_secs: 120,
            lock_retry_secs: 1,
            lock_cleanup: true,
        }
    }
}

impl SessionPrefs {
    pub fn is_config_var(name: &str) -> bool {
        CONFIG_VARS.contains(&name)
    }

    /// Reply timeout, `None` when disabled.
    pub fn reply_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Reads a config variable as text.
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "echo-replies" => self.echo_replies.to_string(),
            "echo-notifs" => self.echo_notifs.to_string(),
            "timeout" => self.timeout_secs.to_string(),
            "display-mode" => self.display_mode.to_string(),
            "indent" => self.indent.to_string(),
            "autoload" => self.autoload.to_string(),
            "autoconfig" => self.autoconfig.to_string(),
            "autonotif" => self.autonotif.to_string(),
            "overwrite-filevars" => self.overwrite_filevars.to_string(),
            "use-session-vars" => self.use_session_vars.to_string(),
            "lock-timeout" => self.lock_timeout_secs.to_string(),
            "lock-retry-interval" => self.lock_retry_secs.to_string(),
            "lock-cleanup" => self.lock_cleanup.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Sets a config variable from text. The value is checked before any
    /// field changes.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "echo-replies" => self.echo_replies = parse(name, value)?,
            "echo-notifs" => self.echo_notifs = parse(name, value)?,
            "timeout" => self.timeout_secs = parse(name, value)?,
            "display-mode" => self.display_mode = parse(name, value)?,
            "indent" => {
                let indent: usize = parse(name, value)?;
                if indent > 9 {
                    return Err(NcliError::config(format!(
                        "indent must be 0..9, got {indent}"
                    )));
                }
                self.indent = indent;
            }
            "autoload" => self.autoload = parse(name, value)?,
            "autoconfig" => self.autoconfig = parse(name, value)?,
            "autonotif" => self.autonotif = parse(name, value)?,
            "overwrite-filevars" => self.overwrite_filevars = parse(name, value)?,
            "use-session-vars" => self.use_session_vars = parse(name, value)?,
            "lock-timeout" => self.lock_timeout_secs = parse(name, value)?,
            "lock-retry-interval" => self.lock_retry_secs = parse(name, value)?,
            "lock-cleanup" => self.lock_cleanup = parse(name, value)?,
            _ => return Err(NcliError::not_found("config variable", name)),
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| NcliError::config(format!("invalid value '{value}' for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_config_var_readable() {
        let prefs = SessionPrefs::default();
        for name in CONFIG_VARS {
            assert!(prefs.get(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_set_by_name() {
        let mut prefs = SessionPrefs::default();
        prefs.set("echo-replies", "false").unwrap();
        prefs.set("display-mode", "json").unwrap();
        prefs.set("timeout", "0").unwrap();
        assert!(!prefs.echo_replies);
        assert_eq!(prefs.display_mode, DisplayMode::Json);
        assert!(prefs.reply_timeout().is_none());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut prefs = SessionPrefs::default();
        assert!(prefs.set("echo-replies", "maybe").is_err());
        assert!(prefs.set("indent", "12").is_err());
        assert!(prefs.set("no-such-pref", "1").unwrap_err().is_not_found());
        assert_eq!(prefs, SessionPrefs::default());
    }

    #[test]
    fn test_toml_defaults_fill_missing_fields() {
        let prefs: SessionPrefs = toml::from_str("autoconfig = true").unwrap();
        assert!(prefs.autoconfig);
        assert_eq!(prefs.lock_timeout_secs, 120);
    }
}
