//! Tracing layer that keeps recent session lifecycle events in memory.
//!
//! Events logged with target `ncli::session` (connects, disconnects, mode
//! changes, session add/delete) land in a bounded ring buffer that the
//! `show-log` view reads.

use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub const SESSION_TARGET: &str = "ncli::session";
pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Local>,
    pub level: String,
    /// Value of the `session` field, when the event had one
    pub session: Option<String>,
    pub message: String,
    pub fields: HashMap<String, Value>,
}

impl fmt::Display for SessionLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:>5} ", self.timestamp.format("%H:%M:%S%.3f"), self.level)?;
        if let Some(session) = &self.session {
            write!(f, "[{session}] ")?;
        }
        f.write_str(&self.message)?;
        if let Some(mode) = self.fields.get("mode").and_then(Value::as_str) {
            write!(f, " ({mode})")?;
        }
        Ok(())
    }
}

/// Shared handle to the ring buffer. Clones see the same entries.
#[derive(Debug, Clone)]
pub struct SessionLog {
    entries: Arc<Mutex<VecDeque<SessionLogEntry>>>,
    capacity: usize,
}

impl SessionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, entry: SessionLogEntry) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<SessionLogEntry> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct SessionEventLayer {
    log: SessionLog,
}

impl SessionEventLayer {
    pub fn new(log: SessionLog) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for SessionEventLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with(SESSION_TARGET) {
            return;
        }

        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let session = fields
            .get("session")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.log.push(SessionLogEntry {
            timestamp: Local::now(),
            level: metadata.level().to_string(),
            session,
            message,
            fields,
        });
    }
}

/// Collects event fields as JSON values.
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        // `%display` fields arrive here too; keep them unquoted
        self.0
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(log: &SessionLog, f: impl FnOnce()) {
        let subscriber =
            tracing_subscriber::registry().with(SessionEventLayer::new(log.clone()));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_only_session_target_is_kept() {
        let log = SessionLog::new(10);
        capture(&log, || {
            info!(target: "ncli::session", session = "default", mode = "autolock", "command mode changed");
            info!("unrelated event");
        });

        let entries = log.recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session.as_deref(), Some("default"));
        assert_eq!(entries[0].message, "command mode changed");
        assert!(entries[0].to_string().ends_with("command mode changed (autolock)"));
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let log = SessionLog::new(2);
        capture(&log, || {
            for i in 0..3 {
                info!(target: "ncli::session", n = i, "event {i}");
            }
        });

        let entries = log.recent(5);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "event 1");
        assert_eq!(log.recent(1)[0].message, "event 2");
    }
}
