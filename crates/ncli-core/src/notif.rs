//! Notification handler registry.
//!
//! Handlers are keyed by (module, event name). An event node may carry a
//! `module:` prefix; an unprefixed event matches a handler of any module.

use crate::document::Node;
use crate::session::Session;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

pub const CONFIG_CHANGE_MODULE: &str = "ietf-netconf-notifications";
pub const CONFIG_CHANGE_EVENT: &str = "netconf-config-change";

pub type NotificationHandler = Box<dyn FnMut(&mut Session, &Node) + Send>;

#[derive(Default)]
pub struct NotificationRegistry {
    handlers: BTreeMap<(String, String), Vec<NotificationHandler>>,
}

impl fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The event element of a `<notification>`: its first child other than
/// `eventTime`.
pub fn event_of(notification: &Node) -> Option<&Node> {
    notification
        .children
        .iter()
        .find(|c| c.name != "eventTime")
}

impl NotificationRegistry {
    /// Registry with the config-change handler that marks the shadow
    /// configuration stale.
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            CONFIG_CHANGE_MODULE,
            CONFIG_CHANGE_EVENT,
            Box::new(|session: &mut Session, _: &Node| {
                if session.prefs.autoconfig {
                    debug!(session = %session.name, "config changed on server");
                    session.config_dirty = true;
                }
            }),
        );
        registry
    }

    pub fn register(&mut self, module: &str, event: &str, handler: NotificationHandler) {
        self.handlers
            .entry((module.to_string(), event.to_string()))
            .or_default()
            .push(handler);
    }

    /// Removes every handler for an event. Returns how many were removed.
    pub fn unregister(&mut self, module: &str, event: &str) -> usize {
        self.handlers
            .remove(&(module.to_string(), event.to_string()))
            .map_or(0, |v| v.len())
    }

    /// Runs the handlers for a notification. Returns false when none matched.
    pub fn dispatch(&mut self, session: &mut Session, notification: &Node) -> bool {
        let Some(event) = event_of(notification) else {
            return false;
        };
        let (module, name) = match event.name.split_once(':') {
            Some((m, n)) => (Some(m), n),
            None => (None, event.name.as_str()),
        };
        let mut handled = false;
        for ((m, e), handlers) in self.handlers.iter_mut() {
            if e != name || module.is_some_and(|want| want != m) {
                continue;
            }
            for handler in handlers.iter_mut() {
                handler(session, notification);
                handled = true;
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPrefs;
    use crate::transport::SessionId;

    fn change() -> Node {
        Node::new("notification")
            .with_child(Node::leaf("eventTime", "2024-01-01T00:00:00Z"))
            .with_child(Node::new(CONFIG_CHANGE_EVENT))
    }

    #[test]
    fn test_config_change_marks_dirty() {
        let mut reg = NotificationRegistry::with_builtin();
        let mut prefs = SessionPrefs::default();
        prefs.autoconfig = true;
        let mut session = Session::new(SessionId(1), "s", prefs);
        assert!(reg.dispatch(&mut session, &change()));
        assert!(session.config_dirty);
    }

    #[test]
    fn test_unhandled_and_prefixed_events() {
        let mut reg = NotificationRegistry::default();
        let mut session = Session::new(SessionId(1), "s", SessionPrefs::default());
        assert!(!reg.dispatch(&mut session, &change()));

        reg.register("acme", "alarm", Box::new(|s: &mut Session, _: &Node| s.config_dirty = true));
        let other = Node::new("notification").with_child(Node::new("other:alarm"));
        assert!(!reg.dispatch(&mut session, &other));
        let own = Node::new("notification").with_child(Node::new("acme:alarm"));
        assert!(reg.dispatch(&mut session, &own));
        assert_eq!(reg.unregister("acme", "alarm"), 1);
    }
}
