//! In-process NETCONF device for offline use and tests.
//!
//! `LoopbackTransport` implements the core's `Transport` contract against a
//! `LoopbackDevice`. Requests are answered synchronously and the replies are
//! queued as events, so the event loop sees the same connect / hello / reply
//! sequence a network transport would produce.

pub mod datastore;
pub mod device;

pub use device::{DeviceProfile, EXTERNAL_OWNER, LoopbackDevice};

use ncli_core::document::Node;
use ncli_core::error::{NcliError, Result};
use ncli_core::transport::{ConnectParams, MessageId, SessionId, Transport, TransportEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Host name that refuses connections.
pub const UNREACHABLE_HOST: &str = "unreachable.invalid";

#[derive(Debug)]
struct Shared {
    device: LoopbackDevice,
    events: VecDeque<(SessionId, TransportEvent)>,
    next_message_id: MessageId,
}

/// Transport whose peer is a simulated device. Clones share the device, so
/// a test can keep a handle and inspect or disturb it.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                device: LoopbackDevice::new(profile),
                events: VecDeque::new(),
                next_message_id: 0,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| NcliError::internal("loopback device state poisoned"))
    }

    /// Runs `f` against the device.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut LoopbackDevice) -> R) -> Result<R> {
        let mut shared = self.lock()?;
        Ok(f(&mut shared.device))
    }

    /// Sends a notification to every subscribed session.
    pub fn notify(&self, notification: Node) -> Result<()> {
        let mut shared = self.lock()?;
        let subscribers: Vec<SessionId> = shared.device.subscribers().collect();
        for session in subscribers {
            shared
                .events
                .push_back((session, TransportEvent::Notification(notification.clone())));
        }
        Ok(())
    }

    /// Drops a session from the device side.
    pub fn hang_up(&self, session: SessionId, reason: &str) -> Result<()> {
        let mut shared = self.lock()?;
        shared.device.close(session);
        shared.events.push_back((
            session,
            TransportEvent::Closed {
                reason: reason.to_string(),
            },
        ));
        Ok(())
    }

    pub fn pending_events(&self) -> usize {
        self.lock().map(|s| s.events.len()).unwrap_or(0)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(DeviceProfile::default())
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, session: SessionId, params: &ConnectParams) -> Result<()> {
        let mut shared = self.lock()?;
        if params.host == UNREACHABLE_HOST {
            shared.events.push_back((
                session,
                TransportEvent::Closed {
                    reason: format!("connection to {} refused", params.host),
                },
            ));
            return Ok(());
        }
        info!(session = %session, "loopback connect to {}:{}", params.host, params.port);
        shared.device.open(session);
        let capabilities = shared.device.capabilities().clone();
        shared.events.push_back((session, TransportEvent::Accepted));
        shared
            .events
            .push_back((session, TransportEvent::HelloComplete { capabilities }));
        Ok(())
    }

    fn send_request(&mut self, session: SessionId, request: &Node) -> Result<MessageId> {
        let mut shared = self.lock()?;
        if !shared.device.is_open(session) {
            return Err(NcliError::transport(format!("session {session} is not open")));
        }
        shared.next_message_id += 1;
        let message_id = shared.next_message_id;
        debug!(session = %session, msg_id = message_id, "loopback <{}>", request.name);

        let (reply, changed) = shared.device.handle(session, request);
        shared.events.push_back((
            session,
            TransportEvent::Reply {
                message_id,
                result: Ok(reply),
            },
        ));
        if changed {
            let notification = shared.device.config_change(session);
            let subscribers: Vec<SessionId> = shared.device.subscribers().collect();
            for subscriber in subscribers {
                shared
                    .events
                    .push_back((subscriber, TransportEvent::Notification(notification.clone())));
            }
        }
        Ok(message_id)
    }

    fn disconnect(&mut self, session: SessionId) {
        if let Ok(mut shared) = self.lock() {
            shared.device.close(session);
            shared.events.retain(|(s, _)| *s != session);
        }
    }

    fn poll_event(&mut self) -> Option<(SessionId, TransportEvent)> {
        self.lock().ok()?.events.pop_front()
    }
}
