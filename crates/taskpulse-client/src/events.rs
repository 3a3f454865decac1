//! Typed events and the subscription registry.
//!
//! Observers subscribe through the handle and receive every event the
//! agent emits from then on, over an unbounded channel. Dropping the
//! [`Subscription`] unsubscribes; nothing leaks across reconnects
//! because the registry belongs to the logical session, not to any one
//! transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use taskpulse_protocol::{TaskId, UserId};

/// Everything the agent reports to its observers: lifecycle changes,
/// liveness signals, and the domain events the server fans out.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A fresh session established its first connection.
    Connected,
    /// The transport dropped; the agent will retry unless terminal.
    Disconnected { reason: String },
    /// A numbered reconnection attempt is starting.
    ReconnectAttempt { attempt: u32 },
    /// A reconnection attempt succeeded; room subscriptions have been
    /// replayed.
    Reconnected { attempt: u32 },
    /// The retry budget is spent. Emitted exactly once, on entering
    /// terminal `Disconnected`.
    ReconnectFailed,
    /// The server rejected the credential. Terminal; no retries.
    AuthRejected { message: String },
    /// The server's post-handshake snapshot.
    ServerInfo {
        server_start_time: u64,
        server_uptime: u64,
        connected_users: usize,
    },
    /// Reply to a `check-connection` probe.
    ConnectionConfirmed {
        user_id: UserId,
        socket_id: String,
        server_time: u64,
    },
    /// A user's aggregate presence changed.
    PresenceChanged { user_id: UserId, online: bool },
    /// A task was created.
    TaskCreated { task: serde_json::Value },
    /// A task was updated.
    TaskUpdated { task: serde_json::Value },
    /// A task was deleted.
    TaskDeleted { task_id: TaskId },
    /// The server answered a liveness probe.
    Pong,
    /// A liveness probe went unanswered within the timeout.
    HeartbeatMissed { consecutive: u32 },
}

/// Fan-out point for [`ClientEvent`]s.
pub(crate) struct SubscriberRegistry {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ClientEvent>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, sender);
        Subscription {
            id,
            events,
            registry: Arc::clone(self),
        }
    }

    /// Delivers an event to every live subscriber, pruning closed ones.
    pub(crate) fn broadcast(&self, event: ClientEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// A live event stream. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    /// Waits for the next event. `None` once the agent is gone and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Takes an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
