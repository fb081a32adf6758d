use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parlor_types::events::ServerEvent;

use crate::session::Session;

/// Who an event on the bus is meant for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected session
    All,
    /// Sessions that joined the channel. When the channel is not readable,
    /// only sessions that joined it as an owner.
    Channel { id: String, owners_only: bool },
    /// A single session. Replies that must stay ordered with broadcasts
    /// (join history) go here instead of the targeted channel.
    Session(Uuid),
}

/// An event on the shared broadcast bus.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub audience: Audience,
    pub event: ServerEvent,
}

impl Broadcast {
    /// Whether `session` should be sent this event.
    pub fn reaches(&self, session: &Session) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::Channel { id, owners_only } => session.can_receive(id, *owners_only),
            Audience::Session(id) => *id == session.id(),
        }
    }

    /// Channel this event is scoped to, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match &self.audience {
            Audience::Channel { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Manages all connected sessions and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. Every session subscribes.
    broadcast_tx: broadcast::Sender<Broadcast>,

    /// Per-session targeted send channels: session_id -> sender
    sessions: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to every connected session.
    pub fn broadcast(&self, event: ServerEvent) {
        self.publish(Audience::All, event);
    }

    /// Broadcast an event to sessions that joined `channel_id`.
    pub fn broadcast_to_channel(&self, channel_id: &str, owners_only: bool, event: ServerEvent) {
        self.publish(
            Audience::Channel {
                id: channel_id.to_string(),
                owners_only,
            },
            event,
        );
    }

    /// Put a reply for one session on the bus, ordered with everything
    /// broadcast before and after it.
    pub fn reply(&self, session_id: Uuid, event: ServerEvent) {
        self.publish(Audience::Session(session_id), event);
    }

    fn publish(&self, audience: Audience, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(Broadcast { audience, event });
    }

    /// Register a targeted channel for a session.
    pub async fn register_session(&self, session_id: Uuid) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(session_id, tx);
        rx
    }

    pub async fn unregister_session(&self, session_id: Uuid) {
        self.inner.sessions.write().await.remove(&session_id);
    }

    /// Send an event to one session only, outside the broadcast order.
    /// Dropped if it already disconnected.
    pub async fn send_to_session(&self, session_id: Uuid, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(tx) = sessions.get(&session_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
