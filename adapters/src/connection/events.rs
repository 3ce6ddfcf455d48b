//! Connection lifecycle events

use super::managed::ManagedConnection;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Kind of connection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// A handle (or the whole connection) was closed
    Closed,
    /// The connection hit an error and should not be reused
    Error,
}

/// Event emitted by a managed connection
#[derive(Clone)]
pub struct ConnectionEvent {
    /// Kind
    pub kind: ConnectionEventKind,
    /// Source connection
    pub connection: Arc<ManagedConnection>,
    /// Handle that triggered the event; `None` for connection-wide events
    pub handle_id: Option<Uuid>,
    /// Error description for `Error` events
    pub error: Option<String>,
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("kind", &self.kind)
            .field("connection", &self.connection.id())
            .field("channel_id", &self.connection.channel_id())
            .field("handle_id", &self.handle_id)
            .field("error", &self.error)
            .finish()
    }
}

/// Observer of connection events
pub trait ConnectionEventListener: Send + Sync {
    /// Called for every event of a connection the listener is registered on
    fn connection_event(&self, event: &ConnectionEvent);
}

/// Registered listeners of one connection
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ConnectionEventListener>>>,
}

impl ListenerSet {
    /// Register a listener
    pub fn add(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Deregister a listener
    pub fn remove(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `event` to every listener.
    ///
    /// Listeners run on a snapshot, without the lock held, so they may
    /// register listeners or call back into the connection.
    pub fn broadcast(&self, event: &ConnectionEvent) {
        let snapshot: Vec<_> = self.listeners.read().clone();
        debug!(
            connection = %event.connection.id(),
            listeners = snapshot.len(),
            "Broadcasting {:?} event",
            event.kind
        );
        for listener in snapshot {
            listener.connection_event(event);
        }
    }
}
