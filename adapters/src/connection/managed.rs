//! Managed connections
//!
//! State machine: `Open -> {Cleaned <-> Open} -> Destroyed`. A destroyed
//! connection is never reused; the factory creates a new one instead.

use super::events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener, ListenerSet};
use super::factory::{FactoryKey, ManagedConnectionFactory};
use super::handle::{ConnectionHandle, HandleState};
use super::resource::{FileSequence, OutboundSink};
use crate::credential::{credentials_match, resolve_credential, Credential};
use crate::metrics::{CONNECTION_HANDLES_TOTAL, MANAGED_CONNECTIONS_TOTAL};
use crate::settings::OutboundSettings;
use crate::types::{Channel, ConnectionRequestInfo};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Managed connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Handles may be issued
    Open,
    /// Handles were detached by a cleanup
    Cleaned,
    /// Terminal
    Destroyed,
}

/// Descriptive metadata of a managed connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetadata {
    /// Product name
    pub product_name: String,
    /// Product version
    pub product_version: String,
    /// Bound channel
    pub channel_id: String,
    /// Principal of the connection credential
    pub user_name: Option<String>,
    /// Number of associated handles
    pub active_handles: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

struct Inner {
    state: ConnectionState,
    handles: HashMap<Uuid, Arc<HandleState>>,
}

/// One opened outbound resource, multiplexed to connection handles
pub struct ManagedConnection {
    id: Uuid,
    me: Weak<ManagedConnection>,
    factory: Weak<ManagedConnectionFactory>,
    factory_key: FactoryKey,
    credential: Option<Credential>,
    channel: Channel,
    settings: OutboundSettings,
    sequence: Arc<FileSequence>,
    inner: Mutex<Inner>,
    sink: Mutex<Option<OutboundSink>>,
    listeners: ListenerSet,
    created_at: DateTime<Utc>,
}

impl ManagedConnection {
    pub(crate) fn new(
        factory: &Arc<ManagedConnectionFactory>,
        credential: Option<Credential>,
        channel: Channel,
        settings: OutboundSettings,
        sink: OutboundSink,
    ) -> Arc<Self> {
        let mc = Arc::new_cyclic(|me| Self {
            id: Uuid::now_v7(),
            me: me.clone(),
            factory: Arc::downgrade(factory),
            factory_key: factory.key().clone(),
            credential,
            channel,
            settings,
            sequence: factory.sequence(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Open,
                handles: HashMap::new(),
            }),
            sink: Mutex::new(Some(sink)),
            listeners: ListenerSet::default(),
            created_at: Utc::now(),
        });
        MANAGED_CONNECTIONS_TOTAL
            .with_label_values(&["created"])
            .inc();
        mc
    }

    /// Connection ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bound channel ID
    pub fn channel_id(&self) -> &str {
        &self.channel.id
    }

    /// Bound channel
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Outbound settings the connection was opened with
    pub fn settings(&self) -> &OutboundSettings {
        &self.settings
    }

    /// Credential the connection was created with
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Identity of the owning factory
    pub fn factory_key(&self) -> &FactoryKey {
        &self.factory_key
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether the connection was destroyed
    pub fn is_destroyed(&self) -> bool {
        self.state() == ConnectionState::Destroyed
    }

    /// Number of associated handles
    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Current sink file, `None` once destroyed
    pub fn sink_path(&self) -> Option<PathBuf> {
        self.sink.lock().as_ref().map(|s| s.path().to_path_buf())
    }

    pub(crate) fn factory(&self) -> Result<Arc<ManagedConnectionFactory>> {
        self.factory.upgrade().ok_or_else(|| {
            Error::IllegalState(format!("factory of managed connection {} is gone", self.id))
        })
    }

    fn check_not_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::IllegalState(format!(
                "managed connection {} is destroyed",
                self.id
            )));
        }
        Ok(())
    }

    /// Issue a new handle.
    ///
    /// The request credential must equal the connection's; reauthentication
    /// is not supported.
    pub fn get_connection(
        &self,
        credential: Option<&Credential>,
        info: Option<&ConnectionRequestInfo>,
    ) -> Result<ConnectionHandle> {
        let requested = resolve_credential(credential, info);
        if !credentials_match(requested.as_ref(), self.credential.as_ref()) {
            return Err(Error::SecurityMismatch(format!(
                "principal does not match managed connection {}",
                self.id
            )));
        }

        let state = HandleState::new(self.me.clone());
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Destroyed {
                return Err(Error::IllegalState(format!(
                    "managed connection {} is destroyed",
                    self.id
                )));
            }
            inner.state = ConnectionState::Open;
            inner.handles.insert(state.id, state.clone());
        }

        CONNECTION_HANDLES_TOTAL.with_label_values(&["issued"]).inc();
        debug!(connection = %self.id, handle = %state.id, "Handle issued");
        Ok(ConnectionHandle::from_state(state))
    }

    /// Detach all handles and recycle the physical resource
    pub fn cleanup(&self) -> Result<()> {
        let detached = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Destroyed {
                return Err(Error::IllegalState(format!(
                    "managed connection {} is destroyed",
                    self.id
                )));
            }
            inner.state = ConnectionState::Cleaned;
            std::mem::take(&mut inner.handles)
        };

        for handle in detached.values() {
            handle.invalidate_if_owned_by(self.id);
        }

        if let Some(sink) = self.sink.lock().as_mut() {
            sink.recycle(&self.sequence)?;
        }

        MANAGED_CONNECTIONS_TOTAL
            .with_label_values(&["cleaned"])
            .inc();
        debug!(
            connection = %self.id,
            detached = detached.len(),
            "Managed connection cleaned up"
        );
        Ok(())
    }

    /// Recycle the connection for reuse if no handle is associated.
    ///
    /// The idle check and the state change happen under one lock, so a
    /// handle issued concurrently is never invalidated. Returns whether the
    /// connection was cleaned up.
    pub fn cleanup_if_idle(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Destroyed || !inner.handles.is_empty() {
            return Ok(false);
        }
        inner.state = ConnectionState::Cleaned;
        if let Some(sink) = self.sink.lock().as_mut() {
            sink.recycle(&self.sequence)?;
        }
        drop(inner);

        MANAGED_CONNECTIONS_TOTAL
            .with_label_values(&["cleaned"])
            .inc();
        debug!(connection = %self.id, "Idle managed connection cleaned up");
        Ok(true)
    }

    /// Destroy the connection. Idempotent.
    ///
    /// Unless called by the owning factory, the factory drops its index
    /// entry for this connection.
    pub fn destroy(&self, from_owner: bool) -> Result<()> {
        let detached = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Destroyed {
                None
            } else {
                inner.state = ConnectionState::Destroyed;
                Some(std::mem::take(&mut inner.handles))
            }
        };

        let mut result = Ok(());
        if let Some(handles) = detached {
            for handle in handles.values() {
                handle.invalidate_if_owned_by(self.id);
            }
            let sink = self.sink.lock().take();
            if let Some(sink) = sink {
                result = sink.close();
            }
            MANAGED_CONNECTIONS_TOTAL
                .with_label_values(&["destroyed"])
                .inc();
            info!(
                "Managed connection {} for channel {} destroyed",
                self.id, self.channel.id
            );
        } else {
            debug!(connection = %self.id, "Managed connection already destroyed");
        }

        if !from_owner {
            if let Some(factory) = self.factory.upgrade() {
                factory.remove_managed_connection(&self.channel.id, self.id);
            }
        }

        result
    }

    /// Move `handle` onto this connection
    pub fn associate_connection(&self, handle: &ConnectionHandle) -> Result<()> {
        self.check_not_destroyed()?;
        let me = self.me.upgrade().ok_or_else(|| {
            Error::IllegalState(format!("managed connection {} is dropped", self.id))
        })?;
        handle.associate(&me)
    }

    pub(crate) fn add_handle(&self, state: Arc<HandleState>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Destroyed {
            return Err(Error::IllegalState(format!(
                "managed connection {} is destroyed",
                self.id
            )));
        }
        inner.state = ConnectionState::Open;
        inner.handles.insert(state.id, state);
        Ok(())
    }

    pub(crate) fn remove_handle(&self, handle_id: Uuid) {
        if self.inner.lock().handles.remove(&handle_id).is_some() {
            CONNECTION_HANDLES_TOTAL.with_label_values(&["closed"]).inc();
        }
    }

    /// Register an event listener
    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.listeners.add(listener);
    }

    /// Deregister an event listener
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.listeners.remove(listener);
    }

    /// Broadcast an event to all listeners
    pub fn send_event(
        &self,
        kind: ConnectionEventKind,
        handle_id: Option<Uuid>,
        error: Option<String>,
    ) {
        let Some(connection) = self.me.upgrade() else {
            return;
        };
        self.listeners.broadcast(&ConnectionEvent {
            kind,
            connection,
            handle_id,
            error,
        });
    }

    /// Write `content` to the physical resource
    pub fn write(&self, content: &[u8]) -> Result<PathBuf> {
        let mut sink = self.sink.lock();
        let sink = sink.as_mut().ok_or_else(|| {
            Error::IllegalState(format!("managed connection {} is destroyed", self.id))
        })?;
        sink.write(content)
    }

    /// Always false: local transactions are not supported
    pub fn supports_local_transactions(&self) -> bool {
        false
    }

    /// Enabling local transactions fails with `Error::NotSupported`
    pub fn set_supports_local_transactions(&self, enabled: bool) -> Result<()> {
        if enabled {
            warn!(connection = %self.id, "Local transactions requested");
            return Err(Error::NotSupported(
                "local transactions are not supported".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection metadata
    pub fn metadata(&self) -> Result<ConnectionMetadata> {
        self.check_not_destroyed()?;
        Ok(ConnectionMetadata {
            product_name: crate::PRODUCT_NAME.to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            channel_id: self.channel.id.clone(),
            user_name: self.credential.as_ref().map(|c| c.principal().to_string()),
            active_handles: self.handle_count(),
            created_at: self.created_at,
        })
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("channel_id", &self.channel.id)
            .field("state", &self.state())
            .field("credential", &self.credential)
            .finish()
    }
}
