//! Caller-facing connection handles

use super::events::ConnectionEventKind;
use super::managed::ManagedConnection;
use crate::interaction::OutboundInteraction;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Shared state of a handle; the managed connection keeps one reference
pub(crate) struct HandleState {
    pub(crate) id: Uuid,
    owner: Mutex<Weak<ManagedConnection>>,
}

impl HandleState {
    pub(crate) fn new(owner: Weak<ManagedConnection>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            owner: Mutex::new(owner),
        })
    }

    /// Detach from `connection_id`, unless the handle moved on meanwhile
    pub(crate) fn invalidate_if_owned_by(&self, connection_id: Uuid) {
        let mut owner = self.owner.lock();
        if owner
            .upgrade()
            .map_or(true, |mc| mc.id() == connection_id)
        {
            *owner = Weak::new();
        }
    }
}

/// Handle to a managed connection.
///
/// Every operation fails with `Error::IllegalState` once the handle was
/// closed, invalidated by a cleanup or its connection was destroyed.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<HandleState>,
}

impl ConnectionHandle {
    pub(crate) fn from_state(state: Arc<HandleState>) -> Self {
        Self { state }
    }

    /// Handle ID
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Connection the handle currently operates on
    pub fn managed_connection(&self) -> Result<Arc<ManagedConnection>> {
        let mc = self.state.owner.lock().upgrade().ok_or_else(|| {
            Error::IllegalState(format!("connection handle {} is not associated", self.id()))
        })?;
        if mc.is_destroyed() {
            return Err(Error::IllegalState(format!(
                "managed connection {} is destroyed",
                mc.id()
            )));
        }
        Ok(mc)
    }

    /// Whether the handle can be used
    pub fn is_valid(&self) -> bool {
        self.managed_connection().is_ok()
    }

    /// Interaction bound to this handle
    pub fn create_interaction(&self) -> Result<OutboundInteraction> {
        self.managed_connection()?;
        Ok(OutboundInteraction::new(self.clone()))
    }

    /// Release the handle; the connection's listeners see a `Closed` event
    pub fn close(&self) -> Result<()> {
        let mc = {
            let mut owner = self.state.owner.lock();
            let mc = owner.upgrade().ok_or_else(|| {
                Error::IllegalState(format!("connection handle {} already closed", self.id()))
            })?;
            *owner = Weak::new();
            mc
        };
        mc.remove_handle(self.id());
        mc.send_event(ConnectionEventKind::Closed, Some(self.id()), None);
        Ok(())
    }

    /// Move the handle to `target`, leaving its current connection
    pub(crate) fn associate(&self, target: &Arc<ManagedConnection>) -> Result<()> {
        let mut owner = self.state.owner.lock();
        let current = owner.upgrade();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, target)) {
            return Ok(());
        }
        target.add_handle(self.state.clone())?;
        if let Some(current) = current {
            current.remove_handle(self.id());
        }
        *owner = Arc::downgrade(target);
        Ok(())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self.state.owner.lock().upgrade().map(|mc| mc.id());
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("connection", &owner)
            .finish()
    }
}
