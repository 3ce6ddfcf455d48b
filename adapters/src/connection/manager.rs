//! Connection manager: allocation through the factory's pool

use super::events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener};
use super::factory::ManagedConnectionFactory;
use super::handle::ConnectionHandle;
use crate::credential::Credential;
use crate::metrics::MANAGED_CONNECTIONS_TOTAL;
use crate::types::ConnectionRequestInfo;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reacts to connection events on behalf of the pool.
///
/// A connection whose last handle closed is cleaned up for reuse; a
/// connection reporting an error is destroyed.
#[derive(Debug, Default)]
pub struct PoolListener;

impl ConnectionEventListener for PoolListener {
    fn connection_event(&self, event: &ConnectionEvent) {
        let mc = &event.connection;
        match event.kind {
            ConnectionEventKind::Closed => {
                if event.handle_id.is_none() {
                    return;
                }
                if let Err(e) = mc.cleanup_if_idle() {
                    warn!(connection = %mc.id(), "Cleanup after handle close failed: {}", e);
                    if let Err(e) = mc.destroy(false) {
                        warn!(connection = %mc.id(), "Destroy after failed cleanup failed: {}", e);
                    }
                }
            }
            ConnectionEventKind::Error => {
                MANAGED_CONNECTIONS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                warn!(
                    connection = %mc.id(),
                    channel_id = %mc.channel_id(),
                    "Connection error, destroying: {}",
                    event.error.as_deref().unwrap_or("unknown")
                );
                if let Err(e) = mc.destroy(false) {
                    warn!(connection = %mc.id(), "Destroy after error failed: {}", e);
                }
            }
        }
    }
}

/// Allocates connection handles, reusing matching managed connections
pub struct ConnectionManager {
    factory: Arc<ManagedConnectionFactory>,
    listener: Arc<PoolListener>,
}

impl ConnectionManager {
    /// Create new manager over `factory`
    pub fn new(factory: Arc<ManagedConnectionFactory>) -> Self {
        Self {
            factory,
            listener: Arc::new(PoolListener),
        }
    }

    /// Underlying factory
    pub fn factory(&self) -> &Arc<ManagedConnectionFactory> {
        &self.factory
    }

    /// Allocate a handle for the channel named by `info`
    pub async fn allocate(
        &self,
        credential: Option<Credential>,
        info: &ConnectionRequestInfo,
    ) -> Result<ConnectionHandle> {
        let candidates = self.factory.candidates();
        let mc = match self
            .factory
            .match_managed_connections(&candidates, credential.as_ref(), info)
        {
            Some(mc) => {
                debug!(channel_id = %info.channel_id, "Reusing managed connection {}", mc.id());
                mc
            }
            None => {
                let mc = self
                    .factory
                    .create_managed_connection(credential.as_ref(), info)
                    .await?;
                mc.add_listener(self.listener.clone());
                mc
            }
        };

        mc.get_connection(credential.as_ref(), Some(info))
    }
}
