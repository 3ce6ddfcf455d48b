//! Managed connection factory and its per-channel pool index

use super::events::ConnectionEventKind;
use super::managed::ManagedConnection;
use super::resource::{FileSequence, OutboundSink};
use crate::config::Config;
use crate::credential::{credentials_match, resolve_credential, Credential};
use crate::metrics::{MANAGED_CONNECTIONS_ACTIVE, MANAGED_CONNECTIONS_TOTAL};
use crate::ports::{AddressNormalizer, AuditSink, ChannelLookup};
use crate::settings::OutboundSettings;
use crate::types::{AddressMode, ConnectionRequestInfo, Direction};
use crate::{Error, Result};
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of a factory: connections of equal factories are interchangeable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactoryKey {
    /// Adapter type
    pub adapter_type: String,
    /// Adapter namespace
    pub adapter_namespace: String,
    /// Address determination mode
    pub address_mode: AddressMode,
}

impl FactoryKey {
    /// Key of a factory configured by `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            adapter_type: config.adapter_type.clone(),
            adapter_namespace: config.adapter_namespace.clone(),
            address_mode: config.address_mode,
        }
    }
}

/// Creates, matches and destroys managed connections.
///
/// Indexes every managed connection it created by channel until the
/// connection is destroyed.
pub struct ManagedConnectionFactory {
    config: Arc<Config>,
    key: FactoryKey,
    lookup: Arc<dyn ChannelLookup>,
    normalizer: Arc<dyn AddressNormalizer>,
    audit: Arc<dyn AuditSink>,
    connections: DashMap<String, Vec<Arc<ManagedConnection>>>,
    sequence: Arc<FileSequence>,
}

impl ManagedConnectionFactory {
    /// Create new factory
    pub fn new(
        config: Arc<Config>,
        lookup: Arc<dyn ChannelLookup>,
        normalizer: Arc<dyn AddressNormalizer>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: FactoryKey::from_config(&config),
            config,
            lookup,
            normalizer,
            audit,
            connections: DashMap::new(),
            sequence: Arc::new(FileSequence::new()),
        })
    }

    /// Factory identity
    pub fn key(&self) -> &FactoryKey {
        &self.key
    }

    /// Adapter configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Channel registry
    pub fn lookup(&self) -> &Arc<dyn ChannelLookup> {
        &self.lookup
    }

    /// Address normalizer
    pub fn normalizer(&self) -> &Arc<dyn AddressNormalizer> {
        &self.normalizer
    }

    /// Audit trail
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub(crate) fn sequence(&self) -> Arc<FileSequence> {
        self.sequence.clone()
    }

    /// Open a new managed connection for the channel named by `info`
    pub async fn create_managed_connection(
        self: &Arc<Self>,
        credential: Option<&Credential>,
        info: &ConnectionRequestInfo,
    ) -> Result<Arc<ManagedConnection>> {
        let channel_id = info.channel_id.as_str();
        let channel = self.lookup.get_channel(channel_id).await.map_err(|e| match e {
            e @ Error::ConfigUnavailable { .. } => e,
            other => Error::config_unavailable(channel_id, other.to_string()),
        })?;
        if channel.direction != Direction::Outbound {
            return Err(Error::config_unavailable(
                channel_id,
                format!("channel is {}, not outbound", channel.direction),
            ));
        }

        let settings = OutboundSettings::from_channel(&channel, &self.config);
        let sink = OutboundSink::open(&settings, &self.sequence)?;
        let credential = resolve_credential(credential, Some(info));

        let mc = ManagedConnection::new(self, credential, channel, settings, sink);
        self.connections
            .entry(channel_id.to_string())
            .or_default()
            .push(mc.clone());
        self.update_active_gauge();

        info!(
            "Created managed connection {} for channel {}",
            mc.id(),
            channel_id
        );
        Ok(mc)
    }

    /// Snapshot of the indexed connections
    pub fn candidates(&self) -> Vec<Arc<ManagedConnection>> {
        self.connections
            .iter()
            .flat_map(|e| e.value().clone())
            .collect()
    }

    /// Indexed connections of a channel
    pub fn connections_for(&self, channel_id: &str) -> Vec<Arc<ManagedConnection>> {
        self.connections
            .get(channel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Number of indexed connections
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    /// First candidate usable for the request.
    ///
    /// A candidate matches when it is not destroyed, was created by an
    /// equal factory, serves the requested channel and holds an equal
    /// credential.
    pub fn match_managed_connections(
        &self,
        candidates: &[Arc<ManagedConnection>],
        credential: Option<&Credential>,
        info: &ConnectionRequestInfo,
    ) -> Option<Arc<ManagedConnection>> {
        let requested = resolve_credential(credential, Some(info));
        candidates
            .iter()
            .find(|mc| {
                !mc.is_destroyed()
                    && mc.factory_key() == &self.key
                    && mc.channel_id() == info.channel_id
                    && credentials_match(requested.as_ref(), mc.credential())
            })
            .cloned()
    }

    /// Drop the channel's connections from the index, notify their
    /// listeners and destroy them. Unknown channels are ignored.
    ///
    /// Every connection is destroyed; the first failure is returned.
    pub fn destroy_managed_connection(&self, channel_id: &str) -> Result<()> {
        let Some((_, connections)) = self.connections.remove(channel_id) else {
            debug!(channel_id = %channel_id, "No managed connection to destroy");
            return Ok(());
        };
        self.update_active_gauge();

        let mut result = Ok(());
        for mc in connections {
            mc.send_event(ConnectionEventKind::Closed, None, None);
            if let Err(e) = mc.destroy(true) {
                warn!(
                    channel_id = %channel_id,
                    "Failed to destroy managed connection {}: {}",
                    mc.id(),
                    e
                );
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Drop `connection_id` from the index entry of `channel_id`
    pub(crate) fn remove_managed_connection(&self, channel_id: &str, connection_id: Uuid) {
        let removed = match self.connections.get_mut(channel_id) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|mc| mc.id() != connection_id);
                list.len() != before
            }
            None => false,
        };
        self.connections.remove_if(channel_id, |_, list| list.is_empty());

        if removed {
            self.update_active_gauge();
            debug!(channel_id = %channel_id, "Managed connection {} unindexed", connection_id);
        }
    }

    /// Destroy every indexed connection
    pub fn destroy_all(&self) {
        let channels: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for channel_id in channels {
            if let Err(e) = self.destroy_managed_connection(&channel_id) {
                MANAGED_CONNECTIONS_TOTAL
                    .with_label_values(&["destroy_failed"])
                    .inc();
                warn!(channel_id = %channel_id, "Failed to destroy managed connection: {}", e);
            }
        }
    }

    fn update_active_gauge(&self) {
        MANAGED_CONNECTIONS_ACTIVE
            .with_label_values(&[&self.key.adapter_type])
            .set(self.connection_count() as i64);
    }
}

impl PartialEq for ManagedConnectionFactory {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ManagedConnectionFactory {}

impl Hash for ManagedConnectionFactory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Debug for ManagedConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnectionFactory")
            .field("key", &self.key)
            .field("connections", &self.connection_count())
            .finish()
    }
}
