//! Interfaces of the collaborators the adapter depends on
//!
//! The adapter owns none of these services. The embedding program plugs
//! in real implementations; [`crate::memory`] has in-memory ones.

use crate::types::{Binding, Channel, ChannelNotification};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_bus::{Header, ProcessorLocator};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Channel configuration registry
#[async_trait]
pub trait ChannelLookup: Send + Sync {
    /// Channel by ID; `Error::ConfigUnavailable` when it cannot be resolved
    async fn get_channel(&self, channel_id: &str) -> Result<Channel>;

    /// All channels of an adapter type and namespace
    async fn channels_by_type(&self, adapter_type: &str, namespace: &str) -> Result<Vec<Channel>>;

    /// Binding (agreement) of a channel
    async fn binding_for_channel(&self, channel_id: &str) -> Result<Binding>;

    /// Inbound channel serving the given address, if any
    async fn inbound_channel_for(
        &self,
        adapter_type: &str,
        namespace: &str,
        header: &Header,
    ) -> Result<Option<Channel>>;

    /// Stream of add/update/remove notifications
    fn subscribe(&self) -> broadcast::Receiver<ChannelNotification>;
}

/// Duplicate-suppression entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    /// Fingerprint of the external work item
    pub fingerprint: String,
    /// ID of the message the item was delivered as
    pub message_id: Uuid,
    /// Entry is ignored after this instant
    pub expires_at: DateTime<Utc>,
    /// Entry commits with the surrounding logical transaction
    pub transactional: bool,
}

/// Duplicate-suppression store
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    /// Message ID mapped to `fingerprint`, if a live entry exists
    async fn lookup(&self, fingerprint: &str) -> Result<Option<Uuid>>;

    /// Create an entry; transactional entries become visible when `ticket` commits
    async fn create(&self, entry: DuplicateEntry, ticket: Option<&TransactionTicket>) -> Result<()>;

    /// Remove an entry
    async fn remove(&self, fingerprint: &str) -> Result<()>;
}

/// Audit entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    /// Success
    Success,
    /// Warning
    Warning,
    /// Error
    Error,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Success => write!(f, "SUCCESS"),
            AuditStatus::Warning => write!(f, "WARNING"),
            AuditStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Message audit trail.
///
/// Entries of asynchronous messages must be flushed; entries of
/// synchronous messages stay in memory and must never be flushed.
pub trait AuditSink: Send + Sync {
    /// Append an entry for `message_id`
    fn append(&self, message_id: Uuid, status: AuditStatus, text: &str);

    /// Persist the pending entries of `message_id`
    fn flush(&self, message_id: Uuid) -> Result<()>;
}

/// Handle of an open logical transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionTicket {
    /// Transaction ID
    pub id: Uuid,
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Changes are durable
    Committed,
    /// Rollback-only was set, changes were discarded
    RolledBack,
}

/// Logical transaction boundary
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<TransactionTicket>;

    /// Make the transaction roll back on commit
    async fn mark_rollback_only(&self, ticket: &TransactionTicket) -> Result<()>;

    /// End the transaction
    async fn commit(&self, ticket: TransactionTicket) -> Result<CommitOutcome>;
}

/// Resource that joins logical transactions
#[async_trait]
pub trait TransactionParticipant: Send + Sync {
    /// Make the changes staged under `ticket` durable
    async fn commit(&self, ticket: &TransactionTicket) -> Result<()>;

    /// Discard the changes staged under `ticket`
    async fn rollback(&self, ticket: &TransactionTicket);
}

/// Translation between internal and external address identifiers
pub trait AddressNormalizer: Send + Sync {
    /// Internal party for an external party identifier
    fn internal_party(&self, scheme: &str, party: &str) -> Result<Option<String>>;

    /// Internal service for an external service identifier
    fn internal_service(&self, party: &str, scheme: &str, service: &str) -> Result<Option<String>>;

    /// External identifier of an internal party
    fn external_party(&self, scheme: &str, party: &str) -> Result<Option<String>>;

    /// External identifier of an internal service
    fn external_service(&self, party: &str, scheme: &str, service: &str) -> Result<Option<String>>;
}

/// The collaborators an adapter instance is wired with
#[derive(Clone)]
pub struct Collaborators {
    /// Channel registry
    pub channels: Arc<dyn ChannelLookup>,
    /// Duplicate-suppression store
    pub duplicates: Arc<dyn DuplicateStore>,
    /// Logical transaction boundary
    pub transactions: Arc<dyn TransactionManager>,
    /// Audit trail
    pub audit: Arc<dyn AuditSink>,
    /// Address normalizer
    pub normalizer: Arc<dyn AddressNormalizer>,
    /// Resolves the bus-side message processor
    pub processors: Arc<dyn ProcessorLocator>,
}
