//! In-memory collaborators for tests and standalone runs

use crate::ports::{
    AddressNormalizer, AuditSink, AuditStatus, ChannelLookup, CommitOutcome, DuplicateEntry,
    DuplicateStore, TransactionManager, TransactionParticipant, TransactionTicket,
};
use crate::types::{Binding, Channel, ChannelNotification, Direction};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use message_bus::{Header, InMemoryProcessor};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

const NOTIFICATION_CAPACITY: usize = 256;

/// In-memory channel registry
pub struct InMemoryChannelLookup {
    channels: RwLock<HashMap<String, Channel>>,
    bindings: RwLock<HashMap<String, Binding>>,
    failing: RwLock<HashSet<String>>,
    notifications: broadcast::Sender<ChannelNotification>,
}

impl Default for InMemoryChannelLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannelLookup {
    /// Create an empty registry
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            channels: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            notifications,
        }
    }

    /// Register a channel and notify subscribers
    pub fn add_channel(&self, channel: Channel) {
        self.channels
            .write()
            .insert(channel.id.clone(), channel.clone());
        self.notify(ChannelNotification::Added(channel));
    }

    /// Replace a channel and notify subscribers
    pub fn update_channel(&self, channel: Channel) {
        self.channels
            .write()
            .insert(channel.id.clone(), channel.clone());
        self.notify(ChannelNotification::Updated(channel));
    }

    /// Remove a channel and notify subscribers
    pub fn remove_channel(&self, channel_id: &str) -> Option<Channel> {
        let removed = self.channels.write().remove(channel_id);
        self.bindings.write().remove(channel_id);
        if let Some(channel) = &removed {
            self.notify(ChannelNotification::Removed(channel.clone()));
        }
        removed
    }

    /// Register a binding
    pub fn add_binding(&self, binding: Binding) {
        self.bindings
            .write()
            .insert(binding.channel_id.clone(), binding);
    }

    /// Make lookups of `channel_id` fail until cleared
    pub fn fail_lookup(&self, channel_id: &str) {
        self.failing.write().insert(channel_id.to_string());
    }

    /// Stop failing lookups of `channel_id`
    pub fn clear_failure(&self, channel_id: &str) {
        self.failing.write().remove(channel_id);
    }

    fn notify(&self, notification: ChannelNotification) {
        // No receivers is fine
        let _ = self.notifications.send(notification);
    }

    fn check_failing(&self, channel_id: &str) -> Result<()> {
        if self.failing.read().contains(channel_id) {
            return Err(Error::config_unavailable(channel_id, "lookup failed"));
        }
        Ok(())
    }
}

fn address_matches(pattern: &str, value: &str) -> bool {
    pattern.is_empty() || pattern == value
}

#[async_trait]
impl ChannelLookup for InMemoryChannelLookup {
    async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        self.check_failing(channel_id)?;
        self.channels
            .read()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| Error::config_unavailable(channel_id, "channel not found"))
    }

    async fn channels_by_type(&self, adapter_type: &str, namespace: &str) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .values()
            .filter(|c| c.belongs_to(adapter_type, namespace))
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(channels)
    }

    async fn binding_for_channel(&self, channel_id: &str) -> Result<Binding> {
        self.check_failing(channel_id)?;
        self.bindings
            .read()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| Error::config_unavailable(channel_id, "no binding for channel"))
    }

    async fn inbound_channel_for(
        &self,
        adapter_type: &str,
        namespace: &str,
        header: &Header,
    ) -> Result<Option<Channel>> {
        let bindings = self.bindings.read();
        let channels = self.channels.read();

        let mut candidates: Vec<&Binding> = bindings
            .values()
            .filter(|b| {
                address_matches(&b.header.from_party, &header.from_party)
                    && address_matches(&b.header.from_service, &header.from_service)
                    && address_matches(&b.header.to_party, &header.to_party)
                    && address_matches(&b.header.to_service, &header.to_service)
                    && address_matches(&b.header.action.name, &header.action.name)
                    && address_matches(&b.header.action.namespace, &header.action.namespace)
            })
            .collect();
        candidates.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));

        Ok(candidates
            .into_iter()
            .filter_map(|b| channels.get(&b.channel_id))
            .find(|c| c.direction == Direction::Inbound && c.belongs_to(adapter_type, namespace))
            .cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelNotification> {
        self.notifications.subscribe()
    }
}

/// In-memory duplicate-suppression store.
///
/// Transactional entries are staged per ticket and only become visible
/// when the ticket commits.
#[derive(Default)]
pub struct InMemoryDuplicateStore {
    entries: Mutex<HashMap<String, DuplicateEntry>>,
    staged: Mutex<HashMap<Uuid, Vec<DuplicateEntry>>>,
}

impl InMemoryDuplicateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entry was committed
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of entries waiting for their transaction
    pub fn staged_len(&self) -> usize {
        self.staged.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DuplicateStore for InMemoryDuplicateStore {
    async fn lookup(&self, fingerprint: &str) -> Result<Option<Uuid>> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .get(fingerprint)
            .filter(|e| e.expires_at > now)
            .map(|e| e.message_id))
    }

    async fn create(&self, entry: DuplicateEntry, ticket: Option<&TransactionTicket>) -> Result<()> {
        match (entry.transactional, ticket) {
            (true, Some(ticket)) => {
                self.staged.lock().entry(ticket.id).or_default().push(entry);
            }
            (true, None) => {
                return Err(Error::Transaction(format!(
                    "transactional entry {} without transaction",
                    entry.fingerprint
                )));
            }
            (false, _) => {
                self.entries.lock().insert(entry.fingerprint.clone(), entry);
            }
        }
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<()> {
        self.entries.lock().remove(fingerprint);
        Ok(())
    }
}

#[async_trait]
impl TransactionParticipant for InMemoryDuplicateStore {
    async fn commit(&self, ticket: &TransactionTicket) -> Result<()> {
        let staged = self.staged.lock().remove(&ticket.id).unwrap_or_default();
        let mut entries = self.entries.lock();
        for entry in staged {
            entries.insert(entry.fingerprint.clone(), entry);
        }
        Ok(())
    }

    async fn rollback(&self, ticket: &TransactionTicket) {
        self.staged.lock().remove(&ticket.id);
    }
}

/// Messages handed to the in-memory bus within a transaction are
/// published or dropped with it
#[async_trait]
impl TransactionParticipant for InMemoryProcessor {
    async fn commit(&self, ticket: &TransactionTicket) -> Result<()> {
        self.publish(ticket.id);
        Ok(())
    }

    async fn rollback(&self, ticket: &TransactionTicket) {
        self.discard(ticket.id);
    }
}

/// In-memory transaction manager over a fixed set of participants
pub struct InMemoryTransactionManager {
    participants: Vec<Arc<dyn TransactionParticipant>>,
    open: Mutex<HashMap<Uuid, bool>>,
    committed: Mutex<u64>,
    rolled_back: Mutex<u64>,
}

impl InMemoryTransactionManager {
    /// Create a manager driving `participants`
    pub fn new(participants: Vec<Arc<dyn TransactionParticipant>>) -> Self {
        Self {
            participants,
            open: Mutex::new(HashMap::new()),
            committed: Mutex::new(0),
            rolled_back: Mutex::new(0),
        }
    }

    /// Number of committed transactions
    pub fn committed(&self) -> u64 {
        *self.committed.lock()
    }

    /// Number of rolled back transactions
    pub fn rolled_back(&self) -> u64 {
        *self.rolled_back.lock()
    }

    /// Number of transactions still open
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin(&self) -> Result<TransactionTicket> {
        let ticket = TransactionTicket { id: Uuid::new_v4() };
        self.open.lock().insert(ticket.id, false);
        Ok(ticket)
    }

    async fn mark_rollback_only(&self, ticket: &TransactionTicket) -> Result<()> {
        match self.open.lock().get_mut(&ticket.id) {
            Some(rollback_only) => {
                *rollback_only = true;
                Ok(())
            }
            None => Err(Error::Transaction(format!(
                "unknown transaction {}",
                ticket.id
            ))),
        }
    }

    async fn commit(&self, ticket: TransactionTicket) -> Result<CommitOutcome> {
        let rollback_only = self
            .open
            .lock()
            .remove(&ticket.id)
            .ok_or_else(|| Error::Transaction(format!("unknown transaction {}", ticket.id)))?;

        if rollback_only {
            for participant in &self.participants {
                participant.rollback(&ticket).await;
            }
            *self.rolled_back.lock() += 1;
            debug!(tx = %ticket.id, "Transaction rolled back");
            return Ok(CommitOutcome::RolledBack);
        }

        for participant in &self.participants {
            if let Err(e) = participant.commit(&ticket).await {
                warn!(tx = %ticket.id, "Participant commit failed: {}", e);
                return Err(e);
            }
        }
        *self.committed.lock() += 1;
        debug!(tx = %ticket.id, "Transaction committed");
        Ok(CommitOutcome::Committed)
    }
}

/// Audit entry held by [`InMemoryAuditLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Message ID
    pub message_id: Uuid,
    /// Status
    pub status: AuditStatus,
    /// Text
    pub text: String,
    /// Whether the entry was flushed
    pub flushed: bool,
}

/// In-memory audit trail
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Entries whose text contains `needle`
    pub fn matching(&self, needle: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.text.contains(needle))
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn append(&self, message_id: Uuid, status: AuditStatus, text: &str) {
        self.entries.lock().push(AuditEntry {
            message_id,
            status,
            text: text.to_string(),
            flushed: false,
        });
    }

    fn flush(&self, message_id: Uuid) -> Result<()> {
        for entry in self
            .entries
            .lock()
            .iter_mut()
            .filter(|e| e.message_id == message_id)
        {
            entry.flushed = true;
        }
        Ok(())
    }
}

/// Normalizer over fixed identifier tables
#[derive(Default)]
pub struct StaticNormalizer {
    parties: HashMap<String, String>,
    services: HashMap<(String, String), String>,
}

impl StaticNormalizer {
    /// Create an empty normalizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Map external party `external` to internal party `internal`
    pub fn with_party(mut self, external: &str, internal: &str) -> Self {
        self.parties.insert(external.to_string(), internal.to_string());
        self
    }

    /// Map external service `external` of `party` to internal service `internal`
    pub fn with_service(mut self, party: &str, external: &str, internal: &str) -> Self {
        self.services
            .insert((party.to_string(), external.to_string()), internal.to_string());
        self
    }
}

impl AddressNormalizer for StaticNormalizer {
    fn internal_party(&self, _scheme: &str, party: &str) -> Result<Option<String>> {
        Ok(self.parties.get(party).cloned())
    }

    fn internal_service(&self, party: &str, _scheme: &str, service: &str) -> Result<Option<String>> {
        Ok(self
            .services
            .get(&(party.to_string(), service.to_string()))
            .cloned())
    }

    fn external_party(&self, _scheme: &str, party: &str) -> Result<Option<String>> {
        Ok(self
            .parties
            .iter()
            .find(|(_, internal)| internal.as_str() == party)
            .map(|(external, _)| external.clone()))
    }

    fn external_service(&self, party: &str, _scheme: &str, service: &str) -> Result<Option<String>> {
        let external_party = self.external_party("", party)?;
        Ok(self
            .services
            .iter()
            .find(|((p, _), internal)| {
                internal.as_str() == service
                    && (p == party || Some(p) == external_party.as_ref())
            })
            .map(|((_, external), _)| external.clone()))
    }
}
