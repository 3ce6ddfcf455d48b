//! Inbound delivery loop
//!
//! One cycle walks the inbound channel snapshot. For every channel it
//! discovers at most one work item, suppresses duplicates, submits the
//! item to the bus and commits the item externally only after the logical
//! transaction committed. Channels are isolated from each other: a failing
//! channel is reported and the cycle moves on.

use super::source::{InboundSource, SourceProvider, WorkItem};
use crate::addressing::{clear_wildcards, normalize_inbound, parse_content_address};
use crate::channel::ChannelCache;
use crate::config::Config;
use crate::interaction::{Interaction, InteractionSpec, ProcessorInteraction, Record};
use crate::metrics::{INBOUND_ITEMS_TOTAL, POLL_CYCLE_DURATION};
use crate::outcome::InteractionOutcome;
use crate::ports::{AuditStatus, Collaborators, CommitOutcome, DuplicateEntry, TransactionTicket};
use crate::settings::InboundSettings;
use crate::types::{AddressMode, Channel, Direction, ErrorInjection, ProcessMode};
use crate::{Error, Result, CHANNEL_ID_PROPERTY};
use backoff::backoff::Constant;
use chrono::Utc;
use message_bus::{Header, Message, MessageProcessor, Payload};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Marker of XML content
const XML_DECLARATION: &str = "<?xml";

/// What happened to a channel in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    /// Nothing to deliver
    Idle,
    /// Item delivered and committed
    Delivered,
    /// Item was delivered before
    Duplicate,
    /// Delivery failed; the item stays for the next cycle
    Failed(String),
    /// The transaction rolled back; the item stays for the next cycle
    RolledBack,
    /// The item could not be addressed
    Skipped(String),
}

impl ItemResult {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ItemResult::Idle => "idle",
            ItemResult::Delivered => "delivered",
            ItemResult::Duplicate => "duplicate",
            ItemResult::Failed(_) => "failed",
            ItemResult::RolledBack => "rolled_back",
            ItemResult::Skipped(_) => "skipped",
        }
    }
}

/// Result of one channel in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    /// Channel ID
    pub channel_id: String,
    /// Result
    pub result: ItemResult,
}

/// Result of one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Per-channel results, in snapshot order
    pub channels: Vec<ChannelReport>,
    /// Sleep before the next cycle
    pub next_interval: Duration,
}

impl CycleReport {
    /// Result of a channel
    pub fn result(&self, channel_id: &str) -> Option<&ItemResult> {
        self.channels
            .iter()
            .find(|r| r.channel_id == channel_id)
            .map(|r| &r.result)
    }
}

/// Bus message built from a work item
struct Prepared {
    channel_id: String,
    message: Message,
}

/// The delivery loop of one adapter instance
pub struct InboundPoller {
    config: Arc<Config>,
    channels: Arc<ChannelCache>,
    collaborators: Collaborators,
    sources: Arc<dyn SourceProvider>,
}

impl InboundPoller {
    /// Create new poller
    pub fn new(
        config: Arc<Config>,
        channels: Arc<ChannelCache>,
        collaborators: Collaborators,
        sources: Arc<dyn SourceProvider>,
    ) -> Self {
        Self {
            config,
            channels,
            collaborators,
            sources,
        }
    }

    /// Resolve the message processor with bounded retries
    pub async fn resolve_processor(&self) -> Result<Arc<dyn MessageProcessor>> {
        let attempts = self.config.delivery.processor_lookup_attempts.max(1);
        let locator = self.collaborators.processors.clone();
        let mut attempt = 0u32;

        backoff::future::retry_notify(
            Constant::new(self.config.delivery.processor_lookup_wait()),
            || {
                attempt += 1;
                let current = attempt;
                let locator = locator.clone();
                async move {
                    match locator.locate().await {
                        Ok(processor) => Ok(processor),
                        Err(e) if current >= attempts => Err(backoff::Error::permanent(e)),
                        Err(e) => Err(backoff::Error::transient(e)),
                    }
                }
            },
            |e: message_bus::Error, wait: Duration| {
                warn!("Message processor not available ({}), retrying in {:?}", e, wait);
            },
        )
        .await
        .map_err(Error::Bus)
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let processor = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Delivery loop cancelled before start");
                return Ok(());
            }
            resolved = self.resolve_processor() => match resolved {
                Ok(processor) => processor,
                Err(e) => {
                    error!("Cannot resolve message processor, delivery loop ends: {}", e);
                    return Err(e);
                }
            },
        };

        info!("Delivery loop started for adapter type {}", self.config.adapter_type);
        while !cancel.is_cancelled() {
            let report = self.poll_once(&processor).await;
            debug!(
                channels = report.channels.len(),
                "Cycle done, sleeping {:?}", report.next_interval
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(report.next_interval) => {}
            }
        }
        info!("Delivery loop stopped");
        Ok(())
    }

    /// One cycle over all inbound channels
    pub async fn poll_once(&self, processor: &Arc<dyn MessageProcessor>) -> CycleReport {
        let timer = POLL_CYCLE_DURATION
            .with_label_values(&[&self.config.adapter_type])
            .start_timer();
        let mut report = CycleReport::default();
        let mut shortest: Option<Duration> = None;

        for cached in self.channels.snapshot(Direction::Inbound) {
            let result = match self.collaborators.channels.get_channel(&cached.id).await {
                Ok(channel) => {
                    let settings = InboundSettings::from_channel(&channel, &self.config);
                    if let Some(interval) = settings.poll_interval {
                        shortest = Some(shortest.map_or(interval, |s| s.min(interval)));
                    }
                    match self.poll_channel(&channel, &settings, processor).await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(channel_id = %channel.id, "Delivery failed: {}", e);
                            ItemResult::Failed(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    warn!(channel_id = %cached.id, "Channel configuration unavailable: {}", e);
                    ItemResult::Failed(e.to_string())
                }
            };

            INBOUND_ITEMS_TOTAL
                .with_label_values(&[result.label()])
                .inc();
            report.channels.push(ChannelReport {
                channel_id: cached.id,
                result,
            });
        }

        report.next_interval =
            shortest.unwrap_or_else(|| self.config.delivery.default_poll_interval());
        timer.observe_duration();
        report
    }

    async fn poll_channel(
        &self,
        channel: &Channel,
        settings: &InboundSettings,
        processor: &Arc<dyn MessageProcessor>,
    ) -> Result<ItemResult> {
        let source = self.sources.source(settings);
        let Some(item) = source.discover().await? else {
            return Ok(ItemResult::Idle);
        };
        debug!(channel_id = %channel.id, "Found {}", item.location.display());

        if settings.suppresses_duplicates() {
            if let Some(existing) = self.collaborators.duplicates.lookup(&item.fingerprint).await? {
                return Ok(self.skip_duplicate(source.as_ref(), &item, settings, existing).await);
            }
        }

        let content = source.read(&item).await?;
        let prepared = match self.prepare(channel, settings, &item, content).await? {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(channel_id = %channel.id, "{}", reason);
                return Ok(ItemResult::Skipped(reason));
            }
        };

        let result = if settings.qos.is_synchronous() {
            self.deliver_sync(source.as_ref(), &item, settings, processor, prepared)
                .await
        } else {
            self.deliver_async(source.as_ref(), &item, settings, processor, prepared)
                .await
        };
        Ok(result)
    }

    async fn skip_duplicate(
        &self,
        source: &dyn InboundSource,
        item: &WorkItem,
        settings: &InboundSettings,
        existing: uuid::Uuid,
    ) -> ItemResult {
        let audit = &self.collaborators.audit;
        audit.append(
            existing,
            AuditStatus::Warning,
            &format!(
                "File {} was already delivered as message {}, skipping",
                item.name, existing
            ),
        );
        if let Err(e) = audit.flush(existing) {
            warn!(message_id = %existing, "Audit flush failed: {}", e);
        }
        info!("Duplicate {} skipped (message {})", item.name, existing);

        if settings.process_mode == ProcessMode::Rename {
            self.commit_external(source, item).await;
        }
        ItemResult::Duplicate
    }

    /// Address, channel and payload of a work item. The inner `Err` is a
    /// reason to skip the item.
    async fn prepare(
        &self,
        channel: &Channel,
        settings: &InboundSettings,
        item: &WorkItem,
        content: bytes::Bytes,
    ) -> Result<std::result::Result<Prepared, String>> {
        let text = String::from_utf8_lossy(&content).into_owned();

        let (channel_id, header) = match settings.address_mode {
            AddressMode::Channel => {
                let binding = self
                    .collaborators
                    .channels
                    .binding_for_channel(&channel.id)
                    .await?;
                (channel.id.clone(), clear_wildcards(binding.header))
            }
            AddressMode::Message => {
                let parsed = parse_content_address(&text);
                let mut header: Header = clear_wildcards(parsed.header);
                if parsed.gln_mode {
                    header = normalize_inbound(self.collaborators.normalizer.as_ref(), header);
                }
                let target = self
                    .collaborators
                    .channels
                    .inbound_channel_for(
                        &self.config.adapter_type,
                        &self.config.adapter_namespace,
                        &header,
                    )
                    .await?;
                match target {
                    Some(target) => (target.id, header),
                    None => {
                        return Ok(Err(format!(
                            "No inbound channel serves {} for {}",
                            header, item.name
                        )))
                    }
                }
            }
        };

        let description = format!("File {}", item.name);
        let payload = if text.contains(XML_DECLARATION) {
            Payload::xml(content, description)
        } else {
            Payload::binary(content, description)
        };

        let mut message = Message::new(header, settings.qos).with_document(payload);
        if settings.set_channel_id_property {
            message.set_property(&self.config.adapter_namespace, CHANNEL_ID_PROPERTY, &channel_id);
        }
        Ok(Ok(Prepared {
            channel_id,
            message,
        }))
    }

    fn interaction(
        &self,
        settings: &InboundSettings,
        processor: &Arc<dyn MessageProcessor>,
        channel_id: &str,
    ) -> ProcessorInteraction {
        ProcessorInteraction::new(
            processor.clone(),
            channel_id,
            settings.outcome_policy,
            settings.fault.clone(),
        )
    }

    async fn deliver_async(
        &self,
        source: &dyn InboundSource,
        item: &WorkItem,
        settings: &InboundSettings,
        processor: &Arc<dyn MessageProcessor>,
        prepared: Prepared,
    ) -> ItemResult {
        let Prepared {
            channel_id,
            message,
        } = prepared;
        let message_id = message.id;
        let audit = &self.collaborators.audit;
        let transactions = &self.collaborators.transactions;

        let ticket = match transactions.begin().await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(channel_id = %channel_id, "Cannot begin transaction: {}", e);
                return ItemResult::Failed(e.to_string());
            }
        };

        audit.append(
            message_id,
            AuditStatus::Success,
            &format!("Read file {} for channel {}", item.name, channel_id),
        );
        if let Err(e) = audit.flush(message_id) {
            warn!(message_id = %message_id, "Audit flush failed: {}", e);
        }

        let outcome = self
            .interaction(settings, processor, &channel_id)
            .within(&ticket)
            .execute(&InteractionSpec::send(), Record::Message(message))
            .await;
        if let Err(reason) = submitted(outcome) {
            audit.append(message_id, AuditStatus::Error, &reason);
            warn!(channel_id = %channel_id, "Submission of {} failed: {}", item.name, reason);
            self.roll_back(ticket).await;
            return ItemResult::Failed(reason);
        }

        if settings.suppresses_duplicates() {
            let entry = DuplicateEntry {
                fingerprint: item.fingerprint.clone(),
                message_id,
                expires_at: Utc::now()
                    + chrono::Duration::from_std(self.config.delivery.duplicate_expiry())
                        .unwrap_or_else(|_| chrono::Duration::hours(24)),
                transactional: true,
            };
            if let Err(e) = self
                .collaborators
                .duplicates
                .create(entry, Some(&ticket))
                .await
            {
                warn!(channel_id = %channel_id, "Cannot record duplicate entry: {}", e);
                self.roll_back(ticket).await;
                return ItemResult::Failed(e.to_string());
            }
        }

        if settings.error_injection == ErrorInjection::Rollback {
            audit.append(message_id, AuditStatus::Warning, "Rollback injected by configuration");
            if let Err(e) = audit.flush(message_id) {
                warn!(message_id = %message_id, "Audit flush failed: {}", e);
            }
            if let Err(e) = transactions.mark_rollback_only(&ticket).await {
                warn!("Cannot mark transaction rollback-only: {}", e);
            }
        }

        match transactions.commit(ticket).await {
            Ok(CommitOutcome::Committed) => {}
            Ok(CommitOutcome::RolledBack) => {
                info!(channel_id = %channel_id, "Delivery of {} rolled back", item.name);
                return ItemResult::RolledBack;
            }
            Err(e) => {
                warn!(channel_id = %channel_id, "Commit failed, {} will be retried: {}", item.name, e);
                return ItemResult::Failed(e.to_string());
            }
        }

        info!(
            channel_id = %channel_id,
            message_id = %message_id,
            "Delivered {}", item.name
        );
        if settings.process_mode == ProcessMode::Rename {
            self.commit_external(source, item).await;
        }
        ItemResult::Delivered
    }

    async fn deliver_sync(
        &self,
        source: &dyn InboundSource,
        item: &WorkItem,
        settings: &InboundSettings,
        processor: &Arc<dyn MessageProcessor>,
        prepared: Prepared,
    ) -> ItemResult {
        let Prepared {
            channel_id,
            message,
        } = prepared;
        let message_id = message.id;
        let audit = &self.collaborators.audit;

        audit.append(
            message_id,
            AuditStatus::Success,
            &format!("Read file {} for channel {}", item.name, channel_id),
        );

        let outcome = self
            .interaction(settings, processor, &channel_id)
            .execute(&InteractionSpec::call(), Record::Message(message))
            .await;
        match outcome {
            Ok(InteractionOutcome::Delivered(response)) => {
                let text = response
                    .as_ref()
                    .map(|r| r.document_text().into_owned())
                    .unwrap_or_default();
                info!(
                    channel_id = %channel_id,
                    message_id = %message_id,
                    "Response to {}: {}", item.name, text
                );
            }
            Ok(InteractionOutcome::ApplicationError { response, fault }) => {
                warn!(
                    channel_id = %channel_id,
                    message_id = %message_id,
                    "Application error {} for {}: {}",
                    fault.name,
                    item.name,
                    response.document_text()
                );
            }
            other => {
                let reason = failure_reason(other);
                audit.append(message_id, AuditStatus::Error, &reason);
                warn!(channel_id = %channel_id, "Call for {} failed: {}", item.name, reason);
                return ItemResult::Failed(reason);
            }
        }

        if settings.process_mode == ProcessMode::Rename {
            self.commit_external(source, item).await;
        }
        ItemResult::Delivered
    }

    async fn roll_back(&self, ticket: TransactionTicket) {
        let transactions = &self.collaborators.transactions;
        if let Err(e) = transactions.mark_rollback_only(&ticket).await {
            warn!("Cannot mark transaction rollback-only: {}", e);
        }
        if let Err(e) = transactions.commit(ticket).await {
            warn!("Rollback failed: {}", e);
        }
    }

    /// A failure here leaves the item in place; its duplicate entry makes
    /// the next cycle commit it without redelivery.
    async fn commit_external(&self, source: &dyn InboundSource, item: &WorkItem) {
        if let Err(e) = source.commit(item).await {
            error!(
                "External commit of {} failed, it will be detected as duplicate: {}",
                item.location.display(),
                e
            );
        }
    }
}

fn failure_reason(outcome: Result<InteractionOutcome>) -> String {
    match outcome {
        Ok(InteractionOutcome::RecoverableFailure(reason)) => format!("recoverable: {}", reason),
        Ok(InteractionOutcome::PermanentFailure(reason)) => format!("permanent: {}", reason),
        Ok(InteractionOutcome::ApplicationError { fault, .. }) => {
            format!("application error {}", fault.name)
        }
        Ok(InteractionOutcome::Delivered(_)) => "delivered".to_string(),
        Err(e) => e.to_string(),
    }
}

fn submitted(outcome: Result<InteractionOutcome>) -> std::result::Result<(), String> {
    match outcome {
        Ok(InteractionOutcome::Delivered(_)) => Ok(()),
        other => Err(failure_reason(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_result_labels() {
        assert_eq!(ItemResult::Idle.label(), "idle");
        assert_eq!(ItemResult::Failed("x".into()).label(), "failed");
        assert_eq!(ItemResult::RolledBack.label(), "rolled_back");
    }

    #[test]
    fn test_cycle_report_lookup() {
        let report = CycleReport {
            channels: vec![ChannelReport {
                channel_id: "in-1".to_string(),
                result: ItemResult::Duplicate,
            }],
            next_interval: Duration::from_secs(5),
        };

        assert_eq!(report.result("in-1"), Some(&ItemResult::Duplicate));
        assert_eq!(report.result("in-2"), None);
    }

    #[test]
    fn test_submitted() {
        assert!(submitted(Ok(InteractionOutcome::Delivered(None))).is_ok());
        assert!(submitted(Ok(InteractionOutcome::RecoverableFailure("busy".into())))
            .unwrap_err()
            .starts_with("recoverable"));
        assert!(submitted(Err(Error::InvalidArgument("bad".into()))).is_err());
    }
}
