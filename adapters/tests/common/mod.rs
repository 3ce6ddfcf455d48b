//! Shared fixture for integration tests

#![allow(dead_code)]

use message_bus::{Action, Header, InMemoryProcessor, MessageProcessor, StaticLocator};
use resource_adapter::inbound::CycleReport;
use resource_adapter::memory::{
    InMemoryAuditLog, InMemoryChannelLookup, InMemoryDuplicateStore, InMemoryTransactionManager,
    StaticNormalizer,
};
use resource_adapter::ports::TransactionParticipant;
use resource_adapter::settings::keys;
use resource_adapter::{
    Binding, Channel, Collaborators, Config, Direction, ResourceAdapter,
    DEFAULT_ADAPTER_NAMESPACE, DEFAULT_ADAPTER_TYPE,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub lookup: Arc<InMemoryChannelLookup>,
    pub duplicates: Arc<InMemoryDuplicateStore>,
    pub transactions: Arc<InMemoryTransactionManager>,
    pub audit: Arc<InMemoryAuditLog>,
    pub processor: Arc<InMemoryProcessor>,
    pub adapter: ResourceAdapter,
}

pub fn header() -> Header {
    Header::new("ACME", "ERP", "BETA", "SHOP", Action::new("Order", "urn:orders"))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_normalizer(StaticNormalizer::new())
    }

    pub fn with_normalizer(normalizer: StaticNormalizer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("in")).unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();

        let mut config = Config::default();
        config.inbound.directory = dir.path().join("in");
        config.outbound.directory = dir.path().join("out");
        config.delivery.processor_lookup_wait_ms = 10;
        config.delivery.stop_timeout_ms = 2_000;

        let lookup = Arc::new(InMemoryChannelLookup::new());
        let duplicates = Arc::new(InMemoryDuplicateStore::new());
        let processor = Arc::new(InMemoryProcessor::new());
        let participants: Vec<Arc<dyn TransactionParticipant>> =
            vec![duplicates.clone(), processor.clone()];
        let transactions = Arc::new(InMemoryTransactionManager::new(participants));
        let audit = Arc::new(InMemoryAuditLog::new());

        let collaborators = Collaborators {
            channels: lookup.clone(),
            duplicates: duplicates.clone(),
            transactions: transactions.clone(),
            audit: audit.clone(),
            normalizer: Arc::new(normalizer),
            processors: Arc::new(StaticLocator::new(processor.clone())),
        };

        Self {
            adapter: ResourceAdapter::new(config, collaborators),
            dir,
            lookup,
            duplicates,
            transactions,
            audit,
            processor,
        }
    }

    pub fn in_dir(&self) -> PathBuf {
        self.dir.path().join("in")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Register an inbound channel polling `in/<file>` with a binding
    pub fn inbound(&self, id: &str, file: &str, props: &[(&str, &str)]) -> Channel {
        let channel = props.iter().fold(
            Channel::new(id, Direction::Inbound, DEFAULT_ADAPTER_TYPE, DEFAULT_ADAPTER_NAMESPACE)
                .with_property(keys::SOURCE_FILE_NAME, file),
            |c, (k, v)| c.with_property(k, *v),
        );
        self.lookup.add_channel(channel.clone());
        self.lookup.add_binding(Binding::new(id, header()));
        channel
    }

    /// Register an outbound channel writing to `out/<id>`
    pub fn outbound(&self, id: &str, props: &[(&str, &str)]) -> Channel {
        let channel = props.iter().fold(
            Channel::new(id, Direction::Outbound, DEFAULT_ADAPTER_TYPE, DEFAULT_ADAPTER_NAMESPACE)
                .with_property(keys::SINK_PREFIX, id),
            |c, (k, v)| c.with_property(k, *v),
        );
        self.lookup.add_channel(channel.clone());
        self.lookup.add_binding(Binding::new(id, header()));
        channel
    }

    pub fn write_input(&self, file: &str, content: &str) -> PathBuf {
        let path = self.in_dir().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// One delivery cycle over the currently registered channels
    pub async fn poll(&self) -> CycleReport {
        self.adapter.channels().init().await.unwrap();
        let processor: Arc<dyn MessageProcessor> = self.processor.clone();
        self.adapter.poller().poll_once(&processor).await
    }
}
