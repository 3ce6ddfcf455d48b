//! Standalone file adapter with in-memory collaborators

use anyhow::Context;
use message_bus::{InMemoryProcessor, StaticLocator};
use resource_adapter::memory::{
    InMemoryAuditLog, InMemoryChannelLookup, InMemoryDuplicateStore, InMemoryTransactionManager,
    StaticNormalizer,
};
use resource_adapter::ports::TransactionParticipant;
use resource_adapter::{Collaborators, Config, Lifecycle, ResourceAdapter};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("ADAPTER_LOG_JSON").is_ok_and(|v| v == "1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting file adapter");

    let config = match std::env::var("ADAPTER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("reading environment")?,
    };

    let lookup = Arc::new(InMemoryChannelLookup::new());
    for channel in &config.channels {
        lookup.add_channel(channel.clone());
    }
    for binding in &config.bindings {
        lookup.add_binding(binding.clone());
    }
    tracing::info!(
        "Registered {} channels and {} bindings",
        config.channels.len(),
        config.bindings.len()
    );

    let duplicates = Arc::new(InMemoryDuplicateStore::new());
    let processor = Arc::new(InMemoryProcessor::new());
    let participants: Vec<Arc<dyn TransactionParticipant>> =
        vec![duplicates.clone(), processor.clone()];
    let collaborators = Collaborators {
        channels: lookup,
        duplicates,
        transactions: Arc::new(InMemoryTransactionManager::new(participants)),
        audit: Arc::new(InMemoryAuditLog::new()),
        normalizer: Arc::new(StaticNormalizer::new()),
        processors: Arc::new(StaticLocator::new(processor)),
    };

    let channel_ids: Vec<String> = config.channels.iter().map(|c| c.id.clone()).collect();
    let adapter = ResourceAdapter::new(config, collaborators);
    adapter.start().await?;

    for id in &channel_ids {
        let status = adapter.channel_status(id);
        tracing::info!(channel_id = %id, "Status {}", serde_json::to_string(&status)?);
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down file adapter");
    adapter.stop().await?;
    Ok(())
}
