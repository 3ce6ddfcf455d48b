//! Adapter lifecycle: wiring, start and stop

use crate::channel::ChannelCache;
use crate::config::Config;
use crate::connection::{ConnectionManager, ManagedConnectionFactory};
use crate::inbound::{FileSourceProvider, InboundPoller, SourceProvider};
use crate::ports::Collaborators;
use crate::types::ChannelStatus;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Start/stop control of a component driven by its host
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component; a second start is a no-op
    async fn start(&self) -> Result<()>;

    /// Stop the component; safe to call at any time, also repeatedly
    async fn stop(&self) -> Result<()>;

    /// Whether the component is running
    fn is_running(&self) -> bool;
}

struct Running {
    cancel: CancellationToken,
    poller: JoinHandle<Result<()>>,
    watcher: JoinHandle<()>,
}

/// One resource adapter instance
pub struct ResourceAdapter {
    config: Arc<Config>,
    collaborators: Collaborators,
    factory: Arc<ManagedConnectionFactory>,
    connections: ConnectionManager,
    channels: Arc<ChannelCache>,
    sources: Arc<dyn SourceProvider>,
    tasks: Mutex<Option<Running>>,
}

impl ResourceAdapter {
    /// Wire an adapter reading files from the local file system
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self::with_sources(config, collaborators, Arc::new(FileSourceProvider))
    }

    /// Wire an adapter with a custom inbound source provider
    pub fn with_sources(
        config: Config,
        collaborators: Collaborators,
        sources: Arc<dyn SourceProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let factory = ManagedConnectionFactory::new(
            config.clone(),
            collaborators.channels.clone(),
            collaborators.normalizer.clone(),
            collaborators.audit.clone(),
        );
        let channels = Arc::new(ChannelCache::new(
            config.clone(),
            collaborators.channels.clone(),
            factory.clone(),
        ));

        Self {
            connections: ConnectionManager::new(factory.clone()),
            config,
            collaborators,
            factory,
            channels,
            sources,
            tasks: Mutex::new(None),
        }
    }

    /// Adapter configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Outbound connection manager
    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Managed connection factory
    pub fn factory(&self) -> &Arc<ManagedConnectionFactory> {
        &self.factory
    }

    /// Channel cache
    pub fn channels(&self) -> &Arc<ChannelCache> {
        &self.channels
    }

    /// Status of a channel for monitoring
    pub fn channel_status(&self, channel_id: &str) -> ChannelStatus {
        self.channels.channel_status(channel_id, self.is_running())
    }

    /// Delivery loop bound to this adapter's channels
    pub fn poller(&self) -> InboundPoller {
        InboundPoller::new(
            self.config.clone(),
            self.channels.clone(),
            self.collaborators.clone(),
            self.sources.clone(),
        )
    }
}

impl ResourceAdapter {
    /// Release the tasks of a delivery loop that already ended
    async fn reap(&self, running: Running) {
        let Running {
            cancel,
            poller,
            watcher,
        } = running;
        cancel.cancel();
        match poller.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => info!("Restarting delivery loop that ended with: {}", e),
            Err(e) => warn!("Delivery loop task failed: {}", e),
        }
        if let Err(e) = watcher.await {
            warn!("Channel watcher ended abnormally: {}", e);
        }
    }
}

#[async_trait]
impl Lifecycle for ResourceAdapter {
    async fn start(&self) -> Result<()> {
        let stale = {
            let mut tasks = self.tasks.lock();
            match tasks.as_ref() {
                Some(running) if !running.poller.is_finished() => {
                    warn!("Adapter {} already started", self.config.adapter_type);
                    return Ok(());
                }
                Some(_) => tasks.take(),
                None => None,
            }
        };
        if let Some(stale) = stale {
            self.reap(stale).await;
        }

        // Subscribe before loading so no change between the two is lost
        let notifications = self.collaborators.channels.subscribe();
        self.channels.init().await?;

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(self.channels.clone().watch(notifications, cancel.clone()));

        let poller = self.poller();
        let token = cancel.clone();
        let poller = tokio::spawn(async move { poller.run(token).await });

        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            // A concurrent start won
            cancel.cancel();
            return Ok(());
        }
        *tasks = Some(Running {
            cancel,
            poller,
            watcher,
        });
        info!("Adapter {} started", self.config.adapter_type);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(Running {
            cancel,
            mut poller,
            watcher,
        }) = self.tasks.lock().take()
        else {
            info!("Adapter {} not running, nothing to stop", self.config.adapter_type);
            return Ok(());
        };

        cancel.cancel();
        let limit = self.config.delivery.stop_timeout();
        let joined = tokio::time::timeout(limit, &mut poller).await;
        if let Err(e) = watcher.await {
            warn!("Channel watcher ended abnormally: {}", e);
        }
        self.factory.destroy_all();

        match joined {
            Ok(Ok(Ok(()))) => {
                info!("Adapter {} stopped", self.config.adapter_type);
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                warn!("Delivery loop had ended with an error: {}", e);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Delivery loop task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                poller.abort();
                error!("Delivery loop did not stop within {:?}, aborted", limit);
                Err(Error::Timeout {
                    seconds: limit.as_secs(),
                    operation: "delivery loop stop".to_string(),
                })
            }
        }
    }

    fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .as_ref()
            .is_some_and(|r| !r.poller.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryAuditLog, InMemoryChannelLookup, InMemoryDuplicateStore,
        InMemoryTransactionManager, StaticNormalizer,
    };
    use crate::ports::TransactionParticipant;
    use message_bus::{InMemoryProcessor, MessageProcessor, ProcessorLocator};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Locator whose processor can be switched on later
    struct SwitchedLocator {
        available: AtomicBool,
        processor: Arc<InMemoryProcessor>,
    }

    #[async_trait]
    impl ProcessorLocator for SwitchedLocator {
        async fn locate(&self) -> message_bus::Result<Arc<dyn MessageProcessor>> {
            if self.available.load(Ordering::SeqCst) {
                Ok(self.processor.clone())
            } else {
                Err(message_bus::Error::Unavailable("not bound yet".to_string()))
            }
        }
    }

    fn adapter(locator: Arc<SwitchedLocator>) -> ResourceAdapter {
        let mut config = Config::default();
        config.delivery.processor_lookup_attempts = 1;
        config.delivery.processor_lookup_wait_ms = 1;

        let duplicates = Arc::new(InMemoryDuplicateStore::new());
        let participant: Arc<dyn TransactionParticipant> = duplicates.clone();
        let collaborators = Collaborators {
            channels: Arc::new(InMemoryChannelLookup::new()),
            duplicates,
            transactions: Arc::new(InMemoryTransactionManager::new(vec![participant])),
            audit: Arc::new(InMemoryAuditLog::new()),
            normalizer: Arc::new(StaticNormalizer::new()),
            processors: locator,
        };
        ResourceAdapter::new(config, collaborators)
    }

    async fn settle(adapter: &ResourceAdapter, running: bool) {
        for _ in 0..200 {
            if adapter.is_running() == running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("adapter never reached running = {}", running);
    }

    #[tokio::test]
    async fn test_start_after_failed_loop_restarts() {
        let locator = Arc::new(SwitchedLocator {
            available: AtomicBool::new(false),
            processor: Arc::new(InMemoryProcessor::new()),
        });
        let adapter = adapter(locator.clone());

        adapter.start().await.unwrap();
        settle(&adapter, false).await;

        locator.available.store(true, Ordering::SeqCst);
        adapter.start().await.unwrap();
        settle(&adapter, true).await;

        adapter.stop().await.unwrap();
        assert!(!adapter.is_running());
    }

    #[tokio::test]
    async fn test_second_start_keeps_running_loop() {
        let locator = Arc::new(SwitchedLocator {
            available: AtomicBool::new(true),
            processor: Arc::new(InMemoryProcessor::new()),
        });
        let adapter = adapter(locator);

        adapter.start().await.unwrap();
        adapter.start().await.unwrap();
        assert!(adapter.is_running());

        adapter.stop().await.unwrap();
        adapter.stop().await.unwrap();
        assert!(!adapter.is_running());
    }
}
