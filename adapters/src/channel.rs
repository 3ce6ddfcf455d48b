//! Channel configuration cache
//!
//! Holds the adapter's inbound and outbound channels. The delivery loop
//! reads a snapshot at the start of each cycle, so changes become visible
//! at the next cycle, never mid-cycle.

use crate::config::Config;
use crate::connection::ManagedConnectionFactory;
use crate::ports::ChannelLookup;
use crate::settings::{InboundSettings, OutboundSettings};
use crate::types::{Channel, ChannelNotification, ChannelStatus, Direction};
use crate::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inbound and outbound channels of one adapter type
pub struct ChannelCache {
    config: Arc<Config>,
    lookup: Arc<dyn ChannelLookup>,
    factory: Arc<ManagedConnectionFactory>,
    inbound: RwLock<Vec<Channel>>,
    outbound: RwLock<Vec<Channel>>,
}

impl ChannelCache {
    /// Create an empty cache
    pub fn new(
        config: Arc<Config>,
        lookup: Arc<dyn ChannelLookup>,
        factory: Arc<ManagedConnectionFactory>,
    ) -> Self {
        Self {
            config,
            lookup,
            factory,
            inbound: RwLock::new(Vec::new()),
            outbound: RwLock::new(Vec::new()),
        }
    }

    /// Load all channels of the adapter's type and namespace
    pub async fn init(&self) -> Result<()> {
        let channels = self
            .lookup
            .channels_by_type(&self.config.adapter_type, &self.config.adapter_namespace)
            .await?;

        let (inbound, outbound): (Vec<_>, Vec<_>) = channels
            .into_iter()
            .partition(|c| c.direction == Direction::Inbound);
        info!(
            "Channel cache loaded: {} inbound, {} outbound",
            inbound.len(),
            outbound.len()
        );
        *self.inbound.write() = inbound;
        *self.outbound.write() = outbound;
        Ok(())
    }

    /// Copy of the channels of one direction
    pub fn snapshot(&self, direction: Direction) -> Vec<Channel> {
        self.list(direction).read().clone()
    }

    /// Cached channel by ID
    pub fn get(&self, channel_id: &str) -> Option<Channel> {
        [&self.inbound, &self.outbound]
            .iter()
            .find_map(|l| l.read().iter().find(|c| c.id == channel_id).cloned())
    }

    fn list(&self, direction: Direction) -> &RwLock<Vec<Channel>> {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn add(&self, channel: &Channel) {
        let mut list = self.list(channel.direction).write();
        list.retain(|c| c.id != channel.id);
        list.push(channel.clone());
    }

    fn remove(&self, channel: &Channel) {
        self.inbound.write().retain(|c| c.id != channel.id);
        self.outbound.write().retain(|c| c.id != channel.id);

        if channel.direction == Direction::Outbound {
            if let Err(e) = self.factory.destroy_managed_connection(&channel.id) {
                warn!(
                    channel_id = %channel.id,
                    "Failed to destroy managed connection of removed channel: {}", e
                );
            }
        }
    }

    /// Apply a configuration change. Channels of other adapter types are ignored.
    pub fn apply(&self, notification: &ChannelNotification) {
        let channel = notification.channel();
        if !channel.belongs_to(&self.config.adapter_type, &self.config.adapter_namespace) {
            debug!(channel_id = %channel.id, "Ignoring channel of another adapter type");
            return;
        }

        match notification {
            ChannelNotification::Added(c) => {
                info!(channel_id = %c.id, "Channel added ({})", c.direction);
                self.add(c);
            }
            ChannelNotification::Updated(c) => {
                info!(channel_id = %c.id, "Channel updated ({})", c.direction);
                self.remove(c);
                self.add(c);
            }
            ChannelNotification::Removed(c) => {
                info!(channel_id = %c.id, "Channel removed ({})", c.direction);
                self.remove(c);
            }
        }
    }

    /// Consume notifications until `cancel` fires
    pub async fn watch(
        self: Arc<Self>,
        mut notifications: broadcast::Receiver<ChannelNotification>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Channel watcher stopped");
                    return;
                }
                received = notifications.recv() => match received {
                    Ok(notification) => self.apply(&notification),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} channel notifications, reloading", skipped);
                        if let Err(e) = self.init().await {
                            error!("Channel reload failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Channel notification stream closed");
                        return;
                    }
                },
            }
        }
    }

    /// Status of a channel for monitoring
    pub fn channel_status(&self, channel_id: &str, running: bool) -> ChannelStatus {
        let Some(channel) = self.get(channel_id) else {
            return ChannelStatus::Error(format!("Channel {} is unknown to the adapter", channel_id));
        };

        match channel.direction {
            Direction::Inbound => {
                let settings = InboundSettings::from_channel(&channel, &self.config);
                if !settings.directory.is_dir() {
                    ChannelStatus::Error(format!(
                        "Source directory {} does not exist",
                        settings.directory.display()
                    ))
                } else if !running {
                    ChannelStatus::Error("Delivery loop is not running".to_string())
                } else {
                    ChannelStatus::Ok(format!("Polling {}", settings.source_path().display()))
                }
            }
            Direction::Outbound => {
                let settings = OutboundSettings::from_channel(&channel, &self.config);
                if !settings.directory.is_dir() {
                    ChannelStatus::Error(format!(
                        "Sink directory {} does not exist",
                        settings.directory.display()
                    ))
                } else {
                    ChannelStatus::Ok(format!("Writing to {}", settings.base_path().display()))
                }
            }
        }
    }
}
