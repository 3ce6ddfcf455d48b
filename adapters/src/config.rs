//! Configuration for the resource adapter

use crate::outcome::OutcomePolicy;
use crate::types::{AddressMode, Binding, Channel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter type, used to select channels
    pub adapter_type: String,

    /// Adapter namespace, used to select channels
    pub adapter_namespace: String,

    /// Default address determination mode for inbound channels
    pub address_mode: AddressMode,

    /// Delivery loop configuration
    pub delivery: DeliveryConfig,

    /// Interaction configuration
    pub interaction: InteractionConfig,

    /// Defaults for inbound channels
    pub inbound: InboundDefaults,

    /// Defaults for outbound channels
    pub outbound: OutboundDefaults,

    /// Channels registered at startup (standalone mode)
    pub channels: Vec<Channel>,

    /// Bindings registered at startup (standalone mode)
    pub bindings: Vec<Binding>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter_type: crate::DEFAULT_ADAPTER_TYPE.to_string(),
            adapter_namespace: crate::DEFAULT_ADAPTER_NAMESPACE.to_string(),
            address_mode: AddressMode::Channel,
            delivery: DeliveryConfig::default(),
            interaction: InteractionConfig::default(),
            inbound: InboundDefaults::default(),
            outbound: OutboundDefaults::default(),
            channels: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

/// Delivery loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Poll interval when no channel configures one (milliseconds)
    pub default_poll_interval_ms: u64,

    /// Bounded wait for the loop to finish on stop (milliseconds)
    pub stop_timeout_ms: u64,

    /// Attempts to resolve the message processor before giving up
    pub processor_lookup_attempts: u32,

    /// Wait between processor lookups (milliseconds)
    pub processor_lookup_wait_ms: u64,

    /// Lifetime of duplicate-suppression entries (seconds)
    pub duplicate_expiry_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
            stop_timeout_ms: 10_000,
            processor_lookup_attempts: 10,
            processor_lookup_wait_ms: 1_000,
            duplicate_expiry_secs: crate::DEFAULT_DUPLICATE_EXPIRY_SECONDS,
        }
    }
}

impl DeliveryConfig {
    /// Default poll interval
    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_millis(self.default_poll_interval_ms)
    }

    /// Stop timeout
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Wait between processor lookups
    pub fn processor_lookup_wait(&self) -> Duration {
        Duration::from_millis(self.processor_lookup_wait_ms)
    }

    /// Duplicate-suppression expiry
    pub fn duplicate_expiry(&self) -> Duration {
        Duration::from_secs(self.duplicate_expiry_secs)
    }
}

/// Interaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Timeout of request/response calls (seconds)
    pub call_timeout_secs: u64,

    /// Outcome policy when the channel does not set one
    pub outcome_policy: OutcomePolicy,

    /// Fault interface name when the channel does not set one
    pub fault_interface: String,

    /// Fault interface namespace when the channel does not set one
    pub fault_interface_namespace: String,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: crate::DEFAULT_CALL_TIMEOUT_SECONDS,
            outcome_policy: OutcomePolicy::default(),
            fault_interface: "AdapterFault".to_string(),
            fault_interface_namespace: "urn:resource-adapter:fault".to_string(),
        }
    }
}

/// Defaults for inbound channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundDefaults {
    /// Source directory
    pub directory: PathBuf,

    /// Source file name
    pub file_name: String,
}

impl Default for InboundDefaults {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/in"),
            file_name: "in.txt".to_string(),
        }
    }
}

/// Defaults for outbound channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundDefaults {
    /// Sink directory
    pub directory: PathBuf,

    /// Sink file name prefix
    pub prefix: String,
}

impl Default for OutboundDefaults {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/out"),
            prefix: "out".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(adapter_type) = std::env::var("ADAPTER_TYPE") {
            config.adapter_type = adapter_type;
        }

        if let Ok(namespace) = std::env::var("ADAPTER_NAMESPACE") {
            config.adapter_namespace = namespace;
        }

        if let Ok(mode) = std::env::var("ADAPTER_ADDRESS_MODE") {
            config.address_mode = mode.parse()?;
        }

        if let Ok(interval) = std::env::var("ADAPTER_POLL_INTERVAL_MS") {
            config.delivery.default_poll_interval_ms = interval.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid ADAPTER_POLL_INTERVAL_MS: {}", e))
            })?;
        }

        if let Ok(dir) = std::env::var("ADAPTER_IN_DIR") {
            config.inbound.directory = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("ADAPTER_OUT_DIR") {
            config.outbound.directory = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.interaction.call_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ForcedOutcome;
    use crate::types::Direction;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.delivery.default_poll_interval_ms, 5_000);
        assert_eq!(config.delivery.duplicate_expiry(), Duration::from_secs(86_400));
        assert_eq!(config.address_mode, AddressMode::Channel);
        assert_eq!(config.interaction.outcome_policy, OutcomePolicy::PayloadMarkers);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.toml");
        std::fs::write(
            &path,
            r#"
adapter_type = "File"
address_mode = "message"

[delivery]
default_poll_interval_ms = 250

[interaction]
outcome_policy = { force = "permanent_failure" }

[[channels]]
id = "in-1"
direction = "inbound"
adapter_type = "File"

[channels.properties]
qos = "EOIO"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.adapter_type, "File");
        assert_eq!(config.address_mode, AddressMode::Message);
        assert_eq!(config.delivery.default_poll_interval_ms, 250);
        assert_eq!(config.delivery.processor_lookup_attempts, 10);
        assert_eq!(
            config.interaction.outcome_policy,
            OutcomePolicy::Force(ForcedOutcome::PermanentFailure)
        );
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].direction, Direction::Inbound);
        assert_eq!(config.channels[0].value("qos"), Some("EOIO"));
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "adapter_type = [").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }
}
