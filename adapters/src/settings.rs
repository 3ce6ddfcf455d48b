//! Typed per-channel settings read from the channel property bag
//!
//! Missing values fall back to documented defaults; malformed values are
//! logged and replaced by the default as well, so one misconfigured
//! channel never stops the others.

use crate::config::Config;
use crate::outcome::OutcomePolicy;
use crate::types::{AddressMode, Channel, ErrorInjection, FileMode, ProcessMode};
use message_bus::{DeliverySemantics, FaultInterface};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Channel property keys
pub mod keys {
    /// Inbound source directory
    pub const SOURCE_DIRECTORY: &str = "source.directory";
    /// Inbound source file name
    pub const SOURCE_FILE_NAME: &str = "source.file_name";
    /// Poll interval, seconds part
    pub const POLL_INTERVAL_SECS: &str = "poll.interval_secs";
    /// Poll interval, milliseconds part
    pub const POLL_INTERVAL_MS: &str = "poll.interval_ms";
    /// Process mode (`test` or `rename`)
    pub const PROCESS_MODE: &str = "process_mode";
    /// Quality of service (`EO`, `EOIO`, `BE`)
    pub const QOS: &str = "qos";
    /// Error injection (`none` or `rollback`)
    pub const RAISE_ERROR: &str = "raise_error";
    /// Address determination (`channel` or `message`)
    pub const ADDRESS_MODE: &str = "address_mode";
    /// Set the channel ID as message property (inbound)
    pub const SET_CHANNEL_ID_PROPERTY: &str = "dynamic.set_channel_id";
    /// Read the channel ID message property (outbound)
    pub const READ_CHANNEL_ID_PROPERTY: &str = "dynamic.read_channel_id";
    /// Fail when a read message property is missing (outbound)
    pub const FAIL_ON_MISSING_PROPERTY: &str = "dynamic.fail_on_missing";
    /// Outbound sink directory
    pub const SINK_DIRECTORY: &str = "sink.directory";
    /// Outbound sink file name prefix
    pub const SINK_PREFIX: &str = "sink.prefix";
    /// Outbound file mode (`new` or `replace`)
    pub const FILE_MODE: &str = "sink.file_mode";
    /// Fault interface name
    pub const FAULT_INTERFACE: &str = "fault.interface";
    /// Fault interface namespace
    pub const FAULT_INTERFACE_NAMESPACE: &str = "fault.namespace";
    /// Element path of the response file name in call requests
    pub const RESPONSE_FILE_ELEMENT: &str = "call.response_file_element";
    /// Outcome policy (`disabled`, `markers`, or a forced outcome)
    pub const OUTCOME_POLICY: &str = "outcome_policy";
}

fn parsed_or<T>(channel: &Channel, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match channel.value(key) {
        None => {
            debug!(channel_id = %channel.id, "No {} configured, using {}", key, default);
            default
        }
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(
                channel_id = %channel.id,
                "Invalid {} '{}' ({}), using {}", key, raw, e, default
            );
            default
        }),
    }
}

fn bool_or(channel: &Channel, key: &str, default: bool) -> bool {
    match (channel.value(key), channel.bool_value(key)) {
        (None, _) => default,
        (Some(_), Some(value)) => value,
        (Some(raw), None) => {
            warn!(channel_id = %channel.id, "Invalid {} '{}', using {}", key, raw, default);
            default
        }
    }
}

fn poll_interval(channel: &Channel) -> Option<Duration> {
    let secs: u64 = parsed_or(channel, keys::POLL_INTERVAL_SECS, 0);
    let millis: u64 = parsed_or(channel, keys::POLL_INTERVAL_MS, 0);
    let total = Duration::from_secs(secs) + Duration::from_millis(millis);
    (!total.is_zero()).then_some(total)
}

fn fault_interface(channel: &Channel, config: &Config) -> FaultInterface {
    FaultInterface {
        name: channel
            .value(keys::FAULT_INTERFACE)
            .unwrap_or(&config.interaction.fault_interface)
            .to_string(),
        namespace: channel
            .value(keys::FAULT_INTERFACE_NAMESPACE)
            .unwrap_or(&config.interaction.fault_interface_namespace)
            .to_string(),
    }
}

/// Settings of an inbound channel
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSettings {
    /// Source directory
    pub directory: PathBuf,
    /// Source file name
    pub file_name: String,
    /// Poll interval, if the channel configures one
    pub poll_interval: Option<Duration>,
    /// Process mode
    pub process_mode: ProcessMode,
    /// Quality of service
    pub qos: DeliverySemantics,
    /// Error injection
    pub error_injection: ErrorInjection,
    /// Address determination mode
    pub address_mode: AddressMode,
    /// Set the channel ID as message property
    pub set_channel_id_property: bool,
    /// Outcome policy
    pub outcome_policy: OutcomePolicy,
    /// Fault interface for application errors
    pub fault: FaultInterface,
}

impl InboundSettings {
    /// Read the settings of `channel`
    pub fn from_channel(channel: &Channel, config: &Config) -> Self {
        let directory = channel
            .value(keys::SOURCE_DIRECTORY)
            .map(PathBuf::from)
            .unwrap_or_else(|| config.inbound.directory.clone());
        let file_name = channel
            .value(keys::SOURCE_FILE_NAME)
            .unwrap_or(&config.inbound.file_name)
            .to_string();

        Self {
            directory,
            file_name,
            poll_interval: poll_interval(channel),
            process_mode: parsed_or(channel, keys::PROCESS_MODE, ProcessMode::Test),
            qos: parsed_or(channel, keys::QOS, DeliverySemantics::ExactlyOnce),
            error_injection: parsed_or(channel, keys::RAISE_ERROR, ErrorInjection::None),
            address_mode: parsed_or(channel, keys::ADDRESS_MODE, config.address_mode),
            set_channel_id_property: bool_or(channel, keys::SET_CHANNEL_ID_PROPERTY, false),
            outcome_policy: parsed_or(
                channel,
                keys::OUTCOME_POLICY,
                config.interaction.outcome_policy,
            ),
            fault: fault_interface(channel, config),
        }
    }

    /// Full path of the source item
    pub fn source_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Whether delivered items are tracked for duplicates
    pub fn suppresses_duplicates(&self) -> bool {
        self.process_mode != ProcessMode::Test && self.qos.requires_duplicate_check()
    }
}

/// Settings of an outbound channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSettings {
    /// Sink directory
    pub directory: PathBuf,
    /// Sink file name prefix
    pub prefix: String,
    /// File mode
    pub file_mode: FileMode,
    /// Require the channel ID message property
    pub read_channel_id_property: bool,
    /// Fail when the channel ID message property is missing
    pub fail_on_missing_property: bool,
    /// Fault interface for application errors
    pub fault: FaultInterface,
    /// Element path of the response file name in call requests
    pub response_file_element: Option<String>,
    /// Outcome policy
    pub outcome_policy: OutcomePolicy,
}

impl OutboundSettings {
    /// Read the settings of `channel`
    pub fn from_channel(channel: &Channel, config: &Config) -> Self {
        let directory = channel
            .value(keys::SINK_DIRECTORY)
            .map(PathBuf::from)
            .unwrap_or_else(|| config.outbound.directory.clone());
        let prefix = channel
            .value(keys::SINK_PREFIX)
            .unwrap_or(&config.outbound.prefix)
            .to_string();

        Self {
            directory,
            prefix,
            file_mode: parsed_or(channel, keys::FILE_MODE, FileMode::New),
            read_channel_id_property: bool_or(channel, keys::READ_CHANNEL_ID_PROPERTY, false),
            fail_on_missing_property: bool_or(channel, keys::FAIL_ON_MISSING_PROPERTY, false),
            fault: fault_interface(channel, config),
            response_file_element: channel.value(keys::RESPONSE_FILE_ELEMENT).map(str::to_string),
            outcome_policy: parsed_or(
                channel,
                keys::OUTCOME_POLICY,
                config.interaction.outcome_policy,
            ),
        }
    }

    /// Sink path without generation suffix
    pub fn base_path(&self) -> PathBuf {
        self.directory.join(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ForcedOutcome;
    use crate::types::Direction;

    fn inbound(props: &[(&str, &str)]) -> Channel {
        props.iter().fold(
            Channel::new("in-1", Direction::Inbound, "File", "urn:f"),
            |c, (k, v)| c.with_property(k, *v),
        )
    }

    #[test]
    fn test_inbound_defaults() {
        let config = Config::default();
        let settings = InboundSettings::from_channel(&inbound(&[]), &config);

        assert_eq!(settings.directory, config.inbound.directory);
        assert_eq!(settings.file_name, "in.txt");
        assert_eq!(settings.process_mode, ProcessMode::Test);
        assert_eq!(settings.qos, DeliverySemantics::ExactlyOnce);
        assert_eq!(settings.error_injection, ErrorInjection::None);
        assert_eq!(settings.address_mode, AddressMode::Channel);
        assert_eq!(settings.poll_interval, None);
        assert_eq!(settings.fault.name, "AdapterFault");
        assert!(!settings.suppresses_duplicates());
    }

    #[test]
    fn test_inbound_values() {
        let settings = InboundSettings::from_channel(
            &inbound(&[
                (keys::SOURCE_DIRECTORY, "/tmp/in"),
                (keys::SOURCE_FILE_NAME, "order.xml"),
                (keys::POLL_INTERVAL_SECS, "2"),
                (keys::POLL_INTERVAL_MS, "500"),
                (keys::PROCESS_MODE, "rename"),
                (keys::QOS, "EOIO"),
                (keys::RAISE_ERROR, "rollback"),
                (keys::ADDRESS_MODE, "message"),
                (keys::OUTCOME_POLICY, "recoverable_failure"),
            ]),
            &Config::default(),
        );

        assert_eq!(settings.source_path(), PathBuf::from("/tmp/in/order.xml"));
        assert_eq!(settings.poll_interval, Some(Duration::from_millis(2_500)));
        assert_eq!(settings.qos, DeliverySemantics::ExactlyOnceInOrder);
        assert_eq!(settings.error_injection, ErrorInjection::Rollback);
        assert_eq!(settings.address_mode, AddressMode::Message);
        assert_eq!(
            settings.outcome_policy,
            OutcomePolicy::Force(ForcedOutcome::RecoverableFailure)
        );
        assert!(settings.suppresses_duplicates());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let settings = InboundSettings::from_channel(
            &inbound(&[(keys::QOS, "FAST"), (keys::POLL_INTERVAL_SECS, "soon")]),
            &Config::default(),
        );

        assert_eq!(settings.qos, DeliverySemantics::ExactlyOnce);
        assert_eq!(settings.poll_interval, None);
    }

    #[test]
    fn test_best_effort_never_suppresses_duplicates() {
        let settings = InboundSettings::from_channel(
            &inbound(&[(keys::QOS, "BE"), (keys::PROCESS_MODE, "rename")]),
            &Config::default(),
        );
        assert!(!settings.suppresses_duplicates());
    }

    #[test]
    fn test_outbound_settings() {
        let channel = Channel::new("out-1", Direction::Outbound, "File", "urn:f")
            .with_property(keys::SINK_DIRECTORY, "/tmp/out")
            .with_property(keys::SINK_PREFIX, "orders")
            .with_property(keys::FILE_MODE, "replace")
            .with_property(keys::FAULT_INTERFACE, "OrderFault");
        let settings = OutboundSettings::from_channel(&channel, &Config::default());

        assert_eq!(settings.base_path(), PathBuf::from("/tmp/out/orders"));
        assert_eq!(settings.file_mode, FileMode::Replace);
        assert_eq!(settings.fault.name, "OrderFault");
        assert_eq!(settings.fault.namespace, "urn:resource-adapter:fault");
    }
}
