//! Core types for the resource adapter

use message_bus::{Action, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Channel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// External source to bus (sender channel)
    Inbound,
    /// Bus to external sink (receiver channel)
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Channel configuration, read-only to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel ID
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Owning party
    #[serde(default)]
    pub party: String,
    /// Owning service
    #[serde(default)]
    pub service: String,
    /// Direction
    pub direction: Direction,
    /// Adapter type the channel belongs to
    #[serde(default)]
    pub adapter_type: String,
    /// Adapter namespace the channel belongs to
    #[serde(default)]
    pub adapter_namespace: String,
    /// Property bag
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Channel {
    /// Create new channel without properties
    pub fn new(
        id: impl Into<String>,
        direction: Direction,
        adapter_type: impl Into<String>,
        adapter_namespace: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            party: String::new(),
            service: String::new(),
            direction,
            adapter_type: adapter_type.into(),
            adapter_namespace: adapter_namespace.into(),
            properties: HashMap::new(),
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Non-empty property value
    pub fn value(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Boolean property value; `None` when missing or malformed
    pub fn bool_value(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(|v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
    }

    /// Whether the channel belongs to the given adapter type and namespace
    pub fn belongs_to(&self, adapter_type: &str, adapter_namespace: &str) -> bool {
        self.adapter_type == adapter_type && self.adapter_namespace == adapter_namespace
    }
}

/// Header mapping of a binding: fields to override on outbound messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMapping {
    /// Mapped sender party
    pub from_party: Option<String>,
    /// Mapped sender service
    pub from_service: Option<String>,
    /// Mapped receiver party
    pub to_party: Option<String>,
    /// Mapped receiver service
    pub to_service: Option<String>,
}

impl HeaderMapping {
    /// Whether the mapping overrides nothing
    pub fn is_empty(&self) -> bool {
        self.from_party.is_none()
            && self.from_service.is_none()
            && self.to_party.is_none()
            && self.to_service.is_none()
    }

    /// Apply the mapping; unmapped fields keep the header's value
    pub fn apply(&self, header: &Header) -> Header {
        Header {
            from_party: self
                .from_party
                .clone()
                .unwrap_or_else(|| header.from_party.clone()),
            from_service: self
                .from_service
                .clone()
                .unwrap_or_else(|| header.from_service.clone()),
            to_party: self
                .to_party
                .clone()
                .unwrap_or_else(|| header.to_party.clone()),
            to_service: self
                .to_service
                .clone()
                .unwrap_or_else(|| header.to_service.clone()),
            action: header.action.clone(),
        }
    }
}

/// Agreement that binds a channel to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Bound channel ID
    pub channel_id: String,
    /// Address of the agreement
    pub header: Header,
    /// Optional header mapping
    #[serde(default)]
    pub header_mapping: Option<HeaderMapping>,
}

impl Binding {
    /// Create new binding without header mapping
    pub fn new(channel_id: impl Into<String>, header: Header) -> Self {
        Self {
            channel_id: channel_id.into(),
            header,
            header_mapping: None,
        }
    }

    /// Set header mapping
    pub fn with_header_mapping(mut self, mapping: HeaderMapping) -> Self {
        self.header_mapping = Some(mapping);
        self
    }

    /// Action of the agreement
    pub fn action(&self) -> &Action {
        &self.header.action
    }
}

/// Channel configuration change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotification {
    /// Channel added
    Added(Channel),
    /// Channel changed
    Updated(Channel),
    /// Channel removed
    Removed(Channel),
}

impl ChannelNotification {
    /// Channel the notification is about
    pub fn channel(&self) -> &Channel {
        match self {
            ChannelNotification::Added(c)
            | ChannelNotification::Updated(c)
            | ChannelNotification::Removed(c) => c,
        }
    }
}

/// Channel status as reported to monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Channel is operational
    Ok(String),
    /// Channel cannot work
    Error(String),
}

impl ChannelStatus {
    /// Whether the status is ok
    pub fn is_ok(&self) -> bool {
        matches!(self, ChannelStatus::Ok(_))
    }
}

/// Request info passed when a caller allocates a connection
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionRequestInfo {
    /// User name
    pub user_name: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Channel the connection is requested for
    pub channel_id: String,
}

impl ConnectionRequestInfo {
    /// Request info for a channel without user credentials
    pub fn for_channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    /// Set user credentials
    pub fn with_user(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for ConnectionRequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequestInfo")
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

/// What happens to a source item after delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Leave the item in place, no duplicate suppression
    Test,
    /// Rename the item to `<name>.sent`
    Rename,
}

impl FromStr for ProcessMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(ProcessMode::Test),
            "rename" => Ok(ProcessMode::Rename),
            other => Err(crate::Error::Config(format!("unknown process mode '{}'", other))),
        }
    }
}

/// How the outbound sink names its files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// One new numbered file per connection generation
    New,
    /// A single file, truncated on every write
    Replace,
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessMode::Test => write!(f, "test"),
            ProcessMode::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for FileMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(FileMode::New),
            "replace" => Ok(FileMode::Replace),
            other => Err(crate::Error::Config(format!("unknown file mode '{}'", other))),
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileMode::New => write!(f, "new"),
            FileMode::Replace => write!(f, "replace"),
        }
    }
}

/// Where inbound addresses come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// From the channel's binding
    Channel,
    /// Parsed from the item content
    Message,
}

impl FromStr for AddressMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" | "cpa" => Ok(AddressMode::Channel),
            "message" | "msg" => Ok(AddressMode::Message),
            other => Err(crate::Error::Config(format!("unknown address mode '{}'", other))),
        }
    }
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMode::Channel => write!(f, "channel"),
            AddressMode::Message => write!(f, "message"),
        }
    }
}

/// Deterministic error injection for inbound delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorInjection {
    /// No injected error
    None,
    /// Force a rollback after submission
    Rollback,
}

impl FromStr for ErrorInjection {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ErrorInjection::None),
            "rollback" => Ok(ErrorInjection::Rollback),
            other => Err(crate::Error::Config(format!(
                "unknown error injection '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ErrorInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorInjection::None => write!(f, "none"),
            ErrorInjection::Rollback => write!(f, "rollback"),
        }
    }
}
