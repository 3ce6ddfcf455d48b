//! # File Resource Adapter
//!
//! Connector between a message bus and a file system:
//! - Pooled outbound connections, one managed connection per channel
//! - `send` and `call` interactions with a typed outcome taxonomy
//! - Inbound delivery loop with duplicate suppression and
//!   commit-then-rename ordering
//! - Channel configuration cache following registry notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │           ResourceAdapter (Lifecycle)                │
//! └──────┬───────────────────┬───────────────────┬───────┘
//!        │                   │                   │
//! ┌──────▼───────┐   ┌───────▼───────┐   ┌───────▼───────┐
//! │ Connection   │   │ Channel Cache │   │ Inbound       │
//! │ Manager      │   │ (watch)       │   │ Poller        │
//! └──────┬───────┘   └───────────────┘   └───────┬───────┘
//!        │                                       │
//! ┌──────▼───────┐                       ┌───────▼───────┐
//! │ Managed      │                       │ Processor     │
//! │ Connections  │──▶ out/<prefix>.N.txt │ Interaction   │──▶ bus
//! └──────────────┘                       └───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod addressing;
pub mod channel;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod inbound;
pub mod interaction;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod outcome;
pub mod ports;
pub mod settings;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use interaction::{Interaction, InteractionSpec, Record};
pub use lifecycle::{Lifecycle, ResourceAdapter};
pub use outcome::InteractionOutcome;
pub use ports::Collaborators;
pub use types::*;

/// Product name reported in connection metadata
pub const PRODUCT_NAME: &str = "File Resource Adapter";

/// Default adapter type
pub const DEFAULT_ADAPTER_TYPE: &str = "File";

/// Default adapter namespace
pub const DEFAULT_ADAPTER_NAMESPACE: &str = "urn:resource-adapter:file";

/// Default poll interval (milliseconds) when no channel configures one
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default lifetime of duplicate-suppression entries (seconds)
pub const DEFAULT_DUPLICATE_EXPIRY_SECONDS: u64 = 24 * 60 * 60;

/// Default request/response timeout (seconds)
pub const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 30;

/// Name of the dynamic message property carrying the channel ID
pub const CHANNEL_ID_PROPERTY: &str = "ChannelId";
