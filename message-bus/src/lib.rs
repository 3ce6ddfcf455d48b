//! Message bus vocabulary shared by the adapter and the module processor
//!
//! Provides:
//! - Message envelope with addressing header, delivery semantics and main document
//! - Delivery semantics (exactly-once, exactly-once-in-order, best-effort)
//! - `MessageProcessor` trait for handing messages to the bus
//! - Processor locator for deferred resolution of the processor
//! - In-memory processor for tests and standalone runs
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod types;

pub use error::{Error, Result};
pub use message::{Message, Payload};
pub use processor::{InMemoryProcessor, MessageProcessor, ProcessorLocator, StaticLocator};
pub use types::{Action, DeliverySemantics, FaultInterface, Header, MessageClass};

/// Name given to the main document of every adapter message
pub const MAIN_DOCUMENT: &str = "MainDocument";
