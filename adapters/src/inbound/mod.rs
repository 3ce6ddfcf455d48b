//! Inbound delivery: sources and the polling loop

pub mod poller;
pub mod source;

pub use poller::{ChannelReport, CycleReport, InboundPoller, ItemResult};
pub use source::{FileSource, FileSourceProvider, InboundSource, SourceProvider, WorkItem};
