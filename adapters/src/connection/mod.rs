//! Outbound connection management
//!
//! ```text
//! ConnectionManager ──allocate──▶ ManagedConnectionFactory ──▶ ManagedConnection ──▶ OutboundSink
//!        │                               (index per channel)          │
//!        └──────────── PoolListener ◀──── events ────────────────────┘
//!                                                                     ▲
//!                                    ConnectionHandle ───────────────┘
//! ```

pub mod events;
pub mod factory;
pub mod handle;
pub mod managed;
pub mod manager;
pub mod resource;

pub use events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener};
pub use factory::{FactoryKey, ManagedConnectionFactory};
pub use handle::ConnectionHandle;
pub use managed::{ConnectionMetadata, ConnectionState, ManagedConnection};
pub use manager::{ConnectionManager, PoolListener};
pub use resource::{FileSequence, OutboundSink};
