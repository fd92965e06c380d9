//! # Binix Net - connection pooling and event dispatch
//!
//! The network core of the Binix browser: it decides which connection serves
//! a request, bounds connections per host, and carries lifecycle events from
//! I/O worker threads back to one heartbeat thread.
//!
//! ## Architecture
//!
//! - **events**: lock-free channels from workers to the heartbeat thread
//! - **network**: requests, responses, cache and the connection capability
//! - **pool**: per-variant connection pools, host entries, host registry
//! - **engine**: the [`HttpContext`] heartbeat, timers and request lifecycle
//! - **memory**: pooled buffers for streamed response chunks
//! - **devtools**: request channel inspection
//! - **utils**: shared error type and clocks

pub mod devtools;
pub mod engine;
pub mod events;
pub mod memory;
pub mod network;
pub mod pool;
pub mod utils;

// Re-export main types for convenience
pub use engine::{ClientConfig, HttpContext};
pub use events::EventSender;
pub use network::{
    Connection, ConnectionFactories, ConnectionFactory, ConnectionState, HttpRequest, Protocol,
    RequestHandle, RequestState, Response,
};
pub use pool::{ProtocolSupport, VariantKey};
pub use utils::error::{NetError, Result};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Binix Net";
