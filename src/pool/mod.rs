//! Connection pooling
//!
//! - [`ConnectionPool`]: connections and pending requests for one variant key
//! - [`HostEntry`]: every pool of one host name
//! - [`HostRegistry`]: host name to entry, with protocol support persistence
//!
//! All of it is owned by the heartbeat thread; nothing here is locked.

mod connection_pool;
mod host;
mod registry;
mod store;
mod variant;

pub use connection_pool::{Acquire, ConnectionPool};
pub use host::{AltService, HostEntry};
pub use registry::{HostRegistry, RegistryState};
pub use store::{PersistedHost, PersistedVariant, ProtocolStore, STORE_VERSION};
pub use variant::{ProtocolSupport, VariantKey};

use std::sync::Arc;
use std::time::Duration;

use crate::events::EventSender;
use crate::network::ConnectionFactories;
use crate::utils::Clock;

/// What every pool needs from its context
pub struct PoolServices {
    pub factories: ConnectionFactories,
    pub events: EventSender,
    pub clock: Arc<dyn Clock>,
    /// Per-host limit on connections that are not idle
    pub max_connections: usize,
    pub keep_alive: Duration,
    pub recycle_check_interval: Duration,
}
