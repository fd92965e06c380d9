//! Client configuration

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for an [`HttpContext`](super::HttpContext)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connections per variant key that may be busy at once
    pub max_connections_per_host: usize,
    /// Idle time after which a free connection is closed
    pub keep_alive: Duration,
    /// How often a free connection's idle time is checked
    pub recycle_check_interval: Duration,
    /// How often a queued or in-flight request's deadline is checked
    pub timeout_check_interval: Duration,
    /// Default processing timeout
    pub request_timeout: Duration,
    /// Default time a request may wait for a connection
    pub connect_timeout: Duration,
    /// Persisted protocol support older than this is ignored
    pub protocol_support_ttl: Duration,
    /// Protocol support store; `None` keeps it in memory
    pub store_path: Option<PathBuf>,
    /// HTTP cache store; `None` keeps the cache in memory
    pub cache_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 6,
            keep_alive: Duration::from_secs(20),
            recycle_check_interval: Duration::from_secs(1),
            timeout_check_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(20),
            protocol_support_ttl: Duration::from_secs(24 * 60 * 60),
            store_path: None,
            cache_path: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = max.max(1);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_recycle_check_interval(mut self, interval: Duration) -> Self {
        self.recycle_check_interval = interval;
        self
    }

    pub fn with_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_protocol_support_ttl(mut self, ttl: Duration) -> Self {
        self.protocol_support_ttl = ttl;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }
}
