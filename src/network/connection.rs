//! Connection capability consumed by the pools
//!
//! Transports (HTTP/1, HTTP/2, WebSocket upgrade, file, ...) live outside
//! this crate. They implement [`Connection`], usually by embedding a
//! [`ConnectionBase`], and are built by the [`ConnectionFactory`] registered
//! for their URI scheme.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::request::RequestHandle;
use crate::events::EventSender;
use crate::pool::VariantKey;
use crate::utils::{NetError, Result};

/// Unique connection identifier
pub type ConnectionId = u64;

/// Externally visible connection state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, not yet used
    Initial = 0,
    /// Serving a request
    Processing = 1,
    /// An upgraded protocol on top of it is draining
    WaitForProtocolShutdown = 2,
    /// Finished its request, waiting for the pool to take it back
    Recycle = 3,
    /// Idle in the pool
    Free = 4,
    /// Gone
    Closed = 5,
    /// Died mid-flight; its request must go out again
    ClosedResendRequest = 6,
}

impl ConnectionState {
    /// Idle connections do not count against the per-host limit
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Initial | ConnectionState::Free)
    }

    pub fn is_closed(self) -> bool {
        matches!(
            self,
            ConnectionState::Closed | ConnectionState::ClosedResendRequest
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Processing,
            2 => Self::WaitForProtocolShutdown,
            3 => Self::Recycle,
            4 => Self::Free,
            5 => Self::Closed,
            _ => Self::ClosedResendRequest,
        }
    }
}

/// How hard to close a connection or protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Finish in-flight work first
    Gentle,
    /// Drop everything now
    Immediate,
}

/// A physical transport session owned by exactly one pool
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Pool this connection belongs to
    fn key(&self) -> &VariantKey;

    fn state(&self) -> ConnectionState;

    fn set_state(&self, state: ConnectionState);

    /// True for multiplexing transports such as HTTP/2
    fn can_process_multiple(&self) -> bool {
        false
    }

    /// When the connection last finished work
    fn last_process_time(&self) -> Instant;

    /// How long it may sit idle before the pool closes it
    fn keep_alive(&self) -> Duration;

    /// Liveness probe before reuse
    fn test_connection(&self) -> bool {
        true
    }

    /// Start serving `request` on a worker; must not block the caller
    fn process(&self, request: RequestHandle);

    /// Request currently in flight, if any
    fn current_request(&self) -> Option<RequestHandle> {
        None
    }

    fn shutdown(&self, kind: ShutdownKind) -> Result<()>;

    /// Release OS resources
    fn dispose(&self);
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("key", &self.key().to_string())
            .field("state", &self.state())
            .finish()
    }
}

/// Bookkeeping most connection implementations share
pub struct ConnectionBase {
    id: ConnectionId,
    key: VariantKey,
    keep_alive: Duration,
    state: AtomicU8,
    last_process_time: Mutex<Instant>,
    current: Mutex<Option<RequestHandle>>,
}

impl ConnectionBase {
    pub fn new(id: ConnectionId, key: VariantKey, keep_alive: Duration, now: Instant) -> Self {
        Self {
            id,
            key,
            keep_alive,
            state: AtomicU8::new(ConnectionState::Initial as u8),
            last_process_time: Mutex::new(now),
            current: Mutex::new(None),
        }
    }

    /// Build from the parameters a factory receives
    pub fn from_params(params: &NewConnection<'_>) -> Self {
        Self::new(params.id, params.key.clone(), params.keep_alive, params.now)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn last_process_time(&self) -> Instant {
        *self
            .last_process_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that work just finished
    pub fn touch(&self, now: Instant) {
        *self
            .last_process_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn current_request(&self) -> Option<RequestHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_request(&self, request: Option<RequestHandle>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = request;
    }
}

/// Everything a factory needs to build a connection
pub struct NewConnection<'a> {
    pub id: ConnectionId,
    pub key: &'a VariantKey,
    pub keep_alive: Duration,
    pub now: Instant,
    /// Where the connection's workers report back
    pub events: &'a EventSender,
}

/// Builds the connection implementation for one URI scheme
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, params: NewConnection<'_>) -> Result<Arc<dyn Connection>>;
}

/// Scheme to factory map
#[derive(Clone, Default)]
pub struct ConnectionFactories {
    by_scheme: HashMap<String, Arc<dyn ConnectionFactory>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the implementation used for `scheme`, replacing any previous one
    pub fn register(
        &mut self,
        scheme: &str,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Option<Arc<dyn ConnectionFactory>> {
        self.by_scheme.insert(scheme.to_ascii_lowercase(), factory)
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, scheme: &str, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.register(scheme, factory);
        self
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.by_scheme.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Build a connection for `key` with a fresh id
    pub fn create(
        &self,
        key: &VariantKey,
        keep_alive: Duration,
        now: Instant,
        events: &EventSender,
    ) -> Result<Arc<dyn Connection>> {
        let factory = self
            .by_scheme
            .get(key.scheme())
            .ok_or_else(|| NetError::UnsupportedScheme(key.scheme().to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        factory.create(NewConnection {
            id,
            key,
            keep_alive,
            now,
            events,
        })
    }
}
