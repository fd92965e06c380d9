//! HTTP context: the heartbeat that owns every pool
//!
//! The host application calls [`HttpContext::tick`] on a fixed cadence. One
//! tick drains the four event channels in order (connection, protocol,
//! request, plugin), then runs whatever timers came due:
//! 1. Connection events recycle, remove or resend through the pools
//! 2. Protocol events pump upgraded sessions
//! 3. Request events drive the request lifecycle and user callbacks
//! 4. Plugin events are batched (one cache save per tick)

mod config;
mod lifecycle;
mod protocol;
mod timer;

pub use config::ClientConfig;
pub use protocol::ProtocolRouter;
pub use timer::{TimerAction, TimerOutcome, TimerQueue};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::events::{
    ConnectionEvent, ConnectionEventKind, EventHub, EventSender, PluginEvent, ProtocolEvent,
};
use crate::memory::BufferPool;
use crate::network::{
    ConnectionFactories, ConnectionState, HttpCache, RequestHandle, ResponseCache, ShutdownKind,
};
use crate::pool::{HostRegistry, PoolServices, ProtocolStore};
use crate::utils::{Clock, Result, SystemClock};

/// Consumer-side state; touched only from the heartbeat thread
struct Dispatcher {
    registry: HostRegistry,
    timers: TimerQueue,
    protocols: ProtocolRouter,
    cache: Box<dyn ResponseCache>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    connect_timeout: Duration,
    timeout_check_interval: Duration,
    recycle_check_interval: Duration,
}

impl Dispatcher {
    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent {
            connection,
            request,
            kind,
        } = event;
        let key = connection.key().clone();
        let id = connection.id();

        match kind {
            ConnectionEventKind::StateChanged(ConnectionState::Recycle) => {
                if let Some(pool) = self.registry.find_pool(&key) {
                    pool.recycle(id, &mut self.timers);
                    pool.try_to_send_queued();
                }
            }
            ConnectionEventKind::StateChanged(ConnectionState::Free) => {
                self.registry.try_to_send_queued_for(&key);
            }
            ConnectionEventKind::StateChanged(ConnectionState::Closed) => {
                if let Some(pool) = self.registry.find_pool(&key) {
                    pool.remove(id, ConnectionState::Closed);
                    pool.try_to_send_queued();
                }
            }
            ConnectionEventKind::StateChanged(ConnectionState::ClosedResendRequest) => {
                let request = request.or_else(|| connection.current_request());
                if let Some(pool) = self.registry.find_pool(&key) {
                    pool.remove(id, ConnectionState::ClosedResendRequest);
                }
                if let Some(request) = request {
                    log::debug!("{}: connection {} closed, resending request {}", key, id, request.id());
                    self.events.resend(request);
                }
                self.registry.try_to_send_queued_for(&key);
            }
            ConnectionEventKind::StateChanged(ConnectionState::WaitForProtocolShutdown) => {
                log::debug!("{}: connection {} waiting for its protocol to close", key, id);
            }
            ConnectionEventKind::StateChanged(state) => {
                log::trace!("{}: connection {} is {:?}", key, id, state);
            }
            ConnectionEventKind::ProtocolSupport(support) => {
                self.registry.update_protocol_support(&key, support);
            }
        }
    }

    fn on_protocol_event(&mut self, event: ProtocolEvent) {
        let protocol = event.protocol;
        if panic::catch_unwind(AssertUnwindSafe(|| protocol.handle_events())).is_err() {
            log::error!("protocol {} panicked while handling events", protocol.id());
        }
        if protocol.is_closed() {
            self.protocols.remove(protocol.id());
            self.registry.try_to_send_queued_for(protocol.key());
        }
    }

    fn on_plugin_event(&mut self, event: PluginEvent, save_cache: &mut bool) {
        match event {
            PluginEvent::SaveCache => *save_cache = true,
            PluginEvent::AltSvcHeader { host, value } => {
                self.registry.get_or_create(&host).set_alt_svc_header(&value);
            }
        }
    }

    fn save_cache(&self) {
        if let Err(err) = self.cache.save() {
            log::warn!("saving HTTP cache failed: {}", err);
        }
    }

    fn run_timers(&mut self) -> usize {
        let now = self.clock.now();
        let mut repeat = Vec::new();
        let mut ran = 0;

        while let Some(action) = self.timers.pop_due(now) {
            ran += 1;
            let outcome = match &action {
                TimerAction::RecycleCheck { key, connection } => self
                    .registry
                    .find_pool(key)
                    .map_or(TimerOutcome::Done, |pool| pool.recycle_check(*connection)),
                TimerAction::RequestTimeout { request } => self.check_timeout(request, now),
            };
            if outcome == TimerOutcome::Repeat {
                repeat.push(action);
            }
        }

        for action in repeat {
            let interval = match action {
                TimerAction::RecycleCheck { .. } => self.recycle_check_interval,
                TimerAction::RequestTimeout { .. } => self.timeout_check_interval,
            };
            self.timers.schedule(now + interval, action);
        }
        ran
    }
}

/// Application-owned HTTP context
pub struct HttpContext {
    config: ClientConfig,
    events: EventHub,
    core: Dispatcher,
}

impl HttpContext {
    /// Create a context on the system clock
    pub fn new(config: ClientConfig, factories: ConnectionFactories) -> Self {
        Self::with_clock(config, factories, Arc::new(SystemClock))
    }

    /// Create a context reading time from `clock`
    pub fn with_clock(
        config: ClientConfig,
        factories: ConnectionFactories,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = EventHub::new(BufferPool::default());
        let sender = events.sender();
        let services = Arc::new(PoolServices {
            factories,
            events: sender.clone(),
            clock: Arc::clone(&clock),
            max_connections: config.max_connections_per_host,
            keep_alive: config.keep_alive,
            recycle_check_interval: config.recycle_check_interval,
        });
        let registry = HostRegistry::new(
            services,
            ProtocolStore::new(config.store_path.clone()),
            config.protocol_support_ttl,
        );

        let cache = match &config.cache_path {
            Some(path) => {
                let cache = HttpCache::new().with_store(path);
                if let Err(err) = cache.load_store() {
                    log::warn!("ignoring HTTP cache at {}: {}", path.display(), err);
                }
                cache
            }
            None => HttpCache::new(),
        };

        let core = Dispatcher {
            registry,
            timers: TimerQueue::new(),
            protocols: ProtocolRouter::new(),
            cache: Box::new(cache),
            events: sender,
            clock,
            request_timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
            timeout_check_interval: config.timeout_check_interval,
            recycle_check_interval: config.recycle_check_interval,
        };

        Self {
            config,
            events,
            core,
        }
    }

    /// Replace the cache used for failure fallback and "save cache" events
    pub fn with_cache(mut self, cache: Box<dyn ResponseCache>) -> Self {
        self.core.cache = cache;
        self
    }

    /// Load persisted protocol support; `send` does this on first use too
    pub fn init(&mut self) {
        self.core.registry.ensure_loaded();
    }

    /// Producer handle for connection and protocol implementations
    pub fn sender(&self) -> EventSender {
        self.events.sender()
    }

    /// Submit a request
    ///
    /// Errors (bad URI, unsupported scheme) are also recorded on the request,
    /// which then completes with `Error` on a later tick.
    pub fn send(&mut self, request: RequestHandle) -> Result<()> {
        self.core.registry.ensure_loaded();
        self.core.submit(request)
    }

    /// One heartbeat; returns the number of records and timers processed
    pub fn tick(&mut self) -> usize {
        let core = &mut self.core;
        let mut processed = self
            .events
            .connections
            .drain_and_process(|event| core.on_connection_event(event));
        processed += self
            .events
            .protocols
            .drain_and_process(|event| core.on_protocol_event(event));
        processed += self
            .events
            .requests
            .drain_and_process(|event| core.on_request_event(event));

        let mut save_cache = false;
        processed += self
            .events
            .plugins
            .drain_and_process(|event| core.on_plugin_event(event, &mut save_cache));
        if save_cache {
            core.save_cache();
        }

        processed + core.run_timers()
    }

    /// Stop everything: protocols, pools, timers and pending records
    pub fn shutdown(&mut self) {
        self.core.protocols.shutdown_all(ShutdownKind::Immediate);
        self.core.registry.shutdown();
        self.core.timers.clear();
        let dropped = self.events.clear();
        self.core.save_cache();
        log::info!("HTTP context shut down, {} pending records dropped", dropped);
    }

    /// Drop every host entry, timer and pending record
    pub fn clear(&mut self) {
        self.core.registry.clear();
        self.core.timers.clear();
        self.core.protocols.clear();
        self.events.clear();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.core.registry
    }

    pub fn registry_mut(&mut self) -> &mut HostRegistry {
        &mut self.core.registry
    }

    pub fn protocols(&self) -> &ProtocolRouter {
        &self.core.protocols
    }

    pub fn pending_timers(&self) -> usize {
        self.core.timers.len()
    }

    /// Channels, for attaching observers
    pub fn events_mut(&mut self) -> &mut EventHub {
        &mut self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.core.clock
    }
}
