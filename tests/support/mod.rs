//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use binix_net::network::{ConnectionBase, NewConnection, ResponseCache, ShutdownKind};
use binix_net::utils::{Clock, ManualClock};
use binix_net::{
    ClientConfig, Connection, ConnectionFactories, ConnectionFactory, ConnectionState,
    EventSender, HttpContext, HttpRequest, NetError, ProtocolSupport, RequestHandle,
    RequestState, Response, VariantKey,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connection that records what it was asked to do; tests finish requests by hand
pub struct FakeConnection {
    base: ConnectionBase,
    events: EventSender,
    clock: ManualClock,
    multiplex: AtomicBool,
    alive: AtomicBool,
    fail_shutdown: bool,
    processed: Mutex<Vec<RequestHandle>>,
    in_flight: Mutex<Vec<RequestHandle>>,
    shutdowns: AtomicUsize,
    disposed: AtomicBool,
    this: Weak<FakeConnection>,
}

impl FakeConnection {
    pub fn as_dyn(&self) -> Option<Arc<dyn Connection>> {
        self.this.upgrade().map(|this| this as Arc<dyn Connection>)
    }

    /// Complete the oldest in-flight request and hand the connection back
    pub fn finish(&self, status: u16) -> Option<RequestHandle> {
        self.finish_with(Response::new(status, format!("status {}", status)))
    }

    /// Like [`FakeConnection::finish`], with a prepared response
    pub fn finish_with(&self, response: Response) -> Option<RequestHandle> {
        let request = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.is_empty() {
                return None;
            }
            in_flight.remove(0)
        };
        request.set_response(response);
        self.events.request_state(&request, RequestState::Finished);
        self.base.touch(self.clock.now());
        self.base.set_current_request(None);
        if let Some(connection) = self.as_dyn() {
            self.events.connection_state(&connection, ConnectionState::Recycle);
        }
        Some(request)
    }

    /// Fail the oldest in-flight request and hand the connection back
    pub fn fail(&self, message: &str) -> Option<RequestHandle> {
        let request = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.is_empty() {
                return None;
            }
            in_flight.remove(0)
        };
        request.set_error(message);
        self.events.request_state(&request, RequestState::Error);
        self.base.touch(self.clock.now());
        self.base.set_current_request(None);
        if let Some(connection) = self.as_dyn() {
            self.events.connection_state(&connection, ConnectionState::Recycle);
        }
        Some(request)
    }

    /// Die mid-flight, asking for the in-flight request to be resent
    pub fn drop_with_resend(&self) {
        let request = self.in_flight.lock().unwrap().pop();
        if let Some(connection) = self.as_dyn() {
            self.events.connection_closed_resend(&connection, request);
        }
    }

    /// Report what the handshake negotiated; HTTP/2 turns on multiplexing
    pub fn report_support(&self, support: ProtocolSupport) {
        if support == ProtocolSupport::Http2 {
            self.multiplex.store(true, Ordering::SeqCst);
        }
        if let Some(connection) = self.as_dyn() {
            self.events.protocol_support(&connection, support);
        }
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn processed(&self) -> Vec<RequestHandle> {
        self.processed.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    fn id(&self) -> u64 {
        self.base.id()
    }

    fn key(&self) -> &VariantKey {
        self.base.key()
    }

    fn state(&self) -> ConnectionState {
        self.base.state()
    }

    fn set_state(&self, state: ConnectionState) {
        self.base.set_state(state)
    }

    fn can_process_multiple(&self) -> bool {
        self.multiplex.load(Ordering::SeqCst)
    }

    fn last_process_time(&self) -> Instant {
        self.base.last_process_time()
    }

    fn keep_alive(&self) -> Duration {
        self.base.keep_alive()
    }

    fn test_connection(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn process(&self, request: RequestHandle) {
        self.base.set_current_request(Some(Arc::clone(&request)));
        self.processed.lock().unwrap().push(Arc::clone(&request));
        self.in_flight.lock().unwrap().push(request);
    }

    fn current_request(&self) -> Option<RequestHandle> {
        self.base.current_request()
    }

    fn shutdown(&self, _kind: ShutdownKind) -> binix_net::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err(NetError::Connection("socket already gone".to_string()));
        }
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakeConnection`]s and remembering them
#[derive(Default)]
pub struct FakeFactory {
    clock: Mutex<Option<ManualClock>>,
    multiplex: AtomicBool,
    fail_shutdown: AtomicBool,
    created: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeFactory {
    pub fn new(clock: &ManualClock) -> Arc<Self> {
        let factory = Self::default();
        *factory.clock.lock().unwrap() = Some(clock.clone());
        Arc::new(factory)
    }

    pub fn set_multiplex(&self, multiplex: bool) {
        self.multiplex.store(multiplex, Ordering::SeqCst);
    }

    pub fn set_fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<FakeConnection>> {
        self.created.lock().unwrap().clone()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }
}

impl ConnectionFactory for FakeFactory {
    fn create(&self, params: NewConnection<'_>) -> binix_net::Result<Arc<dyn Connection>> {
        let clock = self.clock.lock().unwrap().clone().unwrap_or_default();
        let connection = Arc::new_cyclic(|this| FakeConnection {
            base: ConnectionBase::from_params(&params),
            events: params.events.clone(),
            clock,
            multiplex: AtomicBool::new(self.multiplex.load(Ordering::SeqCst)),
            alive: AtomicBool::new(true),
            fail_shutdown: self.fail_shutdown.load(Ordering::SeqCst),
            processed: Mutex::new(Vec::new()),
            in_flight: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            this: this.clone(),
        });
        self.created.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// A context wired to fakes and a manual clock
pub struct Harness {
    pub clock: ManualClock,
    pub factory: Arc<FakeFactory>,
    pub ctx: HttpContext,
}

impl Harness {
    pub fn new(config: ClientConfig) -> Self {
        init_logging();
        let clock = ManualClock::new();
        let factory = FakeFactory::new(&clock);
        let factories = ConnectionFactories::new()
            .with("http", factory.clone())
            .with("https", factory.clone());
        let ctx = HttpContext::with_clock(config, factories, Arc::new(clock.clone()));
        Self {
            clock,
            factory,
            ctx,
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn ResponseCache>) -> Self {
        self.ctx = self.ctx.with_cache(cache);
        self
    }

    pub fn with_max(max: usize) -> Self {
        Self::new(ClientConfig::default().with_max_connections_per_host(max))
    }

    pub fn send(&mut self, request: &RequestHandle) {
        self.ctx.send(Arc::clone(request)).unwrap();
    }

    /// Advance the clock and run one heartbeat
    pub fn advance(&mut self, by: Duration) -> usize {
        self.clock.advance(by);
        self.ctx.tick()
    }

    pub fn key(url: &str) -> VariantKey {
        get(url).variant_key().unwrap()
    }

    pub fn queued(&mut self, url: &str) -> usize {
        let key = Self::key(url);
        self.ctx
            .registry_mut()
            .find_pool(&key)
            .map_or(0, |pool| pool.queued_len())
    }

    pub fn active(&mut self, url: &str) -> usize {
        let key = Self::key(url);
        self.ctx
            .registry_mut()
            .find_pool(&key)
            .map_or(0, |pool| pool.active_count())
    }

    pub fn pooled(&mut self, url: &str) -> usize {
        let key = Self::key(url);
        self.ctx
            .registry_mut()
            .find_pool(&key)
            .map_or(0, |pool| pool.connections().len())
    }
}

pub fn get(url: &str) -> RequestHandle {
    HttpRequest::get(url).unwrap().into_handle()
}

/// Completion log: (request id, final state, status code)
pub type Completions = Arc<Mutex<Vec<(u64, RequestState, Option<u16>)>>>;

pub fn recorded(url: &str, log: &Completions) -> RequestHandle {
    let log = Arc::clone(log);
    HttpRequest::get(url)
        .unwrap()
        .on_complete(move |request, response| {
            log.lock()
                .unwrap()
                .push((request.id(), request.state(), response.map(|r| r.status())));
        })
        .into_handle()
}

pub fn completions() -> Completions {
    Arc::new(Mutex::new(Vec::new()))
}
