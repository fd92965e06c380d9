//! Binix Net demo
//!
//! Drives an [`HttpContext`] heartbeat from a tokio interval against a
//! simulated transport whose I/O runs on plain worker threads.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use binix_net::network::{ConnectionBase, NewConnection, ShutdownKind};
use binix_net::{
    ClientConfig, Connection, ConnectionFactories, ConnectionFactory, ConnectionState,
    EventSender, HttpContext, HttpRequest, NAME, ProtocolSupport, RequestHandle, RequestState,
    Response, VERSION, VariantKey,
};

/// Connection that answers every request after a short delay
struct SimulatedConnection {
    base: ConnectionBase,
    events: EventSender,
    latency: Duration,
    this: Weak<SimulatedConnection>,
}

impl Connection for SimulatedConnection {
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

    fn last_process_time(&self) -> std::time::Instant {
        self.base.last_process_time()
    }

    fn keep_alive(&self) -> Duration {
        self.base.keep_alive()
    }

    fn process(&self, request: RequestHandle) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.base.set_current_request(Some(Arc::clone(&request)));
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let body = format!("hello from {}", request.url());
            this.events.streaming_chunk(Arc::clone(&request), body.as_bytes());
            request.set_response(Response::new(200, body));
            this.events.request_state(&request, RequestState::Finished);

            this.base.touch(std::time::Instant::now());
            this.base.set_current_request(None);
            let connection: Arc<dyn Connection> = this.clone();
            this.events.protocol_support(&connection, ProtocolSupport::Http1);
            this.events.connection_state(&connection, ConnectionState::Recycle);
        });
    }

    fn current_request(&self) -> Option<RequestHandle> {
        self.base.current_request()
    }

    fn shutdown(&self, _kind: ShutdownKind) -> binix_net::Result<()> {
        self.base.set_state(ConnectionState::Closed);
        Ok(())
    }

    fn dispose(&self) {
        self.base.set_current_request(None);
    }
}

struct SimulatedFactory {
    latency: Duration,
}

impl ConnectionFactory for SimulatedFactory {
    fn create(&self, params: NewConnection<'_>) -> binix_net::Result<Arc<dyn Connection>> {
        let connection = Arc::new_cyclic(|this| SimulatedConnection {
            base: ConnectionBase::from_params(&params),
            events: params.events.clone(),
            latency: self.latency,
            this: this.clone(),
        });
        Ok(connection)
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let count: usize = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(8);

    println!("{} v{}", NAME, VERSION);

    let factory = Arc::new(SimulatedFactory {
        latency: Duration::from_millis(50),
    });
    let factories = ConnectionFactories::new()
        .with("http", factory.clone())
        .with("https", factory);
    let config = ClientConfig::default().with_max_connections_per_host(2);
    let mut context = HttpContext::new(config, factories);
    context.init();

    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..count {
        let done = Arc::clone(&completed);
        let request = HttpRequest::get(&format!("https://example.com/item/{}", i))
            .map(|request| {
                request
                    .on_streaming_data(|_, chunk| Some(chunk))
                    .on_complete(move |request, response| {
                        let status = response.map(|r| r.status());
                        println!("{} -> {:?} {:?}", request.url(), request.state(), status);
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .into_handle()
            });
        match request {
            Ok(request) => {
                if let Err(err) = context.send(request) {
                    eprintln!("send failed: {}", err);
                }
            }
            Err(err) => eprintln!("bad request: {}", err),
        }
    }

    let mut heartbeat = tokio::time::interval(Duration::from_millis(10));
    while completed.load(Ordering::SeqCst) < count {
        heartbeat.tick().await;
        context.tick();
    }

    context.shutdown();
    println!("{} requests completed", count);
}
