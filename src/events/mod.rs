//! Cross-thread event dispatch
//!
//! Worker threads never touch pool or registry state. They push immutable
//! records through an [`EventSender`]; the heartbeat thread owns the
//! [`EventHub`] and drains its four channels once per tick.

mod channel;
mod records;

pub use channel::{EventChannel, EventQueue, ObserverId};
pub use records::{
    ConnectionEvent, ConnectionEventKind, PluginEvent, ProtocolEvent, RequestEvent,
    RequestEventKind,
};

use std::collections::HashMap;
use std::sync::Arc;

use crate::memory::BufferPool;
use crate::network::{Connection, ConnectionState, Protocol, RequestHandle, RequestState, TimingEvent};
use crate::pool::ProtocolSupport;

/// Producer handle handed to connections and protocols
#[derive(Clone)]
pub struct EventSender {
    connections: Arc<EventQueue<ConnectionEvent>>,
    protocols: Arc<EventQueue<ProtocolEvent>>,
    requests: Arc<EventQueue<RequestEvent>>,
    plugins: Arc<EventQueue<PluginEvent>>,
    buffers: BufferPool,
}

impl EventSender {
    /// A sender whose records nobody drains
    pub fn detached() -> Self {
        EventHub::new(BufferPool::default()).sender()
    }

    /// Set the connection's state and report it
    pub fn connection_state(&self, connection: &Arc<dyn Connection>, state: ConnectionState) {
        connection.set_state(state);
        self.connections.push(ConnectionEvent {
            connection: Arc::clone(connection),
            request: None,
            kind: ConnectionEventKind::StateChanged(state),
        });
    }

    /// The connection died mid-flight; `request` must go out again
    pub fn connection_closed_resend(
        &self,
        connection: &Arc<dyn Connection>,
        request: Option<RequestHandle>,
    ) {
        connection.set_state(ConnectionState::ClosedResendRequest);
        self.connections.push(ConnectionEvent {
            connection: Arc::clone(connection),
            request,
            kind: ConnectionEventKind::StateChanged(ConnectionState::ClosedResendRequest),
        });
    }

    pub fn protocol_support(&self, connection: &Arc<dyn Connection>, support: ProtocolSupport) {
        self.connections.push(ConnectionEvent {
            connection: Arc::clone(connection),
            request: None,
            kind: ConnectionEventKind::ProtocolSupport(support),
        });
    }

    pub fn request(&self, request: RequestHandle, kind: RequestEventKind) {
        self.requests.push(RequestEvent { request, kind });
    }

    /// Transition the request and report it; false once it is terminal
    pub fn request_state(&self, request: &RequestHandle, state: RequestState) -> bool {
        request.transition(state, self)
    }

    pub fn resend(&self, request: RequestHandle) {
        self.request(request, RequestEventKind::Resend);
    }

    pub fn headers(&self, request: RequestHandle, headers: HashMap<String, String>) {
        self.request(request, RequestEventKind::Headers(headers));
    }

    pub fn download_progress(&self, request: RequestHandle, downloaded: u64, total: u64) {
        self.request(request, RequestEventKind::DownloadProgress { downloaded, total });
    }

    pub fn upload_progress(&self, request: RequestHandle, uploaded: u64, total: u64) {
        self.request(request, RequestEventKind::UploadProgress { uploaded, total });
    }

    pub fn upgraded(&self, request: RequestHandle, protocol: Arc<dyn Protocol>) {
        self.request(request, RequestEventKind::Upgraded(protocol));
    }

    pub fn timing(&self, request: RequestHandle, event: TimingEvent) {
        self.request(request, RequestEventKind::Timing(event));
    }

    /// Copy `chunk` into a pooled buffer and queue it for the streaming callback
    pub fn streaming_chunk(&self, request: RequestHandle, chunk: &[u8]) {
        let mut buffer = self.buffers.acquire();
        buffer.extend_from_slice(chunk);
        self.request(request, RequestEventKind::StreamingData(buffer));
    }

    pub fn protocol(&self, protocol: Arc<dyn Protocol>) {
        self.protocols.push(ProtocolEvent { protocol });
    }

    pub fn plugin(&self, event: PluginEvent) {
        self.plugins.push(event);
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }
}

/// Consumer side: the four channels in drain order
pub struct EventHub {
    pub connections: EventChannel<ConnectionEvent>,
    pub protocols: EventChannel<ProtocolEvent>,
    pub requests: EventChannel<RequestEvent>,
    pub plugins: EventChannel<PluginEvent>,
    sender: EventSender,
}

impl EventHub {
    pub fn new(buffers: BufferPool) -> Self {
        let connections = EventChannel::new("connection");
        let protocols = EventChannel::new("protocol");
        let requests = EventChannel::new("request");
        let plugins = EventChannel::new("plugin");
        let sender = EventSender {
            connections: connections.queue(),
            protocols: protocols.queue(),
            requests: requests.queue(),
            plugins: plugins.queue(),
            buffers,
        };
        Self {
            connections,
            protocols,
            requests,
            plugins,
            sender,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Records waiting across all channels
    pub fn pending(&self) -> usize {
        self.connections.pending()
            + self.protocols.pending()
            + self.requests.pending()
            + self.plugins.pending()
    }

    /// Drop every pending record
    pub fn clear(&self) -> usize {
        self.connections.clear() + self.protocols.clear() + self.requests.clear() + self.plugins.clear()
    }
}
