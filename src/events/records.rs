//! Event records, one type per channel

use std::collections::HashMap;
use std::sync::Arc;

use crate::network::{Connection, ConnectionState, Protocol, RequestHandle, RequestState, TimingEvent};
use crate::pool::ProtocolSupport;

/// Something happened to a connection
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub connection: Arc<dyn Connection>,
    /// Request to resend, for `ClosedResendRequest`
    pub request: Option<RequestHandle>,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    StateChanged(ConnectionState),
    /// The connection learned whether its host speaks HTTP/2
    ProtocolSupport(ProtocolSupport),
}

/// Something happened to a request
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request: RequestHandle,
    pub kind: RequestEventKind,
}

#[derive(Debug, Clone)]
pub enum RequestEventKind {
    StateChange(RequestState),
    /// Put the request back through the registry as if newly sent
    Resend,
    Headers(HashMap<String, String>),
    /// Body chunk in a buffer taken from the context's buffer pool
    StreamingData(Vec<u8>),
    DownloadProgress { downloaded: u64, total: u64 },
    UploadProgress { uploaded: u64, total: u64 },
    Upgraded(Arc<dyn Protocol>),
    Timing(TimingEvent),
}

impl RequestEventKind {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            RequestEventKind::StateChange(_) => "state-change",
            RequestEventKind::Resend => "resend",
            RequestEventKind::Headers(_) => "headers",
            RequestEventKind::StreamingData(_) => "streaming-data",
            RequestEventKind::DownloadProgress { .. } => "download-progress",
            RequestEventKind::UploadProgress { .. } => "upload-progress",
            RequestEventKind::Upgraded(_) => "upgraded",
            RequestEventKind::Timing(_) => "timing",
        }
    }
}

/// An upgraded protocol session has work to do
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    pub protocol: Arc<dyn Protocol>,
}

/// Cross-cutting requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    /// Persist the HTTP cache; collapsed to one save per tick
    SaveCache,
    /// An `Alt-Svc` response header was seen for `host`
    AltSvcHeader { host: String, value: String },
}
