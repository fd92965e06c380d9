//! Request log fed by the request channel
//!
//! Every queued request gets an entry that follows it to its terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::events::{EventHub, ObserverId, RequestEvent, RequestEventKind};
use crate::network::{Method, RequestId, RequestState};

/// Where an observed request ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Complete,
    Failed,
    Cancelled,
}

/// One observed request
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub id: RequestId,
    pub url: String,
    pub host: String,
    pub method: Method,
    pub status: RequestStatus,
    pub status_code: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_size: u64,
    pub resends: u32,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub duration: Option<Duration>,
    pub error_message: Option<String>,
}

impl NetworkRequest {
    /// Start tracking a request
    pub fn new(id: RequestId, url: &str, method: Method) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            id,
            url: url.to_string(),
            host,
            method,
            status: RequestStatus::Pending,
            status_code: None,
            response_headers: HashMap::new(),
            response_size: 0,
            resends: 0,
            start_time: Instant::now(),
            end_time: None,
            duration: None,
            error_message: None,
        }
    }

    /// Record a delivered response
    pub fn complete(&mut self, status_code: Option<u16>, response_size: u64) {
        self.status = RequestStatus::Complete;
        self.status_code = status_code;
        self.response_size = self.response_size.max(response_size);
        self.finish();
    }

    pub fn fail(&mut self, error: &str) {
        self.status = RequestStatus::Failed;
        self.error_message = Some(error.to_string());
        self.finish();
    }

    /// Mark request as cancelled by the user
    pub fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
        self.finish();
    }

    fn finish(&mut self) {
        let end = Instant::now();
        self.end_time = Some(end);
        self.duration = Some(end.duration_since(self.start_time));
    }
}

/// Log of observed requests, optionally filtered by host
#[derive(Debug, Default)]
pub struct NetworkInspector {
    requests: Vec<NetworkRequest>,
    host_filter: Option<String>,
    preserve_log: bool,
}

impl NetworkInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `inspector` to the request channel of `hub`
    pub fn attach(inspector: &Arc<Mutex<Self>>, hub: &mut EventHub) -> ObserverId {
        let inspector = Arc::clone(inspector);
        hub.requests.subscribe(move |event| {
            if let Ok(mut inspector) = inspector.lock() {
                inspector.observe(event);
            }
        })
    }

    /// Update the log from one request record
    pub fn observe(&mut self, event: &RequestEvent) {
        let request = &event.request;
        match &event.kind {
            RequestEventKind::StateChange(RequestState::Queued) => {
                if self.get_request(request.id()).is_none() {
                    self.requests.push(NetworkRequest::new(
                        request.id(),
                        request.url().as_str(),
                        request.method(),
                    ));
                }
            }
            RequestEventKind::StateChange(RequestState::Finished) => {
                let response = request.response();
                let size = response.as_ref().map_or(0, |r| r.body().len() as u64);
                if let Some(entry) = self.entry(request.id()) {
                    entry.complete(response.map(|r| r.status()), size);
                }
            }
            RequestEventKind::StateChange(RequestState::Aborted) => {
                if let Some(entry) = self.entry(request.id()) {
                    entry.cancel();
                }
            }
            RequestEventKind::StateChange(state) if state.is_terminal() => {
                let message = request.error().unwrap_or_else(|| format!("{:?}", state));
                if let Some(entry) = self.entry(request.id()) {
                    entry.fail(&message);
                }
            }
            RequestEventKind::Headers(headers) => {
                if let Some(entry) = self.entry(request.id()) {
                    entry.response_headers = headers.clone();
                }
            }
            RequestEventKind::DownloadProgress { downloaded, .. } => {
                if let Some(entry) = self.entry(request.id()) {
                    entry.response_size = *downloaded;
                }
            }
            RequestEventKind::Resend => {
                if let Some(entry) = self.entry(request.id()) {
                    entry.resends += 1;
                }
            }
            _ => {}
        }
    }

    /// Logged requests passing the host filter
    pub fn requests(&self) -> impl Iterator<Item = &NetworkRequest> {
        self.requests.iter().filter(|r| {
            self.host_filter
                .as_deref()
                .map(|host| r.host == host)
                .unwrap_or(true)
        })
    }

    pub fn get_request(&self, id: RequestId) -> Option<&NetworkRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Forget logged requests unless the log is preserved
    pub fn clear(&mut self) {
        if !self.preserve_log {
            self.requests.clear();
        }
    }

    /// Only list requests to `host`
    pub fn set_filter(&mut self, host: Option<String>) {
        self.host_filter = host;
    }

    /// Keep entries across `clear`
    pub fn set_preserve_log(&mut self, preserve: bool) {
        self.preserve_log = preserve;
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Requests still waiting for a terminal state
    pub fn pending_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .count()
    }

    /// Sum of response body sizes seen so far
    pub fn total_transferred(&self) -> u64 {
        self.requests.iter().map(|r| r.response_size).sum()
    }

    fn entry(&mut self, id: RequestId) -> Option<&mut NetworkRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }
}
