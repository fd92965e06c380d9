//! HTTP request types
//!
//! A request is shared between the heartbeat thread and whichever I/O worker
//! is serving it, so its lifecycle state is atomic and everything else sits
//! behind one mutex. State changes go through compare-and-swap: once a
//! request reaches a terminal state no other transition can win.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use url::Url;

use super::protocol::Protocol;
use super::response::Response;
use crate::events::{EventSender, RequestEventKind};
use crate::pool::VariantKey;
use crate::utils::Result;

/// Shared handle to a request
pub type RequestHandle = Arc<HttpRequest>;

/// Unique request identifier
pub type RequestId = u64;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

/// Request lifecycle state
///
/// Everything from `Finished` on is terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestState {
    Initial = 0,
    Queued = 1,
    Processing = 2,
    Finished = 3,
    Error = 4,
    Aborted = 5,
    ConnectionTimedOut = 6,
    TimedOut = 7,
}

impl RequestState {
    /// Whether no further network activity is expected
    pub fn is_terminal(self) -> bool {
        self >= RequestState::Finished
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Queued,
            2 => Self::Processing,
            3 => Self::Finished,
            4 => Self::Error,
            5 => Self::Aborted,
            6 => Self::ConnectionTimedOut,
            _ => Self::TimedOut,
        }
    }
}

/// Proxy the request is routed through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    address: String,
}

impl Proxy {
    /// Create a proxy descriptor from its address, e.g. `http://proxy:3128`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Proxy address
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Named points on a request's timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingEvent {
    Queued,
    Processing,
    ResponseHeaders,
    Finished,
    Callback,
    /// Reported by a connection implementation (DNS, TLS, ...)
    Other(String),
}

/// Flags and limits fixed when the request is built
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Never satisfy this request from the cache
    pub disable_cache: bool,
    /// Response body is delivered through the streaming callback
    pub use_streaming: bool,
    /// Request body is streamed by the connection
    pub streams_upload: bool,
    /// Keep the timeout check armed even when streaming
    pub enable_timeout_for_streaming: bool,
    /// Overall processing timeout; context default when unset
    pub timeout: Option<Duration>,
    /// Time allowed in the queue before a connection picks it up
    pub connect_timeout: Option<Duration>,
}

pub type CompletionCallback = Box<dyn FnOnce(&HttpRequest, Option<&Response>) + Send>;
pub type HeadersCallback = Box<dyn FnMut(&HttpRequest, &HashMap<String, String>) + Send>;
pub type ProgressCallback = Box<dyn FnMut(&HttpRequest, u64, u64) + Send>;
/// Receives a downloaded chunk; return it to release the buffer, keep it to retain
pub type StreamingCallback = Box<dyn FnMut(&HttpRequest, Vec<u8>) -> Option<Vec<u8>> + Send>;
pub type UpgradeCallback = Box<dyn FnMut(&HttpRequest, &Arc<dyn Protocol>) + Send>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) on_complete: Option<CompletionCallback>,
    pub(crate) on_headers: Option<HeadersCallback>,
    pub(crate) on_download_progress: Option<ProgressCallback>,
    pub(crate) on_upload_progress: Option<ProgressCallback>,
    pub(crate) on_streaming_data: Option<StreamingCallback>,
    pub(crate) on_upgraded: Option<UpgradeCallback>,
}

#[derive(Default)]
struct RequestInner {
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    response: Option<Response>,
    error: Option<String>,
    queued_at: Option<Instant>,
    processing_started: Option<Instant>,
    timeline: Vec<(TimingEvent, Instant)>,
    callbacks: Callbacks,
    disposed: bool,
}

/// HTTP request with its lifecycle
pub struct HttpRequest {
    id: RequestId,
    method: Method,
    url: Url,
    proxy: Option<Proxy>,
    options: RequestOptions,
    state: AtomicU8,
    delivered: AtomicBool,
    timeout_armed: AtomicBool,
    cache_fallback_tried: AtomicBool,
    inner: Mutex<RequestInner>,
}

impl HttpRequest {
    /// Create a new request
    pub fn new(method: Method, url: &str) -> Result<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let url = Url::parse(url)?;
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            method,
            url,
            proxy: None,
            options: RequestOptions::default(),
            state: AtomicU8::new(RequestState::Initial as u8),
            delivered: AtomicBool::new(false),
            timeout_armed: AtomicBool::new(false),
            cache_fallback_tried: AtomicBool::new(false),
            inner: Mutex::new(RequestInner::default()),
        })
    }

    /// Create a GET request
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    /// Create a POST request
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::Post, url)
    }

    /// Add a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner_mut().headers.insert(key.into(), value.into());
        self
    }

    /// Set the request body
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.inner_mut().body = Some(body);
        self
    }

    /// Route the request through a proxy
    pub fn via_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Replace all option flags at once
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Never fall back to the cache for this request
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.options.disable_cache = disable;
        self
    }

    /// Override the processing timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Override the queue (connect) timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    /// Set the completion callback, invoked exactly once
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(&HttpRequest, Option<&Response>) + Send + 'static,
    ) -> Self {
        self.inner_mut().callbacks.on_complete = Some(Box::new(callback));
        self
    }

    /// Set the response headers callback
    pub fn on_headers(
        mut self,
        callback: impl FnMut(&HttpRequest, &HashMap<String, String>) + Send + 'static,
    ) -> Self {
        self.inner_mut().callbacks.on_headers = Some(Box::new(callback));
        self
    }

    /// Set the download progress callback `(downloaded, total)`
    pub fn on_download_progress(
        mut self,
        callback: impl FnMut(&HttpRequest, u64, u64) + Send + 'static,
    ) -> Self {
        self.inner_mut().callbacks.on_download_progress = Some(Box::new(callback));
        self
    }

    /// Set the upload progress callback `(uploaded, total)`
    pub fn on_upload_progress(
        mut self,
        callback: impl FnMut(&HttpRequest, u64, u64) + Send + 'static,
    ) -> Self {
        self.inner_mut().callbacks.on_upload_progress = Some(Box::new(callback));
        self
    }

    /// Stream the response body through `callback`; enables streaming
    pub fn on_streaming_data(
        mut self,
        callback: impl FnMut(&HttpRequest, Vec<u8>) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.options.use_streaming = true;
        self.inner_mut().callbacks.on_streaming_data = Some(Box::new(callback));
        self
    }

    /// Set the protocol upgrade callback
    pub fn on_upgraded(
        mut self,
        callback: impl FnMut(&HttpRequest, &Arc<dyn Protocol>) + Send + 'static,
    ) -> Self {
        self.inner_mut().callbacks.on_upgraded = Some(Box::new(callback));
        self
    }

    /// Wrap into a shareable handle
    pub fn into_handle(self) -> RequestHandle {
        Arc::new(self)
    }

    /// Get the request id
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Get the method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the proxy, if any
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    /// Get option flags
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Pool key this request belongs to
    pub fn variant_key(&self) -> Result<VariantKey> {
        VariantKey::for_request(&self.url, self.proxy.as_ref())
    }

    /// Current lifecycle state
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Get a copy of the request headers
    pub fn headers(&self) -> HashMap<String, String> {
        self.lock().headers.clone()
    }

    /// Get a copy of the request body
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        self.lock().body.clone()
    }

    /// Get a copy of the response, if one arrived
    pub fn response(&self) -> Option<Response> {
        self.lock().response.clone()
    }

    /// Last recorded error message
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// When the request last entered the queue
    pub fn queued_at(&self) -> Option<Instant> {
        self.lock().queued_at
    }

    /// When a connection started processing the request
    pub fn processing_started(&self) -> Option<Instant> {
        self.lock().processing_started
    }

    /// Recorded timing events
    pub fn timeline(&self) -> Vec<(TimingEvent, Instant)> {
        self.lock().timeline.clone()
    }

    /// Whether the completion callback has been delivered
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// Move to `to` and report the change on the request channel.
    ///
    /// Returns false if the request already reached a terminal state.
    pub fn transition(self: &Arc<Self>, to: RequestState, events: &EventSender) -> bool {
        if !self.try_transition(to) {
            return false;
        }
        events.request(Arc::clone(self), RequestEventKind::StateChange(to));
        true
    }

    /// Cooperatively abort the request
    pub fn abort(self: &Arc<Self>, events: &EventSender) -> bool {
        self.transition(RequestState::Aborted, events)
    }

    /// Attach the response received by the connection
    pub fn set_response(&self, response: Response) {
        self.lock().response = Some(response);
    }

    /// Record an error message
    pub fn set_error(&self, message: impl Into<String>) {
        self.lock().error = Some(message.into());
    }

    /// Fill in headers derived from the request itself before it goes out
    pub fn prepare(&self) {
        let host = self.url.host_str().map(|h| match self.url.port() {
            Some(port) => format!("{}:{}", h, port),
            None => h.to_string(),
        });
        let mut inner = self.lock();
        if let Some(host) = host {
            inner.headers.entry("Host".to_string()).or_insert(host);
        }
        if let Some(len) = inner.body.as_ref().map(|b| b.len()) {
            inner
                .headers
                .entry("Content-Length".to_string())
                .or_insert_with(|| len.to_string());
        }
    }

    pub(crate) fn try_transition(&self, to: RequestState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if RequestState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Overwrite the state even if terminal (cache fallback success)
    pub(crate) fn force_state(&self, state: RequestState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Back to `Initial` for a resend; refused once terminal
    pub(crate) fn reset_for_resend(&self) -> bool {
        if !self.try_transition(RequestState::Initial) {
            return false;
        }
        let mut inner = self.lock();
        inner.response = None;
        inner.error = None;
        inner.queued_at = None;
        inner.processing_started = None;
        true
    }

    /// `Initial -> Queued`, reported on the request channel; false from any other state
    pub(crate) fn submit(self: &Arc<Self>, events: &EventSender) -> bool {
        let submitted = self
            .state
            .compare_exchange(
                RequestState::Initial as u8,
                RequestState::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if submitted {
            events.request(Arc::clone(self), RequestEventKind::StateChange(RequestState::Queued));
        }
        submitted
    }

    /// Claim the one completion delivery
    pub(crate) fn mark_delivered(&self) -> bool {
        !self.delivered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn arm_timeout(&self) -> bool {
        !self.timeout_armed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn disarm_timeout(&self) {
        self.timeout_armed.store(false, Ordering::Release);
    }

    pub(crate) fn claim_cache_fallback(&self) -> bool {
        !self.cache_fallback_tried.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_queued(&self, now: Instant) {
        let mut inner = self.lock();
        inner.queued_at = Some(now);
        inner.timeline.push((TimingEvent::Queued, now));
    }

    pub(crate) fn mark_processing(&self, now: Instant) {
        let mut inner = self.lock();
        inner.processing_started = Some(now);
        inner.timeline.push((TimingEvent::Processing, now));
    }

    pub(crate) fn record_timing(&self, event: TimingEvent, at: Instant) {
        self.lock().timeline.push((event, at));
    }

    /// State this request should time out into at `now`, if any
    pub(crate) fn expired_state(
        &self,
        now: Instant,
        default_timeout: Duration,
        default_connect_timeout: Duration,
    ) -> Option<RequestState> {
        let connect_timeout = self.options.connect_timeout.unwrap_or(default_connect_timeout);
        let timeout = self.options.timeout.unwrap_or(default_timeout);
        let inner = self.lock();
        match self.state() {
            RequestState::Queued => inner
                .queued_at
                .filter(|at| now.saturating_duration_since(*at) >= connect_timeout)
                .map(|_| RequestState::ConnectionTimedOut),
            RequestState::Processing => inner
                .processing_started
                .filter(|at| now.saturating_duration_since(*at) >= timeout)
                .map(|_| RequestState::TimedOut),
            _ => None,
        }
    }

    pub(crate) fn take_completion(&self) -> Option<CompletionCallback> {
        self.lock().callbacks.on_complete.take()
    }

    /// Run a stored callback outside the lock, then put it back.
    ///
    /// Panics raised by the callback are caught and logged; the callback
    /// is dropped in that case.
    pub(crate) fn with_callback<C, R>(
        &self,
        slot: fn(&mut Callbacks) -> &mut Option<C>,
        call: impl FnOnce(&mut C) -> R,
    ) -> Option<R> {
        let mut callback = slot(&mut self.lock().callbacks).take()?;
        let result = panic::catch_unwind(AssertUnwindSafe(|| call(&mut callback)));
        match result {
            Ok(value) => {
                let mut inner = self.lock();
                if !inner.disposed {
                    let stored = slot(&mut inner.callbacks);
                    if stored.is_none() {
                        *stored = Some(callback);
                    }
                }
                Some(value)
            }
            Err(_) => {
                log::error!("request {}: callback panicked, dropping it", self.id);
                None
            }
        }
    }

    /// Release everything that is only needed while the request is alive
    pub(crate) fn dispose(&self) {
        let mut inner = self.lock();
        inner.disposed = true;
        inner.body = None;
        inner.callbacks = Callbacks::default();
    }

    fn lock(&self) -> MutexGuard<'_, RequestInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inner_mut(&mut self) -> &mut RequestInner {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}
