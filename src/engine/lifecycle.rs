//! Request lifecycle handling on the heartbeat thread

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::timer::{TimerAction, TimerOutcome};
use super::Dispatcher;
use crate::events::{PluginEvent, RequestEvent, RequestEventKind};
use crate::network::{HttpRequest, RequestHandle, RequestState, TimingEvent};
use crate::utils::Result;

impl Dispatcher {
    pub(super) fn on_request_event(&mut self, event: RequestEvent) {
        let RequestEvent { request, kind } = event;
        log::trace!("request {}: {}", request.id(), kind.name());
        let req: &HttpRequest = &request;

        match kind {
            RequestEventKind::StateChange(RequestState::Queued) => self.on_queued(&request),
            RequestEventKind::StateChange(state) if state.is_terminal() => {
                self.on_terminal(request, state)
            }
            RequestEventKind::StateChange(_) => {}
            RequestEventKind::Resend => self.resend(request),
            RequestEventKind::Headers(headers) => {
                req.record_timing(TimingEvent::ResponseHeaders, self.clock.now());
                req.with_callback(|c| &mut c.on_headers, |cb| cb(req, &headers));
            }
            RequestEventKind::StreamingData(chunk) => {
                let mut chunk = Some(chunk);
                let returned = req.with_callback(
                    |c| &mut c.on_streaming_data,
                    |cb| cb(req, chunk.take().unwrap_or_default()),
                );
                // Unclaimed chunks and chunks handed back go back to the pool
                let release = match returned {
                    Some(handed_back) => handed_back,
                    None => chunk,
                };
                if let Some(buffer) = release {
                    self.events.buffers().release(buffer);
                }
            }
            RequestEventKind::DownloadProgress { downloaded, total } => {
                req.with_callback(|c| &mut c.on_download_progress, |cb| {
                    cb(req, downloaded, total)
                });
            }
            RequestEventKind::UploadProgress { uploaded, total } => {
                req.with_callback(|c| &mut c.on_upload_progress, |cb| cb(req, uploaded, total));
            }
            RequestEventKind::Upgraded(protocol) => {
                req.with_callback(|c| &mut c.on_upgraded, |cb| cb(req, &protocol));
                self.protocols.register(protocol);
            }
            RequestEventKind::Timing(timing) => req.record_timing(timing, self.clock.now()),
        }
    }

    /// Queue a request on its pool as if newly sent
    pub(super) fn submit(&mut self, request: RequestHandle) -> Result<()> {
        if !request.submit(&self.events) {
            log::debug!("request {} is already {:?}", request.id(), request.state());
            return Ok(());
        }
        let sent = self.registry.send(Arc::clone(&request));
        if let Err(err) = &sent {
            log::warn!("request {}: {}", request.id(), err);
            request.set_error(err.to_string());
            request.transition(RequestState::Error, &self.events);
        }
        sent
    }

    fn on_queued(&mut self, request: &RequestHandle) {
        let now = self.clock.now();
        request.mark_queued(now);
        if request.state().is_terminal() {
            return;
        }

        let options = request.options();
        if options.streams_upload && !options.enable_timeout_for_streaming {
            return;
        }
        if request.arm_timeout() {
            self.timers.schedule(
                now + self.timeout_check_interval,
                TimerAction::RequestTimeout {
                    request: Arc::clone(request),
                },
            );
        }
    }

    fn on_terminal(&mut self, request: RequestHandle, state: RequestState) {
        if request.is_delivered() {
            log::trace!("request {} already delivered, ignoring {:?}", request.id(), state);
            return;
        }

        if self.should_fall_back_to_cache(&request, state) {
            let url = request.url().as_str();
            match self.cache.load(url) {
                Ok(response) => {
                    log::debug!("request {} {:?}, served from cache", request.id(), state);
                    request.set_response(response);
                    request.force_state(RequestState::Finished);
                }
                Err(err) => {
                    log::debug!("request {}: cache fallback failed: {}", request.id(), err);
                    self.events
                        .request(request, RequestEventKind::StateChange(state));
                    return;
                }
            }
        }

        if state == RequestState::Finished {
            self.remember_response(&request);
        }
        self.deliver(request);
    }

    /// Cache a network response for later fallback and schedule a save
    fn remember_response(&self, request: &HttpRequest) {
        if request.options().disable_cache {
            return;
        }
        let Some(response) = request.response() else {
            return;
        };
        if response.is_server_error() || response.is_from_cache() {
            return;
        }
        if self.cache.store(request.url().as_str(), &response) {
            log::trace!("request {}: response cached", request.id());
            self.events.plugin(PluginEvent::SaveCache);
        }
    }

    fn should_fall_back_to_cache(&self, request: &HttpRequest, state: RequestState) -> bool {
        if request.options().disable_cache || state == RequestState::Aborted {
            return false;
        }
        let failed = match state {
            RequestState::Error | RequestState::TimedOut | RequestState::ConnectionTimedOut => true,
            RequestState::Finished => request
                .response()
                .map_or(true, |response| response.is_server_error()),
            _ => false,
        };
        failed && self.cache.has_fresh(request.url().as_str()) && request.claim_cache_fallback()
    }

    /// Run the completion callback once, then free the request's slot
    fn deliver(&mut self, request: RequestHandle) {
        if !request.mark_delivered() {
            return;
        }
        request.disarm_timeout();
        request.record_timing(TimingEvent::Finished, self.clock.now());

        if let Some(callback) = request.take_completion() {
            let response = request.response();
            let req: &HttpRequest = &request;
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| callback(req, response.as_ref())));
            if outcome.is_err() {
                log::error!("request {}: completion callback panicked", request.id());
            }
        }
        request.record_timing(TimingEvent::Callback, self.clock.now());
        request.dispose();

        if let Ok(key) = request.variant_key() {
            self.registry.try_to_send_queued_for(&key);
        }
    }

    fn resend(&mut self, request: RequestHandle) {
        if !request.reset_for_resend() {
            log::debug!("request {} ended before it could be resent", request.id());
            return;
        }
        log::debug!("resending request {}", request.id());
        // Failures are already recorded on the request
        let _ = self.submit(request);
    }

    /// Time out a queued or in-flight request past its deadline
    pub(super) fn check_timeout(&mut self, request: &RequestHandle, now: Instant) -> TimerOutcome {
        if request.state().is_terminal() {
            request.disarm_timeout();
            return TimerOutcome::Done;
        }
        let Some(expired) =
            request.expired_state(now, self.request_timeout, self.connect_timeout)
        else {
            return TimerOutcome::Repeat;
        };

        log::debug!("request {} {:?}", request.id(), expired);
        request.set_error(format!("{:?}", expired));
        request.transition(expired, &self.events);
        request.disarm_timeout();
        TimerOutcome::Done
    }
}
