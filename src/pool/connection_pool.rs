//! Connections and pending requests for one variant key
//!
//! Admission control, reuse before create, creation deferral while the
//! host's HTTP/2 support is unknown, and idle recycling.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use super::variant::{ProtocolSupport, VariantKey};
use super::PoolServices;
use crate::engine::{TimerAction, TimerOutcome, TimerQueue};
use crate::network::{
    Connection, ConnectionId, ConnectionState, RequestHandle, RequestState, ShutdownKind,
};
use crate::utils::NetError;

/// Outcome of looking for a connection to serve a request
#[derive(Debug)]
pub enum Acquire {
    /// An existing connection can take the request
    Reused(Arc<dyn Connection>),
    /// A new connection was created and registered
    Created(Arc<dyn Connection>),
    /// Nothing available; the request has to queue
    Wait,
    /// No connection can be built for this key
    Failed(NetError),
}

/// Pool for one `(scheme, host, port, proxy)` destination
pub struct ConnectionPool {
    key: VariantKey,
    services: Arc<PoolServices>,
    /// Insertion order; scanned newest first
    connections: Vec<Arc<dyn Connection>>,
    queue: VecDeque<RequestHandle>,
    protocol_support: ProtocolSupport,
    support_updated: Option<SystemTime>,
    /// Connections with a recycle check in the timer queue
    recycle_armed: HashSet<ConnectionId>,
}

impl ConnectionPool {
    pub fn new(key: VariantKey, services: Arc<PoolServices>) -> Self {
        Self {
            key,
            services,
            connections: Vec::new(),
            queue: VecDeque::new(),
            protocol_support: ProtocolSupport::Unknown,
            support_updated: None,
            recycle_armed: HashSet::new(),
        }
    }

    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    /// Dispatch `request` now, or queue it behind the requests already waiting
    pub fn send(&mut self, request: RequestHandle) {
        if request.state().is_terminal() {
            log::debug!("{}: request {} is already {:?}, not sending", self.key, request.id(), request.state());
            return;
        }

        if !self.queue.is_empty() {
            self.queue.push_back(request);
            self.try_to_send_queued();
            return;
        }

        match self.get_next_available(&request) {
            Acquire::Reused(connection) | Acquire::Created(connection) => {
                self.dispatch(connection, request)
            }
            Acquire::Wait => {
                log::trace!("{}: queueing request {}", self.key, request.id());
                self.queue.push_back(request);
            }
            Acquire::Failed(err) => self.fail(request, err),
        }
    }

    /// Find or create a connection able to serve `request`
    pub fn get_next_available(&mut self, request: &RequestHandle) -> Acquire {
        let mut active = 0;
        let mut index = self.connections.len();
        while index > 0 {
            index -= 1;
            let connection = Arc::clone(&self.connections[index]);
            let state = connection.state();
            if state.is_closed() {
                continue;
            }

            let eligible = state.is_idle()
                || (connection.can_process_multiple() && state == ConnectionState::Processing);
            if eligible {
                if connection.test_connection() {
                    log::trace!("{}: reusing connection {} for request {}", self.key, connection.id(), request.id());
                    return Acquire::Reused(connection);
                }
                log::debug!("{}: connection {} failed its liveness test", self.key, connection.id());
                self.connections.remove(index);
                self.close(&connection, ShutdownKind::Immediate);
                continue;
            }

            active += 1;
        }

        if active >= self.services.max_connections {
            log::trace!("{}: {} active connections, at the limit", self.key, active);
            return Acquire::Wait;
        }

        if active >= 1
            && matches!(
                self.protocol_support,
                ProtocolSupport::Unknown | ProtocolSupport::Http2
            )
        {
            log::trace!(
                "{}: protocol support {}, waiting for the first connection",
                self.key,
                self.protocol_support
            );
            return Acquire::Wait;
        }

        let services = &self.services;
        match services.factories.create(
            &self.key,
            services.keep_alive,
            services.clock.now(),
            &services.events,
        ) {
            Ok(connection) => {
                log::debug!("{}: created connection {}", self.key, connection.id());
                self.connections.push(Arc::clone(&connection));
                Acquire::Created(connection)
            }
            Err(err) => Acquire::Failed(err),
        }
    }

    /// A connection finished its request: park it as free and arm its idle check
    pub fn recycle(&mut self, id: ConnectionId, timers: &mut TimerQueue) -> bool {
        let Some(connection) = self.find(id) else {
            log::warn!("{}: recycled connection {} not found", self.key, id);
            return false;
        };
        connection.set_state(ConnectionState::Free);

        if self.recycle_armed.insert(id) {
            let due = self.services.clock.now() + self.services.recycle_check_interval;
            timers.schedule(
                due,
                TimerAction::RecycleCheck {
                    key: self.key.clone(),
                    connection: id,
                },
            );
        }
        true
    }

    /// Close the connection if it sat free past its keep-alive
    pub fn recycle_check(&mut self, id: ConnectionId) -> TimerOutcome {
        let Some(connection) = self.find(id) else {
            self.recycle_armed.remove(&id);
            return TimerOutcome::Done;
        };
        if connection.state() != ConnectionState::Free {
            self.recycle_armed.remove(&id);
            return TimerOutcome::Done;
        }

        let idle = self
            .services
            .clock
            .now()
            .saturating_duration_since(connection.last_process_time());
        if idle < connection.keep_alive() {
            return TimerOutcome::Repeat;
        }

        log::debug!("{}: closing connection {} idle for {:?}", self.key, id, idle);
        self.connections.retain(|c| c.id() != id);
        self.recycle_armed.remove(&id);
        self.close(&connection, ShutdownKind::Gentle);
        TimerOutcome::Done
    }

    /// Drop a connection from the pool in its final state
    pub fn remove(&mut self, id: ConnectionId, state: ConnectionState) -> bool {
        let Some(index) = self.connections.iter().position(|c| c.id() == id) else {
            log::warn!("{}: connection {} not found for removal", self.key, id);
            return false;
        };
        let connection = self.connections.remove(index);
        self.recycle_armed.remove(&id);
        connection.set_state(state);
        connection.dispose();
        true
    }

    /// Serve queued requests in order until the head one cannot be served
    pub fn try_to_send_queued(&mut self) -> usize {
        let mut sent = 0;
        while let Some(head) = self.queue.front() {
            if head.state().is_terminal() {
                log::debug!("{}: dropping request {} that ended while queued", self.key, head.id());
                self.queue.pop_front();
                continue;
            }

            let request = Arc::clone(head);
            match self.get_next_available(&request) {
                Acquire::Reused(connection) | Acquire::Created(connection) => {
                    self.queue.pop_front();
                    self.dispatch(connection, request);
                    sent += 1;
                }
                Acquire::Wait => break,
                Acquire::Failed(err) => {
                    self.queue.pop_front();
                    self.fail(request, err);
                }
            }
        }
        sent
    }

    /// Empty the queue and close every connection
    pub fn shutdown(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.recycle_armed.clear();

        for connection in self.connections.drain(..) {
            let id = connection.id();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                connection.set_state(ConnectionState::Closed);
                let result = connection.shutdown(ShutdownKind::Immediate);
                connection.dispose();
                result
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("{}: closing connection {} failed: {}", self.key, id, err),
                Err(_) => log::warn!("{}: closing connection {} panicked", self.key, id),
            }
        }
        log::debug!("{}: shut down, dropped {} queued requests", self.key, dropped);
    }

    /// Close every free connection now
    pub fn remove_all_idle(&mut self) -> usize {
        let (idle, busy): (Vec<_>, Vec<_>) = self
            .connections
            .drain(..)
            .partition(|c| c.state() == ConnectionState::Free);
        self.connections = busy;
        for connection in &idle {
            self.recycle_armed.remove(&connection.id());
            self.close(connection, ShutdownKind::Immediate);
        }
        idle.len()
    }

    pub fn protocol_support(&self) -> ProtocolSupport {
        self.protocol_support
    }

    /// When protocol support was last learned
    pub fn support_updated(&self) -> Option<SystemTime> {
        self.support_updated
    }

    pub fn set_protocol_support(&mut self, support: ProtocolSupport, at: SystemTime) {
        self.protocol_support = support;
        self.support_updated = Some(at);
    }

    pub fn connections(&self) -> &[Arc<dyn Connection>] {
        &self.connections
    }

    pub fn find(&self, id: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.iter().find(|c| c.id() == id).cloned()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Connections that count against the per-host limit
    pub fn active_count(&self) -> usize {
        self.connections
            .iter()
            .map(|c| c.state())
            .filter(|s| !s.is_idle() && !s.is_closed())
            .count()
    }

    fn dispatch(&mut self, connection: Arc<dyn Connection>, request: RequestHandle) {
        let services = Arc::clone(&self.services);
        if !request.transition(RequestState::Processing, &services.events) {
            log::debug!("{}: request {} ended before dispatch", self.key, request.id());
            return;
        }
        request.mark_processing(services.clock.now());
        request.prepare();
        connection.set_state(ConnectionState::Processing);
        log::trace!("{}: request {} -> connection {}", self.key, request.id(), connection.id());

        let handed = Arc::clone(&request);
        if panic::catch_unwind(AssertUnwindSafe(|| connection.process(handed))).is_err() {
            log::error!("{}: connection {} panicked in process, resending request {}", self.key, connection.id(), request.id());
            self.remove(connection.id(), ConnectionState::Closed);
            services.events.resend(request);
        }
    }

    fn fail(&self, request: RequestHandle, err: NetError) {
        log::warn!("{}: request {} failed: {}", self.key, request.id(), err);
        request.set_error(err.to_string());
        request.transition(RequestState::Error, &self.services.events);
    }

    fn close(&self, connection: &Arc<dyn Connection>, kind: ShutdownKind) {
        connection.set_state(ConnectionState::Closed);
        if let Err(err) = connection.shutdown(kind) {
            log::warn!("{}: closing connection {} failed: {}", self.key, connection.id(), err);
        }
        connection.dispose();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("key", &self.key.to_string())
            .field("connections", &self.connections.len())
            .field("queued", &self.queue.len())
            .field("protocol_support", &self.protocol_support)
            .finish()
    }
}
