//! Active upgraded protocol sessions

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::network::{Protocol, ProtocolId, ShutdownKind};

/// Protocols currently layered over pooled connections
#[derive(Debug, Default)]
pub struct ProtocolRouter {
    active: Vec<Arc<dyn Protocol>>,
}

impl ProtocolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly upgraded protocol; duplicates are ignored
    pub fn register(&mut self, protocol: Arc<dyn Protocol>) -> bool {
        if self.contains(protocol.id()) {
            return false;
        }
        log::debug!("{}: protocol {} active", protocol.key(), protocol.id());
        self.active.push(protocol);
        true
    }

    pub fn remove(&mut self, id: ProtocolId) -> Option<Arc<dyn Protocol>> {
        let index = self.active.iter().position(|p| p.id() == id)?;
        Some(self.active.remove(index))
    }

    pub fn contains(&self, id: ProtocolId) -> bool {
        self.active.iter().any(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Shut down every active protocol; panics are logged
    pub fn shutdown_all(&mut self, kind: ShutdownKind) {
        for protocol in self.active.drain(..) {
            let id = protocol.id();
            if panic::catch_unwind(AssertUnwindSafe(|| protocol.shutdown(kind))).is_err() {
                log::warn!("protocol {} panicked during shutdown", id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
