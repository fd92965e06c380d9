//! Developer tools
//!
//! Observers that attach to the event channels for inspection without
//! changing how records are handled.

mod network_inspector;

pub use network_inspector::{NetworkInspector, NetworkRequest, RequestStatus};

use std::sync::{Arc, Mutex};

use crate::events::{EventHub, ObserverId};

/// Inspection tools that can be switched on for a running context
pub struct DevTools {
    pub network_inspector: Arc<Mutex<NetworkInspector>>,
    observer: Option<ObserverId>,
}

impl DevTools {
    pub fn new() -> Self {
        Self {
            network_inspector: Arc::new(Mutex::new(NetworkInspector::new())),
            observer: None,
        }
    }

    /// Start observing `hub`
    pub fn enable(&mut self, hub: &mut EventHub) {
        if self.observer.is_none() {
            self.observer = Some(NetworkInspector::attach(&self.network_inspector, hub));
        }
    }

    /// Stop observing `hub`
    pub fn disable(&mut self, hub: &mut EventHub) {
        if let Some(id) = self.observer.take() {
            hub.requests.unsubscribe(id);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    /// Drop collected data
    pub fn clear_all(&self) {
        if let Ok(mut network) = self.network_inspector.lock() {
            network.clear();
        }
    }
}

impl Default for DevTools {
    fn default() -> Self {
        Self::new()
    }
}
