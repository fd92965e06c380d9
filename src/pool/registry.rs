//! Host name to host entry, owned by the HTTP context

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::connection_pool::ConnectionPool;
use super::host::HostEntry;
use super::store::ProtocolStore;
use super::variant::{ProtocolSupport, VariantKey};
use super::PoolServices;
use crate::network::RequestHandle;
use crate::utils::{NetError, Result};

/// Registry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Loaded,
    Shutdown,
}

/// Every host entry, plus the protocol support store
pub struct HostRegistry {
    hosts: HashMap<String, HostEntry>,
    services: Arc<PoolServices>,
    store: ProtocolStore,
    /// Persisted support older than this loads as unknown
    support_ttl: Duration,
    state: RegistryState,
}

impl HostRegistry {
    pub fn new(services: Arc<PoolServices>, store: ProtocolStore, support_ttl: Duration) -> Self {
        Self {
            hosts: HashMap::new(),
            services,
            store,
            support_ttl,
            state: RegistryState::Uninitialized,
        }
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn services(&self) -> &Arc<PoolServices> {
        &self.services
    }

    pub fn store(&self) -> &ProtocolStore {
        &self.store
    }

    /// Load the store unless that already happened
    pub fn ensure_loaded(&mut self) {
        if self.state == RegistryState::Uninitialized {
            self.load();
        }
    }

    /// Seed host entries from the protocol store
    pub fn load(&mut self) {
        let now = self.services.clock.system_time();
        for persisted in self.store.load(now, self.support_ttl) {
            let host = persisted.host.clone();
            self.get_or_create(&host).restore(persisted.variants);
        }
        self.state = RegistryState::Loaded;
    }

    /// Write learned protocol support; false if persistence is off
    pub fn save(&mut self) -> bool {
        let mut hosts: Vec<_> = self.hosts.values().filter_map(HostEntry::persisted).collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        self.store.save(&hosts)
    }

    pub fn get_or_create(&mut self, host: &str) -> &mut HostEntry {
        let services = &self.services;
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| HostEntry::new(host, Arc::clone(services)))
    }

    pub fn get(&self, host: &str) -> Option<&HostEntry> {
        self.hosts.get(host)
    }

    pub fn get_mut(&mut self, host: &str) -> Option<&mut HostEntry> {
        self.hosts.get_mut(host)
    }

    /// The pool for `key`, creating its host entry and pool if needed
    pub fn pool_for(&mut self, key: &VariantKey) -> &mut ConnectionPool {
        self.get_or_create(key.host()).get_pool(key)
    }

    /// The pool for `key`, if it exists
    pub fn find_pool(&mut self, key: &VariantKey) -> Option<&mut ConnectionPool> {
        self.hosts.get_mut(key.host())?.find_pool(key)
    }

    /// Route a request to its pool
    pub fn send(&mut self, request: RequestHandle) -> Result<()> {
        let key = request.variant_key()?;
        if !self.services.factories.supports(key.scheme()) {
            return Err(NetError::UnsupportedScheme(key.scheme().to_string()));
        }
        self.pool_for(&key).send(request);
        Ok(())
    }

    /// Record protocol support learned by a connection, persisting on change
    pub fn update_protocol_support(&mut self, key: &VariantKey, support: ProtocolSupport) -> bool {
        let at = self.services.clock.system_time();
        let changed = self
            .get_or_create(key.host())
            .update_protocol_support(key, support, at);
        if changed {
            log::debug!("{}: protocol support now {}", key, support);
            self.save();
        }
        changed
    }

    pub fn try_to_send_queued_for(&mut self, key: &VariantKey) -> usize {
        self.find_pool(key)
            .map(ConnectionPool::try_to_send_queued)
            .unwrap_or(0)
    }

    /// Shut every host down and persist what was learned
    pub fn shutdown(&mut self) {
        for entry in self.hosts.values_mut() {
            entry.shutdown();
        }
        if self.state != RegistryState::Uninitialized {
            self.save();
        }
        self.state = RegistryState::Shutdown;
    }

    /// Drop every host entry
    pub fn clear(&mut self) {
        self.hosts.clear();
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostEntry> {
        self.hosts.values()
    }
}
