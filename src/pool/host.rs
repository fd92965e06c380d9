//! All pools of one host name

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::connection_pool::ConnectionPool;
use super::store::{PersistedHost, PersistedVariant};
use super::variant::{ProtocolSupport, VariantKey};
use super::PoolServices;
use crate::network::RequestHandle;
use crate::utils::Result;

/// Alt-Svc max-age when the header does not carry one
const DEFAULT_ALT_SVC_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// One alternative service advertised through `Alt-Svc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltService {
    /// ALPN protocol id, e.g. `h2` or `h3`
    pub protocol: String,
    /// Alternative host; `None` means the same host
    pub host: Option<String>,
    pub port: u16,
    pub max_age: Duration,
}

impl AltService {
    /// Parse an `Alt-Svc` header value; `clear` yields no services
    pub fn parse_header(value: &str) -> Vec<AltService> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("clear") {
            return Vec::new();
        }
        value.split(',').filter_map(Self::parse_one).collect()
    }

    fn parse_one(entry: &str) -> Option<AltService> {
        let mut parts = entry.split(';').map(str::trim);
        let (protocol, authority) = parts.next()?.split_once('=')?;
        let authority = authority.trim().trim_matches('"');
        let (host, port) = authority.rsplit_once(':')?;
        let port = port.parse().ok()?;

        let mut max_age = DEFAULT_ALT_SVC_MAX_AGE;
        for param in parts {
            if let Some(secs) = param.strip_prefix("ma=") {
                max_age = Duration::from_secs(secs.trim().parse().ok()?);
            }
        }

        Some(AltService {
            protocol: protocol.trim().to_string(),
            host: (!host.is_empty()).then(|| host.to_string()),
            port,
            max_age,
        })
    }
}

/// Pools for every variant of one host, keyed by variant key
pub struct HostEntry {
    host: String,
    variants: HashMap<VariantKey, ConnectionPool>,
    alt_services: Vec<AltService>,
    services: Arc<PoolServices>,
}

impl HostEntry {
    pub fn new(host: impl Into<String>, services: Arc<PoolServices>) -> Self {
        Self {
            host: host.into(),
            variants: HashMap::new(),
            alt_services: Vec::new(),
            services,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The pool for `key`, created on first use
    pub fn get_pool(&mut self, key: &VariantKey) -> &mut ConnectionPool {
        let services = &self.services;
        self.variants
            .entry(key.clone())
            .or_insert_with(|| ConnectionPool::new(key.clone(), Arc::clone(services)))
    }

    pub fn find_pool(&mut self, key: &VariantKey) -> Option<&mut ConnectionPool> {
        self.variants.get_mut(key)
    }

    pub fn pools(&self) -> impl Iterator<Item = &ConnectionPool> {
        self.variants.values()
    }

    pub fn send(&mut self, request: RequestHandle) -> Result<()> {
        let key = request.variant_key()?;
        self.get_pool(&key).send(request);
        Ok(())
    }

    pub fn try_to_send_queued(&mut self) -> usize {
        self.variants
            .values_mut()
            .map(ConnectionPool::try_to_send_queued)
            .sum()
    }

    /// Record what `key`'s connections negotiated; true if it changed.
    ///
    /// HTTP/2 unblocks dispatch that was deferred on the pool.
    pub fn update_protocol_support(
        &mut self,
        key: &VariantKey,
        support: ProtocolSupport,
        at: SystemTime,
    ) -> bool {
        let pool = self.get_pool(key);
        let changed = pool.protocol_support() != support;
        pool.set_protocol_support(support, at);
        if support == ProtocolSupport::Http2 {
            pool.try_to_send_queued();
        }
        changed
    }

    pub fn shutdown(&mut self) {
        for pool in self.variants.values_mut() {
            pool.shutdown();
        }
    }

    /// Replace the advertised alternative services from an `Alt-Svc` header
    pub fn set_alt_svc_header(&mut self, value: &str) {
        self.alt_services = AltService::parse_header(value);
        log::debug!("{}: {} alternative services", self.host, self.alt_services.len());
    }

    pub fn alt_services(&self) -> &[AltService] {
        &self.alt_services
    }

    /// Snapshot of the learned protocol support for persistence
    pub fn persisted(&self) -> Option<PersistedHost> {
        let mut variants: Vec<_> = self
            .variants
            .values()
            .filter_map(|pool| {
                pool.support_updated().map(|updated| PersistedVariant {
                    key: pool.key().clone(),
                    support: pool.protocol_support(),
                    updated,
                })
            })
            .collect();
        if variants.is_empty() {
            return None;
        }
        variants.sort_by(|a, b| a.key.cmp(&b.key));
        Some(PersistedHost {
            host: self.host.clone(),
            variants,
        })
    }

    /// Seed pools with persisted protocol support
    pub fn restore(&mut self, variants: Vec<PersistedVariant>) {
        for variant in variants {
            self.get_pool(&variant.key)
                .set_protocol_support(variant.support, variant.updated);
        }
    }
}
