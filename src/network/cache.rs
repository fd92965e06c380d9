//! Response cache used as a fallback source
//!
//! When a request fails outright or ends with a server error, a fresh entry
//! stored here can be delivered in its place. `Cache-Control` decides what
//! is kept and for how long. A "save cache" plugin event writes the fresh
//! entries to disk as JSON.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::response::Response;
use crate::utils::{NetError, Result};

/// Lifetime granted to `immutable` responses without an explicit max-age
const IMMUTABLE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// What the event dispatcher needs from a response cache
#[cfg_attr(test, mockall::automock)]
pub trait ResponseCache: Send {
    /// Whether a still-fresh entry exists for `url`
    fn has_fresh(&self, url: &str) -> bool;

    /// Load the cached response for `url`
    fn load(&self, url: &str) -> Result<Response>;

    /// Keep a response received from the network; true if it was cached
    fn store(&self, url: &str, response: &Response) -> bool;

    /// Persist the cache to its backing store
    fn save(&self) -> Result<()>;
}

/// One stored response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    /// Validators handed back with the cached response
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }

    /// Freshness left before the entry expires
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }

    /// Rebuild the response, flagged as coming from the cache
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.status, self.body.clone());
        if !self.content_type.is_empty() {
            response.add_header("content-type", self.content_type.clone());
        }
        if let Some(etag) = &self.etag {
            response.add_header("etag", etag.clone());
        }
        if let Some(last_modified) = &self.last_modified {
            response.add_header("last-modified", last_modified.clone());
        }
        response.cached()
    }

    fn from_response(response: &Response, ttl: Duration) -> Self {
        Self {
            status: response.status(),
            body: response.body().to_vec(),
            content_type: response.content_type().unwrap_or_default().to_string(),
            etag: response.header("etag").map(str::to_string),
            last_modified: response.header("last-modified").map(str::to_string),
            created_at: Instant::now(),
            ttl,
        }
    }
}

/// The `Cache-Control` directives the cache acts on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    /// Takes precedence over `max_age`
    pub s_maxage: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub immutable: bool,
}

impl CacheControl {
    /// Parse a header value; unknown directives are ignored
    pub fn parse(header: &str) -> Self {
        let mut control = Self::default();
        for directive in header.split(',').map(|d| d.trim().to_ascii_lowercase()) {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive.as_str(), None),
            };
            match (name, value) {
                ("no-cache", _) => control.no_cache = true,
                ("no-store", _) => control.no_store = true,
                ("immutable", _) => control.immutable = true,
                ("max-age", Some(secs)) => control.max_age = secs.parse().ok(),
                ("s-maxage", Some(secs)) => control.s_maxage = secs.parse().ok(),
                _ => {}
            }
        }
        control
    }

    pub fn is_cacheable(&self) -> bool {
        !self.no_store
    }

    /// How long a response may be served from the cache; `None` if unspecified
    pub fn ttl(&self) -> Option<Duration> {
        if self.no_store || self.no_cache {
            Some(Duration::ZERO)
        } else if let Some(secs) = self.s_maxage.or(self.max_age) {
            Some(Duration::from_secs(secs))
        } else if self.immutable {
            Some(IMMUTABLE_TTL)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    status: u16,
    body: Vec<u8>,
    content_type: String,
    etag: Option<String>,
    last_modified: Option<String>,
    remaining_secs: u64,
}

impl StoredEntry {
    fn new(url: &str, entry: &CacheEntry) -> Self {
        Self {
            url: url.to_string(),
            status: entry.status,
            body: entry.body.clone(),
            content_type: entry.content_type.clone(),
            etag: entry.etag.clone(),
            last_modified: entry.last_modified.clone(),
            remaining_secs: entry.remaining().as_secs(),
        }
    }

    fn into_entry(self, now: Instant) -> (String, CacheEntry) {
        let entry = CacheEntry {
            status: self.status,
            body: self.body,
            content_type: self.content_type,
            etag: self.etag,
            last_modified: self.last_modified,
            created_at: now,
            ttl: Duration::from_secs(self.remaining_secs),
        };
        (self.url, entry)
    }
}

/// URL-keyed response cache bounded by total body size and entry count
#[derive(Clone)]
pub struct HttpCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_size: usize,
    max_entries: usize,
    /// JSON file written by `save`
    store_path: Option<PathBuf>,
}

impl HttpCache {
    /// Memory-only cache holding up to 50 MiB in 1000 entries
    pub fn new() -> Self {
        Self::with_limits(50 * 1024 * 1024, 1000)
    }

    pub fn with_limits(max_size: usize, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_size,
            max_entries,
            store_path: None,
        }
    }

    /// Persist to `path` on save
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// The entry for `url` if it is still fresh
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().ok()?;
        entries.get(url).filter(|entry| entry.is_fresh()).cloned()
    }

    /// Insert `entry`, evicting expired and then oldest entries to fit it.
    ///
    /// Entries with no lifetime or larger than the whole cache are dropped.
    pub fn put(&self, url: &str, entry: CacheEntry) {
        if entry.ttl.is_zero() || entry.body.len() > self.max_size {
            return;
        }
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        entries.remove(url);
        self.make_room(&mut entries, entry.body.len());
        entries.insert(url.to_string(), entry);
    }

    /// Keep `response` if its `Cache-Control` allows it; true if now cached
    pub fn store_response(&self, url: &str, response: &Response) -> bool {
        let control = response
            .header("cache-control")
            .map(CacheControl::parse)
            .unwrap_or_default();
        match control.ttl() {
            Some(ttl) if control.is_cacheable() && !ttl.is_zero() => {
                self.put(url, CacheEntry::from_response(response, ttl));
                self.get(url).is_some()
            }
            _ => false,
        }
    }

    pub fn remove(&self, url: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(url);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Read back entries written by a previous `save`; a missing file is empty
    pub fn load_store(&self) -> Result<usize> {
        let Some(path) = &self.store_path else {
            return Ok(0);
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let stored: Vec<StoredEntry> = serde_json::from_slice(&bytes)?;

        let now = Instant::now();
        let mut loaded = 0;
        for (url, entry) in stored
            .into_iter()
            .filter(|e| e.remaining_secs > 0)
            .map(|e| e.into_entry(now))
        {
            self.put(&url, entry);
            loaded += 1;
        }
        log::debug!("loaded {} cache entries from {}", loaded, path.display());
        Ok(loaded)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes) = self
            .entries
            .read()
            .map(|entries| (entries.len(), Self::total_size(&entries)))
            .unwrap_or_default();
        CacheStats {
            entries,
            size_bytes,
            max_size_bytes: self.max_size,
        }
    }

    fn make_room(&self, entries: &mut HashMap<String, CacheEntry>, incoming: usize) {
        let fits = |entries: &HashMap<String, CacheEntry>| {
            Self::total_size(entries) + incoming <= self.max_size
                && entries.len() < self.max_entries
        };
        if fits(&*entries) {
            return;
        }

        entries.retain(|_, e| e.is_fresh());
        while !fits(&*entries) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(url, _)| url.clone());
            match oldest {
                Some(url) => {
                    entries.remove(&url);
                }
                None => break,
            }
        }
    }

    fn total_size(entries: &HashMap<String, CacheEntry>) -> usize {
        entries.values().map(|e| e.body.len()).sum()
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for HttpCache {
    fn has_fresh(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    fn load(&self, url: &str) -> Result<Response> {
        self.get(url)
            .map(|entry| entry.to_response())
            .ok_or_else(|| NetError::Cache(format!("no fresh entry for {}", url)))
    }

    fn store(&self, url: &str, response: &Response) -> bool {
        self.store_response(url, response)
    }

    /// Write every fresh entry to a temp file, then rename it into place
    fn save(&self) -> Result<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let stored: Vec<StoredEntry> = self
            .entries
            .read()
            .map_err(|_| NetError::Cache("cache lock poisoned".to_string()))?
            .iter()
            .filter(|(_, e)| e.is_fresh())
            .map(|(url, e)| StoredEntry::new(url, e))
            .collect();

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&stored)?)?;
        fs::rename(&tmp, path)?;
        log::debug!("saved {} cache entries to {}", stored.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
}
