//! Responses delivered to completion callbacks

use std::collections::HashMap;

/// HTTP response attached to a request by its connection (or by the cache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    from_cache: bool,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Header names are stored lowercased
    pub fn with_headers(
        status: u16,
        body: impl Into<Vec<u8>>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Mark this response as served from the local cache
    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 3xx
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 5xx; these make a request eligible for cache fallback
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Whether the body came from the cache instead of the network
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Parsed `content-length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|s| s.parse().ok())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers
            .insert(key.into().to_ascii_lowercase(), value.into());
    }
}
