//! Pool identity and protocol support knowledge

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::network::Proxy;
use crate::utils::{NetError, Result};

const PROXY_SEPARATOR: &str = " proxy: ";

/// Identifies one connection pool: scheme, host, port and proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    scheme: String,
    host: String,
    port: u16,
    proxy: Option<String>,
}

impl VariantKey {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        proxy: Option<String>,
    ) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
            proxy,
        }
    }

    /// Key of the pool that serves `url`, optionally through `proxy`
    pub fn for_request(url: &Url, proxy: Option<&Proxy>) -> Result<Self> {
        let scheme = url.scheme();
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ if scheme == "file" => "localhost",
            _ => return Err(NetError::InvalidUri(format!("{} has no host", url))),
        };
        let port = url.port_or_known_default().unwrap_or(0);
        Ok(Self::new(
            scheme,
            host,
            port,
            proxy.map(|p| p.address().to_string()),
        ))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name; the Host Entry this pool belongs to
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(proxy) = &self.proxy {
            write!(f, "{}{}", PROXY_SEPARATOR, proxy)?;
        }
        Ok(())
    }
}

impl FromStr for VariantKey {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NetError::InvalidUri(s.to_string());
        let (base, proxy) = match s.split_once(PROXY_SEPARATOR) {
            Some((base, proxy)) => (base, Some(proxy.to_string())),
            None => (s, None),
        };
        let (scheme, authority) = base.split_once("://").ok_or_else(invalid)?;
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        if scheme.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(scheme, host, port, proxy))
    }
}

/// What the pool knows about a host's HTTP/2 capability
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolSupport {
    #[default]
    Unknown = 0,
    Http1 = 1,
    Http2 = 2,
}

impl ProtocolSupport {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Unknown),
            1 => Some(Self::Http1),
            2 => Some(Self::Http2),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolSupport::Unknown => "unknown",
            ProtocolSupport::Http1 => "HTTP/1",
            ProtocolSupport::Http2 => "HTTP/2",
        };
        f.write_str(name)
    }
}
