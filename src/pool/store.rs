//! Binary protocol support store
//!
//! Layout, little endian:
//!
//! ```text
//! u32 version
//! u32 host count
//!   string host
//!   u32 variant count
//!     string variant key
//!     i64 last update, unix milliseconds
//!     u8  protocol support
//! ```
//!
//! Strings are a u32 byte length followed by UTF-8.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::variant::{ProtocolSupport, VariantKey};
use crate::utils::{NetError, Result};

/// Current on-disk format
pub const STORE_VERSION: u32 = 1;

/// Learned support for one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedVariant {
    pub key: VariantKey,
    pub support: ProtocolSupport,
    pub updated: SystemTime,
}

/// Learned support for every pool of one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedHost {
    pub host: String,
    pub variants: Vec<PersistedVariant>,
}

/// File-backed store; disables itself after the first I/O failure
#[derive(Debug)]
pub struct ProtocolStore {
    path: Option<PathBuf>,
    /// Set by the first I/O failure; persistence stays off afterwards
    failure: Option<NetError>,
}

impl ProtocolStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            failure: None,
        }
    }

    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some() && self.failure.is_none()
    }

    /// Why persistence was turned off, if it was
    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    /// Read the store; entries older than `ttl` come back as `Unknown`
    pub fn load(&mut self, now: SystemTime, ttl: Duration) -> Vec<PersistedHost> {
        let Some(path) = self.path.clone().filter(|_| self.failure.is_none()) else {
            return Vec::new();
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                self.disable(&path, err);
                return Vec::new();
            }
        };

        let mut hosts = match decode(&bytes) {
            Ok(hosts) => hosts,
            Err(err) => {
                log::warn!("discarding protocol store {}: {}", path.display(), err);
                return Vec::new();
            }
        };
        for variant in hosts.iter_mut().flat_map(|h| h.variants.iter_mut()) {
            let stale = now
                .duration_since(variant.updated)
                .map(|age| age >= ttl)
                .unwrap_or(false);
            if stale {
                variant.support = ProtocolSupport::Unknown;
            }
        }
        log::debug!("loaded protocol support for {} hosts", hosts.len());
        hosts
    }

    /// Replace the store atomically; false if persistence is off
    pub fn save(&mut self, hosts: &[PersistedHost]) -> bool {
        let Some(path) = self.path.clone().filter(|_| self.failure.is_none()) else {
            return false;
        };
        let tmp = path.with_extension("tmp");
        let written = fs::write(&tmp, encode(hosts)).and_then(|()| fs::rename(&tmp, &path));
        match written {
            Ok(()) => true,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                self.disable(&path, err);
                false
            }
        }
    }

    fn disable(&mut self, path: &Path, err: std::io::Error) {
        if self.failure.is_none() {
            let failure = NetError::Persistence(format!("{}: {}", path.display(), err));
            log::warn!("persistence disabled: {}", failure);
            self.failure = Some(failure);
        }
    }
}

pub fn encode(hosts: &[PersistedHost]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&STORE_VERSION.to_le_bytes());
    out.extend_from_slice(&(hosts.len() as u32).to_le_bytes());
    for host in hosts {
        write_str(&mut out, &host.host);
        out.extend_from_slice(&(host.variants.len() as u32).to_le_bytes());
        for variant in &host.variants {
            write_str(&mut out, &variant.key.to_string());
            out.extend_from_slice(&to_millis(variant.updated).to_le_bytes());
            out.push(variant.support.as_byte());
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<PersistedHost>> {
    let mut reader = Reader { bytes, pos: 0 };
    let version = reader.u32()?;
    if version != STORE_VERSION {
        return Err(NetError::Format(format!("unsupported store version {}", version)));
    }

    let host_count = reader.u32()?;
    let mut hosts = Vec::new();
    for _ in 0..host_count {
        let host = reader.string()?;
        let variant_count = reader.u32()?;
        let mut variants = Vec::new();
        for _ in 0..variant_count {
            let key = reader.string()?.parse()?;
            let updated = from_millis(reader.i64()?);
            let byte = reader.u8()?;
            let support = ProtocolSupport::from_byte(byte)
                .ok_or_else(|| NetError::Format(format!("bad protocol support byte {}", byte)))?;
            variants.push(PersistedVariant {
                key,
                support,
                updated,
            });
        }
        hosts.push(PersistedHost { host, variants });
    }
    Ok(hosts)
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

fn from_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| NetError::Format("truncated protocol store".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| NetError::Format("invalid UTF-8 in protocol store".to_string()))
    }
}
