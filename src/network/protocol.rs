//! Upgraded protocol sessions (HTTP/2 sessions, WebSockets) layered over a connection

use std::fmt;

use super::connection::ShutdownKind;
use crate::pool::VariantKey;

/// Unique protocol session identifier
pub type ProtocolId = u64;

/// A protocol session whose events are pumped on the heartbeat thread
pub trait Protocol: Send + Sync {
    fn id(&self) -> ProtocolId;

    /// Pool of the connection the session runs on
    fn key(&self) -> &VariantKey;

    /// Process whatever the session's workers queued up
    fn handle_events(&self);

    fn is_closed(&self) -> bool;

    fn shutdown(&self, kind: ShutdownKind);
}

impl fmt::Debug for dyn Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id())
            .field("key", &self.key().to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}
