//! Network primitives shared by the pools and the event dispatcher
//!
//! Requests, responses, and the connection and protocol capabilities that
//! transport implementations provide.

mod cache;
mod connection;
mod protocol;
mod request;
mod response;

pub use cache::{CacheControl, CacheEntry, CacheStats, HttpCache, ResponseCache};
#[cfg(test)]
pub use cache::MockResponseCache;
pub use connection::{
    Connection, ConnectionBase, ConnectionFactories, ConnectionFactory, ConnectionId,
    ConnectionState, NewConnection, ShutdownKind,
};
pub use protocol::{Protocol, ProtocolId};
pub use request::{
    CompletionCallback, HeadersCallback, HttpRequest, Method, ProgressCallback, Proxy,
    RequestHandle, RequestId, RequestOptions, RequestState, StreamingCallback, TimingEvent,
    UpgradeCallback,
};
pub use response::Response;
