//! Memory reuse for the streaming path
//!
//! Streaming body chunks travel from worker threads to the heartbeat thread
//! in pooled buffers so steady-state downloads do not allocate per chunk.

pub mod pool;

pub use pool::{BufferPool, PoolStats};
