//! Shared utilities: error types and time sources

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{NetError, Result};
