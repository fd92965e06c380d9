//! Time sources
//!
//! Every deadline in the core (idle eviction, request timeouts, protocol
//! support staleness) reads time through [`Clock`] so tests can drive it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic now, used for in-process deadlines
    fn now(&self) -> Instant;

    /// Wall-clock now, used for timestamps that outlive the process
    fn system_time(&self) -> SystemTime;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock
///
/// Both readings move together when [`ManualClock::advance`] is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(Instant, SystemTime)>>,
}

impl ManualClock {
    /// Create a clock frozen at the current time
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), SystemTime::now()))),
        }
    }

    /// Move both readings forward
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.0 += by;
            guard.1 += by;
        }
    }

    /// Set the wall-clock reading without touching the monotonic one
    pub fn set_system_time(&self, at: SystemTime) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.1 = at;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.inner.lock() {
            Ok(guard) => guard.0,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn system_time(&self) -> SystemTime {
        match self.inner.lock() {
            Ok(guard) => guard.1,
            Err(poisoned) => poisoned.into_inner().1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        let wall = clock.system_time();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now() - start, Duration::from_secs(5));
        assert_eq!(
            clock.system_time().duration_since(wall).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), other.now());
    }
}
