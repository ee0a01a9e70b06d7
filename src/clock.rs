//! Time source for cache expiry.
//!
//! `QueryCache` only compares instants with each other, so a `Timestamp` is
//! an offset from the clock's own origin rather than wall-clock time.
//! `SimulatedClock` lets tests step across a TTL boundary exactly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Offset from the clock origin, nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Duration);

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs))
    }
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Monotonic clock anchored at construction
#[derive(Debug, Clone)]
pub struct ProductionClock {
    origin: Instant,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        ProductionClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for ProductionClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// Manually driven clock. Clones share one timeline.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    nanos: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        let clock = SimulatedClock::default();
        clock.advance_ms(start_ms);
        clock
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        // fetch_update never fails when the closure always returns Some
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(nanos))
            });
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        Timestamp(Duration::from_nanos(self.nanos.load(Ordering::SeqCst)))
    }
}
