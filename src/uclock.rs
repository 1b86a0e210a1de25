//! Clocks
//!
//! Pipelines schedule against a monotonic clock ticking at 27 MHz, the
//! highest common timebase of broadcast systems. A [`Uclock`] is a shared
//! handle to a clock implementation; pipes obtain one through an
//! `ATTACH-UCLOCK` command or a `UCLOCK` request.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ticks per second.
pub const UCLOCK_FREQ: u64 = 27_000_000;

/// Clock implementation.
pub trait UclockOps: Send + Sync {
    /// Current date in 27 MHz ticks.
    fn now(&self) -> u64;
}

/// Shared clock handle.
#[derive(Clone)]
pub struct Uclock {
    inner: Arc<dyn UclockOps>,
}

impl Uclock {
    /// Wraps a clock implementation.
    pub fn new(ops: impl UclockOps + 'static) -> Self {
        Self {
            inner: Arc::new(ops),
        }
    }

    /// The standard monotonic clock.
    pub fn std() -> Self {
        Self::new(UclockStd {
            origin: Instant::now(),
        })
    }

    /// Current date in 27 MHz ticks.
    pub fn now(&self) -> u64 {
        self.inner.now()
    }
}

impl std::fmt::Debug for Uclock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uclock").field("now", &self.now()).finish()
    }
}

/// Converts a duration to 27 MHz ticks.
pub fn ticks_from_duration(duration: Duration) -> u64 {
    duration.as_secs() * UCLOCK_FREQ
        + u64::from(duration.subsec_nanos()) * (UCLOCK_FREQ / 1_000_000) / 1_000
}

struct UclockStd {
    origin: Instant,
}

impl UclockOps for UclockStd {
    fn now(&self) -> u64 {
        ticks_from_duration(self.origin.elapsed())
    }
}
