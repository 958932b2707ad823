//! Restartable monotonic clocks.
//!
//! The tick loop measures everything relative to the start of the current
//! cycle, so a clock here is a stopwatch: it reports time elapsed since the
//! last [`restart`](Clock::restart). Both implementations are lock-free and
//! can be read from any thread while the loop owns the restart.
//!
//! [`ManualClock`] only moves when told to, which makes tick timing fully
//! deterministic in tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Raw clock ticks per second reported by [`Clock::elapsed_ticks`].
pub const CLOCK_TICKS_PER_SECOND: u64 = 1_000_000_000;

/// A restartable stopwatch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the last restart (or construction).
    fn elapsed(&self) -> Duration;

    /// Reset the elapsed time to zero.
    fn restart(&self);

    /// Elapsed time in raw clock ticks ([`CLOCK_TICKS_PER_SECOND`] per
    /// second), saturating at `u64::MAX`.
    fn elapsed_ticks(&self) -> u64 {
        u64::try_from(self.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Wall-clock stopwatch backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    /// Nanoseconds after `origin` at which the current run started.
    started_at_ns: AtomicU64,
}

impl MonotonicClock {
    /// Create a clock that starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            started_at_ns: AtomicU64::new(0),
        }
    }

    fn now_ns(&self) -> u64 {
        saturating_nanos(self.origin.elapsed())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        let start = self.started_at_ns.load(Ordering::Acquire);
        Duration::from_nanos(self.now_ns().saturating_sub(start))
    }

    fn restart(&self) {
        self.started_at_ns.store(self.now_ns(), Ordering::Release);
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time source, so a test can keep one handle and
/// pass another to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    now_ns: AtomicU64,
    started_at_ns: AtomicU64,
}

impl ManualClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = saturating_nanos(by);
        // The closure never rejects, so the update cannot fail.
        self.inner
            .now_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(by))
            })
            .ok();
    }

    /// Total time since the clock was created, ignoring restarts.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.inner.now_ns.load(Ordering::Acquire))
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        let now = self.inner.now_ns.load(Ordering::Acquire);
        let start = self.inner.started_at_ns.load(Ordering::Acquire);
        Duration::from_nanos(now.saturating_sub(start))
    }

    fn restart(&self) {
        let now = self.inner.now_ns.load(Ordering::Acquire);
        self.inner.started_at_ns.store(now, Ordering::Release);
    }
}
