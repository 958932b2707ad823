//! Statistics handed to the presentation layer.
//!
//! The tick thread writes once per cycle; a UI thread reads whenever it
//! redraws. All fields are atomics so neither side ever blocks the other.
//! Fields are independent: a reader racing a publication may see the new
//! rate next to the previous object count for one frame.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use senryaku_types::StatsSnapshot;

/// Sentinel stored in `updated_at_ms` before the first publication.
const NEVER: i64 = i64::MIN;

/// Passively observed statistics written by the scheduler.
#[derive(Debug)]
pub struct PresentationContext {
    ticks_per_second: AtomicU64,
    live_objects: AtomicU64,
    cycle_index: AtomicU64,
    updated_at_ms: AtomicI64,
}

impl PresentationContext {
    /// Create a context with all statistics at zero.
    pub const fn new() -> Self {
        Self {
            ticks_per_second: AtomicU64::new(0),
            live_objects: AtomicU64::new(0),
            cycle_index: AtomicU64::new(0),
            updated_at_ms: AtomicI64::new(NEVER),
        }
    }

    /// Publish one cycle's statistics.
    pub fn publish(&self, ticks_per_second: u64, live_objects: u64, cycle_index: u64) {
        self.ticks_per_second
            .store(ticks_per_second, Ordering::Release);
        self.live_objects.store(live_objects, Ordering::Release);
        self.cycle_index.store(cycle_index, Ordering::Release);
        self.updated_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Overwrite the measured tick rate.
    pub fn set_ticks_per_second(&self, value: u64) {
        self.ticks_per_second.store(value, Ordering::Release);
    }

    /// Overwrite the live object count.
    pub fn set_live_objects(&self, value: u64) {
        self.live_objects.store(value, Ordering::Release);
    }

    /// Ticks fired during the last completed cycle.
    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second.load(Ordering::Acquire)
    }

    /// Registered objects at the last publication.
    pub fn live_objects(&self) -> u64 {
        self.live_objects.load(Ordering::Acquire)
    }

    /// Wall-clock time of the last publication.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.updated_at_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Read every field into a serializable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_per_second: self.ticks_per_second(),
            live_objects: self.live_objects(),
            cycle_index: self.cycle_index.load(Ordering::Acquire),
            updated_at: self.updated_at(),
        }
    }
}

impl Default for PresentationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn starts_unpublished() {
        let ctx = PresentationContext::new();
        let snap = ctx.snapshot();
        assert_eq!(snap.ticks_per_second, 0);
        assert_eq!(snap.live_objects, 0);
        assert!(snap.updated_at.is_none());
    }

    #[test]
    fn publish_sets_every_field() {
        let ctx = PresentationContext::new();
        let before = Utc::now();
        ctx.publish(79, 12, 4);
        let snap = ctx.snapshot();
        assert_eq!(snap.ticks_per_second, 79);
        assert_eq!(snap.live_objects, 12);
        assert_eq!(snap.cycle_index, 4);
        let at = snap.updated_at.unwrap();
        assert!(at.timestamp_millis() >= before.timestamp_millis());
    }

    #[test]
    fn individual_setters() {
        let ctx = PresentationContext::new();
        ctx.set_ticks_per_second(60);
        ctx.set_live_objects(3);
        assert_eq!(ctx.ticks_per_second(), 60);
        assert_eq!(ctx.live_objects(), 3);
        assert!(ctx.updated_at().is_none());
    }

    #[test]
    fn readable_from_another_thread() {
        let ctx = Arc::new(PresentationContext::new());
        let writer = Arc::clone(&ctx);
        thread::spawn(move || writer.publish(80, 2, 1))
            .join()
            .unwrap();
        assert_eq!(ctx.ticks_per_second(), 80);
    }
}
