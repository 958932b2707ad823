//! Timing snapshots and presentation statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timing state captured at a tick or cycle boundary.
///
/// The same shape is delivered to the input dispatcher (via
/// `ticks_elapsed`), to every simulation object, and to tick and cycle
/// event subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickSnapshot {
    /// Number of completed cycles before this one.
    pub cycle_index: u64,
    /// Milliseconds elapsed on the cycle clock when the snapshot was taken.
    pub elapsed_ms: u64,
    /// Ticks already fired in the current cycle (0 for the first tick).
    pub tick_count: u64,
    /// Coarse count of tick intervals covered by the delta since the last
    /// tick. See `EstimateMode`.
    pub ticks_elapsed: u64,
}

/// Statistics published to the presentation layer once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Ticks fired during the most recently completed cycle.
    pub ticks_per_second: u64,
    /// Registered simulation objects at the time of publication.
    pub live_objects: u64,
    /// Index of the cycle that produced these numbers.
    pub cycle_index: u64,
    /// Wall-clock time of the last publication, if any has happened.
    pub updated_at: Option<DateTime<Utc>>,
}
