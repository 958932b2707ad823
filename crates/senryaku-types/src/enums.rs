//! Enumeration types for the Senryaku tick scheduler.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration keys
// ---------------------------------------------------------------------------

/// A configuration setting understood by the configuration store.
///
/// The set is closed: lookups can only name one of these variants, so an
/// unknown key is a compile error rather than a runtime miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    /// Target simulation rate in ticks per second. Must be positive.
    TicksPerSecond,
    /// Length of the statistics cycle in milliseconds.
    CycleLengthMs,
    /// How long `stop` waits for the background loop before giving up.
    ShutdownGraceMs,
    /// Sleep between loop iterations when no tick is due, in microseconds.
    IdleSleepMicros,
    /// How the per-tick "ticks elapsed" estimate is computed.
    EstimateMode,
}

impl SettingKind {
    /// Every setting kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::TicksPerSecond,
        Self::CycleLengthMs,
        Self::ShutdownGraceMs,
        Self::IdleSleepMicros,
        Self::EstimateMode,
    ];

    /// Stable snake-case name used in logs and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::TicksPerSecond => "ticks_per_second",
            Self::CycleLengthMs => "cycle_length_ms",
            Self::ShutdownGraceMs => "shutdown_grace_ms",
            Self::IdleSleepMicros => "idle_sleep_micros",
            Self::EstimateMode => "estimate_mode",
        }
    }
}

impl core::fmt::Display for SettingKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Scheduler lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle phase of a tick scheduler.
///
/// Transitions only move forward: `Idle -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerPhase {
    /// Constructed, never started.
    Idle,
    /// Background loop is live.
    Running,
    /// Stop requested; waiting for the loop to observe the flag.
    Stopping,
    /// Loop has exited or was detached after the grace period.
    Stopped,
}

impl SchedulerPhase {
    /// Encode the phase for storage in an atomic.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
        }
    }

    /// Decode a phase previously produced by [`as_u8`](Self::as_u8).
    ///
    /// Unknown values decode as [`SchedulerPhase::Stopped`].
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// How the coarse "ticks elapsed" value handed to consumers is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMode {
    /// Whole tick intervals contained in the full delta, at nanosecond
    /// resolution.
    #[default]
    Exact,
    /// Legacy arithmetic: the millisecond component of the delta divided by
    /// the millisecond component of the tick interval. Whole seconds are
    /// discarded and sub-millisecond interval precision is lost.
    Truncated,
}

impl EstimateMode {
    /// Parse the lowercase config spelling (`"exact"` or `"truncated"`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "truncated" => Some(Self::Truncated),
            _ => None,
        }
    }

    /// The lowercase config spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Truncated => "truncated",
        }
    }
}

/// Result of a successful `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopOutcome {
    /// The background loop observed the stop flag and exited within the
    /// grace period.
    Clean,
    /// The scheduler was not running; nothing to stop.
    NotRunning,
}
