//! Atomic scheduler state shared between the tick thread and observers.
//!
//! The tick thread is the only writer of the counters. Any thread may read
//! them through the scheduler's accessors without taking a lock. The stop
//! flag is the single cooperative cancellation signal the loop polls every
//! iteration.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use senryaku_types::SchedulerPhase;

/// Shared lifecycle and counter state.
#[derive(Debug)]
pub struct SchedulerState {
    phase: AtomicU8,
    stop_requested: AtomicBool,
    current_tick: AtomicU64,
    last_measured_tps: AtomicU64,
    cycle_index: AtomicU64,
    total_ticks: AtomicU64,
    dispatch_failures: AtomicU64,
}

impl SchedulerState {
    /// Fresh state in the [`SchedulerPhase::Idle`] phase.
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(SchedulerPhase::Idle.as_u8()),
            stop_requested: AtomicBool::new(false),
            current_tick: AtomicU64::new(0),
            last_measured_tps: AtomicU64::new(0),
            cycle_index: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Current lifecycle phase.
    pub fn phase(&self) -> SchedulerPhase {
        SchedulerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether the background loop is live and not stopping.
    pub fn is_running(&self) -> bool {
        self.phase() == SchedulerPhase::Running
    }

    pub(crate) fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Move from `from` to `to` if the phase is still `from`.
    pub(crate) fn transition(&self, from: SchedulerPhase, to: SchedulerPhase) -> bool {
        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ask the loop to exit after its current iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Ticks fired so far in the current cycle.
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }

    /// Ticks fired during the last completed cycle.
    pub fn last_measured_tps(&self) -> u64 {
        self.last_measured_tps.load(Ordering::Acquire)
    }

    /// Completed cycles since construction.
    pub fn cycle_index(&self) -> u64 {
        self.cycle_index.load(Ordering::Acquire)
    }

    /// Ticks fired since construction.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::Acquire)
    }

    /// Consumer failures isolated since construction.
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Acquire)
    }

    pub(crate) fn record_tick(&self, current_tick: u64) {
        self.current_tick.store(current_tick, Ordering::Release);
        self.total_ticks.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_cycle(&self, last_measured_tps: u64, cycle_index: u64) {
        self.last_measured_tps
            .store(last_measured_tps, Ordering::Release);
        self.current_tick.store(0, Ordering::Release);
        self.cycle_index.store(cycle_index, Ordering::Release);
    }

    pub(crate) fn record_failures(&self, count: u64) {
        if count > 0 {
            self.dispatch_failures.fetch_add(count, Ordering::AcqRel);
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        let state = SchedulerState::new();
        assert_eq!(state.phase(), SchedulerPhase::Idle);
        assert!(!state.is_running());
        assert!(!state.is_stop_requested());
        assert_eq!(state.cycle_index(), 0);
    }

    #[test]
    fn transition_requires_expected_phase() {
        let state = SchedulerState::new();
        assert!(state.transition(SchedulerPhase::Idle, SchedulerPhase::Running));
        assert!(state.is_running());
        assert!(!state.transition(SchedulerPhase::Idle, SchedulerPhase::Running));
        assert!(state.transition(SchedulerPhase::Running, SchedulerPhase::Stopping));
        assert!(!state.is_running());
    }

    #[test]
    fn stop_request_is_sticky() {
        let state = SchedulerState::new();
        state.request_stop();
        assert!(state.is_stop_requested());
        state.request_stop();
        assert!(state.is_stop_requested());
    }

    #[test]
    fn cycle_resets_current_tick_but_not_totals() {
        let state = SchedulerState::new();
        state.record_tick(1);
        state.record_tick(2);
        state.record_cycle(2, 1);
        assert_eq!(state.current_tick(), 0);
        assert_eq!(state.last_measured_tps(), 2);
        assert_eq!(state.total_ticks(), 2);
        assert_eq!(state.cycle_index(), 1);
    }

    #[test]
    fn failures_accumulate() {
        let state = SchedulerState::new();
        state.record_failures(0);
        state.record_failures(2);
        state.record_failures(1);
        assert_eq!(state.dispatch_failures(), 3);
    }
}
