//! One iteration of the fixed-tick loop.
//!
//! Each call to [`TickLoop::step`] samples the cycle clock once and makes
//! two independent decisions:
//!
//! 1. **Tick** -- if at least one tick interval has passed since the last
//!    tick, notify the input dispatcher, then every registered object in
//!    registration order, then tick-event subscribers.
//!
//! 2. **Cycle** -- if the cycle clock has run past the cycle length, fire
//!    the cycle event, record the tick count as the measured rate, reset the
//!    per-cycle counters, and restart the clock.
//!
//! Both can happen in the same step; the tick is processed first, so the
//! measured rate includes it. A step that is far behind fires at most one
//! tick: the loop never replays missed ticks, it reports the shortfall
//! through `ticks_elapsed` instead.
//!
//! `TickLoop` owns no thread. [`runner`](crate::runner) drives it in the
//! background; tests drive it directly against a [`ManualClock`].
//!
//! [`ManualClock`]: crate::clock::ManualClock

use std::sync::Arc;
use std::time::Duration;

use senryaku_types::{EstimateMode, TickSnapshot};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::{ConfigError, SchedulerConfig};
use crate::events::TickEvents;
use crate::input::InputDispatcher;
use crate::isolate::isolate;
use crate::object::{self, ObjectRegistry};
use crate::state::SchedulerState;

/// What a single [`TickLoop::step`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// A tick was dispatched.
    pub ticked: bool,
    /// A cycle boundary was crossed and the clock restarted.
    pub cycled: bool,
    /// Time remaining until the next tick is due, measured after the step.
    pub until_next_tick: Duration,
}

impl StepReport {
    /// Whether the step did any work.
    pub const fn is_idle(&self) -> bool {
        !self.ticked && !self.cycled
    }
}

/// Tick and cycle detection over an injected clock.
pub struct TickLoop {
    tick_interval: Duration,
    cycle_length: Duration,
    estimate_mode: EstimateMode,
    clock: Arc<dyn Clock>,
    registry: ObjectRegistry,
    input: Box<dyn InputDispatcher>,
    events: Arc<TickEvents>,
    state: Arc<SchedulerState>,
    current_tick: u64,
    last_measured_tps: u64,
    cycle_index: u64,
    /// Cycle-clock offset of the most recent tick.
    last_tick_at: Duration,
}

impl TickLoop {
    /// Build a loop from validated settings.
    ///
    /// The clock is not restarted here; callers restart it when the loop is
    /// about to run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails
    /// [`SchedulerConfig::validate`].
    pub fn new(
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
        registry: ObjectRegistry,
        input: Box<dyn InputDispatcher>,
        events: Arc<TickEvents>,
        state: Arc<SchedulerState>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tick_interval: config.tick_interval(),
            cycle_length: config.cycle_length,
            estimate_mode: config.estimate_mode,
            clock,
            registry,
            input,
            events,
            state,
            current_tick: 0,
            last_measured_tps: 0,
            cycle_index: 0,
            last_tick_at: Duration::ZERO,
        })
    }

    /// Run one iteration: maybe tick, maybe close the cycle.
    ///
    /// A tick fires once the time since the previous tick reaches the tick
    /// interval; landing exactly on the boundary counts. The cycle closes
    /// once the cycle clock passes the cycle length, after any tick due in
    /// the same step. Both snapshots carry the same ticks-elapsed estimate.
    pub fn step(&mut self) -> StepReport {
        let elapsed = self.clock.elapsed();
        let delta = elapsed.saturating_sub(self.last_tick_at);
        let ticks_elapsed = estimate_ticks(delta, self.tick_interval, self.estimate_mode);
        let mut report = StepReport::default();

        if delta >= self.tick_interval {
            self.fire_tick(elapsed, ticks_elapsed);
            report.ticked = true;
        }

        if elapsed > self.cycle_length {
            self.close_cycle(elapsed, ticks_elapsed);
            report.cycled = true;
        }

        report.until_next_tick = self.until_next_tick();
        report
    }

    fn fire_tick(&mut self, elapsed: Duration, ticks_elapsed: u64) {
        let snapshot = self.snapshot(elapsed, ticks_elapsed);
        let mut failures: u64 = 0;

        match isolate(|| self.input.dispatch(ticks_elapsed)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    cycle = snapshot.cycle_index,
                    tick = snapshot.tick_count,
                    error = %e,
                    "input dispatch failed"
                );
                failures = failures.saturating_add(1);
            }
            Err(message) => {
                warn!(
                    cycle = snapshot.cycle_index,
                    tick = snapshot.tick_count,
                    panic = %message,
                    "input dispatcher panicked"
                );
                failures = failures.saturating_add(1);
            }
        }

        let objects = self.registry.snapshot();
        let report = object::dispatch_tick(&objects, &snapshot);
        failures = failures.saturating_add(report.failed);

        self.current_tick = self.current_tick.saturating_add(1);
        self.last_tick_at = elapsed;
        self.state.record_tick(self.current_tick);

        failures = failures.saturating_add(self.events.tick.emit(&snapshot));
        self.state.record_failures(failures);

        trace!(
            cycle = snapshot.cycle_index,
            tick = snapshot.tick_count,
            ticks_elapsed,
            delivered = report.delivered,
            failed = failures,
            "tick"
        );
    }

    fn close_cycle(&mut self, elapsed: Duration, ticks_elapsed: u64) {
        let snapshot = self.snapshot(elapsed, ticks_elapsed);
        let failures = self.events.cycle.emit(&snapshot);
        self.state.record_failures(failures);

        self.last_measured_tps = self.current_tick;
        self.current_tick = 0;
        self.last_tick_at = Duration::ZERO;
        self.cycle_index = self.cycle_index.saturating_add(1);
        self.state
            .record_cycle(self.last_measured_tps, self.cycle_index);
        self.clock.restart();

        debug!(
            cycle = snapshot.cycle_index,
            elapsed_ms = snapshot.elapsed_ms,
            ticks = self.last_measured_tps,
            "cycle closed"
        );
    }

    fn snapshot(&self, elapsed: Duration, ticks_elapsed: u64) -> TickSnapshot {
        TickSnapshot {
            cycle_index: self.cycle_index,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            tick_count: self.current_tick,
            ticks_elapsed,
        }
    }

    /// Time until the next tick is due, zero if one is already due.
    pub fn until_next_tick(&self) -> Duration {
        let since_last = self.clock.elapsed().saturating_sub(self.last_tick_at);
        self.tick_interval.saturating_sub(since_last)
    }

    /// Ideal duration between ticks.
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Ticks fired since the last cycle boundary.
    pub const fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Ticks fired during the last completed cycle.
    pub const fn last_measured_tps(&self) -> u64 {
        self.last_measured_tps
    }

    /// Completed cycles.
    pub const fn cycle_index(&self) -> u64 {
        self.cycle_index
    }

    /// The clock this loop measures against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("tick_interval", &self.tick_interval)
            .field("cycle_length", &self.cycle_length)
            .field("estimate_mode", &self.estimate_mode)
            .field("current_tick", &self.current_tick)
            .field("cycle_index", &self.cycle_index)
            .finish_non_exhaustive()
    }
}

/// Coarse count of tick intervals covered by `delta`.
///
/// A zero interval yields zero in either mode.
pub fn estimate_ticks(delta: Duration, interval: Duration, mode: EstimateMode) -> u64 {
    match mode {
        EstimateMode::Exact => delta
            .as_nanos()
            .checked_div(interval.as_nanos())
            .map_or(0, |n| u64::try_from(n).unwrap_or(u64::MAX)),
        EstimateMode::Truncated => u64::from(delta.subsec_millis())
            .checked_div(u64::from(interval.subsec_millis()))
            .unwrap_or(0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use senryaku_types::ObjectId;

    use super::*;
    use crate::clock::ManualClock;
    use crate::input::{InputError, NullInput};
    use crate::object::{ObjectError, SimObject};

    const STEP_80: Duration = Duration::from_micros(12_500);

    struct Counter {
        id: ObjectId,
        seen: Vec<TickSnapshot>,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                id: ObjectId::new(),
                seen: Vec::new(),
            }
        }
    }

    impl SimObject for Counter {
        fn id(&self) -> ObjectId {
            self.id
        }
        fn name(&self) -> &str {
            "counter"
        }
        fn on_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), ObjectError> {
            self.seen.push(*snapshot);
            Ok(())
        }
    }

    struct Broken {
        id: ObjectId,
        panics: bool,
    }

    impl SimObject for Broken {
        fn id(&self) -> ObjectId {
            self.id
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn on_tick(&mut self, _snapshot: &TickSnapshot) -> Result<(), ObjectError> {
            if self.panics {
                panic!("broken object");
            }
            Err(ObjectError::TickFailed {
                message: "broken object".to_owned(),
            })
        }
    }

    struct Harness {
        clock: ManualClock,
        registry: ObjectRegistry,
        events: Arc<TickEvents>,
        state: Arc<SchedulerState>,
        tick_loop: TickLoop,
    }

    fn harness_with(config: &SchedulerConfig, input: Box<dyn InputDispatcher>) -> Harness {
        let clock = ManualClock::new();
        let registry = ObjectRegistry::new();
        let events = Arc::new(TickEvents::new());
        let state = Arc::new(SchedulerState::new());
        let tick_loop = TickLoop::new(
            config,
            Arc::new(clock.clone()),
            registry.clone(),
            input,
            Arc::clone(&events),
            Arc::clone(&state),
        )
        .unwrap();
        Harness {
            clock,
            registry,
            events,
            state,
            tick_loop,
        }
    }

    fn harness(tps: u32) -> Harness {
        harness_with(&SchedulerConfig::with_rate(tps), Box::new(NullInput))
    }

    impl Harness {
        fn advance_and_step(&mut self, by: Duration) -> StepReport {
            self.clock.advance(by);
            self.tick_loop.step()
        }
    }

    #[test]
    fn eighty_tps_interval_is_twelve_and_a_half_ms() {
        let h = harness(80);
        assert_eq!(h.tick_loop.tick_interval(), STEP_80);
    }

    #[test]
    fn nothing_fires_before_first_interval() {
        let mut h = harness(80);
        let report = h.tick_loop.step();
        assert!(report.is_idle());
        assert_eq!(report.until_next_tick, STEP_80);

        let report = h.advance_and_step(Duration::from_millis(12));
        assert!(report.is_idle());
        assert_eq!(report.until_next_tick, Duration::from_micros(500));
    }

    #[test]
    fn hundred_ms_at_eighty_tps_fires_eight_ticks() {
        let mut h = harness(80);
        for _ in 0..8 {
            assert!(h.advance_and_step(STEP_80).ticked);
        }
        assert_eq!(h.clock.now(), Duration::from_millis(100));
        assert_eq!(h.tick_loop.current_tick(), 8);
        assert_eq!(h.state.current_tick(), 8);
        assert_eq!(h.state.total_ticks(), 8);
    }

    #[test]
    fn cycle_closes_after_one_second_and_resets_counters() {
        let mut h = harness(80);
        for _ in 0..80 {
            let report = h.advance_and_step(STEP_80);
            assert!(report.ticked);
            assert!(!report.cycled);
        }
        // Exactly 1000 ms is not past the cycle length.
        assert_eq!(h.tick_loop.current_tick(), 80);
        assert_eq!(h.tick_loop.cycle_index(), 0);

        let report = h.advance_and_step(STEP_80);
        assert!(report.ticked);
        assert!(report.cycled);
        assert_eq!(h.tick_loop.last_measured_tps(), 81);
        assert_eq!(h.tick_loop.current_tick(), 0);
        assert_eq!(h.tick_loop.cycle_index(), 1);
        assert_eq!(h.state.last_measured_tps(), 81);
        assert_eq!(h.state.current_tick(), 0);
        assert_eq!(h.state.total_ticks(), 81);
        assert_eq!(h.tick_loop.clock().elapsed(), Duration::ZERO);
    }

    #[test]
    fn cycle_index_increases_by_one_per_boundary() {
        let mut h = harness(80);
        for expected in 1..=5 {
            let report = h.advance_and_step(Duration::from_millis(1001));
            assert!(report.cycled);
            assert_eq!(h.tick_loop.cycle_index(), expected);
        }
    }

    #[test]
    fn cycle_fires_without_a_tick_at_low_rate() {
        let config = SchedulerConfig {
            cycle_length: Duration::from_millis(1500),
            ..SchedulerConfig::with_rate(1)
        };
        let mut h = harness_with(&config, Box::new(NullInput));
        assert!(h.advance_and_step(Duration::from_millis(1000)).ticked);

        let report = h.advance_and_step(Duration::from_millis(600));
        assert!(!report.ticked);
        assert!(report.cycled);
        assert_eq!(h.tick_loop.last_measured_tps(), 1);
    }

    #[test]
    fn late_step_fires_one_tick_and_reports_shortfall() {
        let mut h = harness(80);
        let (_, counter) = h.registry.register(Counter::new());
        let report = h.advance_and_step(Duration::from_millis(50));
        assert!(report.ticked);
        assert_eq!(h.tick_loop.current_tick(), 1);

        let seen = &counter.lock().unwrap().seen;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].ticks_elapsed, 4);
    }

    #[test]
    fn first_tick_snapshot_counts_from_zero() {
        let mut h = harness(80);
        let (_, counter) = h.registry.register(Counter::new());
        h.advance_and_step(STEP_80);
        h.advance_and_step(STEP_80);

        let seen = &counter.lock().unwrap().seen;
        assert_eq!(seen[0].tick_count, 0);
        assert_eq!(seen[1].tick_count, 1);
        assert_eq!(seen[1].elapsed_ms, 25);
        assert_eq!(seen[1].cycle_index, 0);
    }

    #[test]
    fn failing_objects_do_not_block_others() {
        let mut h = harness(80);
        h.registry.register(Broken {
            id: ObjectId::new(),
            panics: false,
        });
        h.registry.register(Broken {
            id: ObjectId::new(),
            panics: true,
        });
        let (_, counter) = h.registry.register(Counter::new());

        assert!(h.advance_and_step(STEP_80).ticked);
        assert_eq!(counter.lock().unwrap().seen.len(), 1);
        assert_eq!(h.state.dispatch_failures(), 2);
    }

    #[test]
    fn input_runs_before_objects_and_failures_are_isolated() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let input_order = Arc::clone(&order);
        let input = move |n: u64| -> Result<(), InputError> {
            input_order.lock().unwrap().push(format!("input:{n}"));
            Err(InputError::Handler {
                message: "unbound key".to_owned(),
            })
        };
        let mut h = harness_with(&SchedulerConfig::with_rate(80), Box::new(input));

        let object_order = Arc::clone(&order);
        h.events.tick.subscribe(move |s| {
            object_order
                .lock()
                .unwrap()
                .push(format!("event:{}", s.tick_count));
        });

        h.advance_and_step(STEP_80);
        assert_eq!(*order.lock().unwrap(), vec!["input:1", "event:0"]);
        assert_eq!(h.state.dispatch_failures(), 1);
    }

    #[test]
    fn cycle_event_carries_pre_reset_count() {
        let mut h = harness(80);
        let observed = Arc::new(AtomicU64::new(u64::MAX));
        let sink = Arc::clone(&observed);
        h.events.cycle.subscribe(move |s| {
            sink.store(s.tick_count, Ordering::Relaxed);
        });

        for _ in 0..10 {
            h.advance_and_step(STEP_80);
        }
        h.advance_and_step(Duration::from_millis(1000));
        assert_eq!(observed.load(Ordering::Relaxed), 11);
        assert_eq!(h.tick_loop.last_measured_tps(), 11);
    }

    #[test]
    fn tick_and_cycle_in_one_step_share_ticks_elapsed() {
        let mut h = harness(80);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tick_sink = Arc::clone(&seen);
        h.events.tick.subscribe(move |s| {
            tick_sink.lock().unwrap().push(("tick", s.ticks_elapsed));
        });
        let cycle_sink = Arc::clone(&seen);
        h.events.cycle.subscribe(move |s| {
            cycle_sink.lock().unwrap().push(("cycle", s.ticks_elapsed));
        });

        let report = h.advance_and_step(Duration::from_millis(1100));
        assert!(report.ticked && report.cycled);
        assert_eq!(*seen.lock().unwrap(), vec![("tick", 88), ("cycle", 88)]);
    }

    #[test]
    fn boundary_delta_fires_a_tick() {
        let mut h = harness(80);
        let report = h.advance_and_step(STEP_80);
        assert!(report.ticked);
        assert_eq!(h.tick_loop.current_tick(), 1);
    }

    #[test]
    fn objects_added_between_ticks_join_next_tick() {
        let mut h = harness(80);
        h.advance_and_step(STEP_80);
        let (_, counter) = h.registry.register(Counter::new());
        h.advance_and_step(STEP_80);
        assert_eq!(counter.lock().unwrap().seen.len(), 1);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let result = TickLoop::new(
            &SchedulerConfig::with_rate(0),
            Arc::new(ManualClock::new()),
            ObjectRegistry::new(),
            Box::new(NullInput),
            Arc::new(TickEvents::new()),
            Arc::new(SchedulerState::new()),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn exact_estimate_counts_whole_intervals() {
        let estimate = estimate_ticks(Duration::from_millis(2500), STEP_80, EstimateMode::Exact);
        assert_eq!(estimate, 200);
        assert_eq!(
            estimate_ticks(Duration::from_millis(12), STEP_80, EstimateMode::Exact),
            0
        );
    }

    #[test]
    fn truncated_estimate_drops_whole_seconds() {
        let estimate =
            estimate_ticks(Duration::from_millis(2500), STEP_80, EstimateMode::Truncated);
        assert_eq!(estimate, 41);
    }

    #[test]
    fn zero_interval_estimates_zero() {
        let delta = Duration::from_millis(30);
        assert_eq!(estimate_ticks(delta, Duration::ZERO, EstimateMode::Exact), 0);
        assert_eq!(
            estimate_ticks(delta, Duration::from_micros(500), EstimateMode::Truncated),
            0
        );
    }
}
