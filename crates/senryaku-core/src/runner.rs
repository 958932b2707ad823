//! Background tick scheduler with start/stop lifecycle.
//!
//! [`TickScheduler`] owns a [`TickLoop`] and runs it on a dedicated thread
//! until asked to stop. The lifecycle is one-shot:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --> Stopped
//! ```
//!
//! Stopping is cooperative. `stop` raises a flag the loop checks between
//! iterations and waits up to the configured grace period. A loop stuck in
//! a consumer callback is detached rather than killed, and the timeout is
//! reported to the caller as an error.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use senryaku_types::{SchedulerPhase, StopOutcome, TickSnapshot};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigError, ConfigStore, SchedulerConfig};
use crate::events::{SubscriptionId, TickEvents};
use crate::input::{InputDispatcher, NullInput};
use crate::isolate::panic_message;
use crate::object::ObjectRegistry;
use crate::presentation::PresentationContext;
use crate::state::SchedulerState;
use crate::tick::TickLoop;

/// Name given to the background loop thread.
pub const THREAD_NAME: &str = "senryaku-tick";

/// How often `stop` checks whether the loop thread has exited.
const STOP_POLL: Duration = Duration::from_millis(1);

/// Errors returned by the scheduler lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The settings cannot drive a tick loop.
    #[error("invalid scheduler config: {source}")]
    InvalidConfig {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The scheduler has already been stopped and cannot be restarted.
    #[error("scheduler has been stopped and cannot be restarted")]
    Terminated,

    /// The loop did not exit within the grace period and was detached.
    #[error("tick loop did not exit within {grace_ms} ms and was detached")]
    ShutdownTimeout {
        /// The grace period that was exceeded.
        grace_ms: u64,
    },

    /// The operating system refused to spawn the loop thread.
    #[error("failed to spawn tick thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The loop thread panicked outside any isolated consumer.
    #[error("tick loop panicked: {message}")]
    LoopPanicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// Everything the scheduler ticks and reports to.
///
/// Registries are handed in by the application rather than looked up
/// globally, so tests can build isolated schedulers side by side.
pub struct Collaborators {
    /// Objects notified on every tick.
    pub registry: ObjectRegistry,
    /// Input dispatcher notified before any object.
    pub input: Box<dyn InputDispatcher>,
    /// Statistics sink written once per cycle.
    pub presentation: Arc<PresentationContext>,
}

impl Collaborators {
    /// Collaborators with no input handling.
    pub fn new(registry: ObjectRegistry, presentation: Arc<PresentationContext>) -> Self {
        Self {
            registry,
            input: Box::new(NullInput),
            presentation,
        }
    }

    /// Replace the input dispatcher.
    #[must_use]
    pub fn with_input(mut self, input: impl InputDispatcher + 'static) -> Self {
        self.input = Box::new(input);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("registry", &self.registry)
            .field("presentation", &self.presentation)
            .finish_non_exhaustive()
    }
}

/// Fixed-rate simulation heartbeat running on its own thread.
pub struct TickScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    registry: ObjectRegistry,
    presentation: Arc<PresentationContext>,
    events: Arc<TickEvents>,
    state: Arc<SchedulerState>,
    /// The loop before `start` moves it onto the thread.
    pending: Option<TickLoop>,
    handle: Option<JoinHandle<()>>,
    stats_bridge: Option<SubscriptionId>,
}

impl TickScheduler {
    /// Create a scheduler measuring time with a [`MonotonicClock`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if the settings fail
    /// validation, most notably a zero tick rate.
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Result<Self, SchedulerError> {
        Self::with_clock(config, collaborators, Arc::new(MonotonicClock::new()))
    }

    /// Create a scheduler from a configuration store.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if a stored value has the
    /// wrong type or the resolved settings fail validation.
    pub fn from_store(store: &ConfigStore, collaborators: Collaborators) -> Result<Self, SchedulerError> {
        let config = SchedulerConfig::from_store(store)?;
        Self::new(config, collaborators)
    }

    /// Create a scheduler measuring time with `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if the settings fail
    /// validation.
    pub fn with_clock(
        config: SchedulerConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let Collaborators {
            registry,
            input,
            presentation,
        } = collaborators;
        let events = Arc::new(TickEvents::new());
        let state = Arc::new(SchedulerState::new());

        let tick_loop = TickLoop::new(
            &config,
            Arc::clone(&clock),
            registry.clone(),
            input,
            Arc::clone(&events),
            Arc::clone(&state),
        )?;

        debug!(
            ticks_per_second = config.ticks_per_second,
            tick_interval_us = config.tick_interval().as_micros(),
            cycle_length_ms = config.cycle_length.as_millis(),
            "Tick scheduler created"
        );

        Ok(Self {
            config,
            clock,
            registry,
            presentation,
            events,
            state,
            pending: Some(tick_loop),
            handle: None,
            stats_bridge: None,
        })
    }

    /// Start the background loop.
    ///
    /// Returns `Ok(true)` when the loop was started and `Ok(false)` when it
    /// was already running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Terminated`] after [`stop`](Self::stop), or
    /// [`SchedulerError::Spawn`] if the thread could not be created.
    pub fn start(&mut self) -> Result<bool, SchedulerError> {
        match self.state.phase() {
            SchedulerPhase::Running | SchedulerPhase::Stopping => return Ok(false),
            SchedulerPhase::Stopped => return Err(SchedulerError::Terminated),
            SchedulerPhase::Idle => {}
        }
        let Some(mut tick_loop) = self.pending.take() else {
            return Err(SchedulerError::Terminated);
        };

        self.clock.restart();
        self.stats_bridge = Some(self.register_stats_bridge());
        self.state.set_phase(SchedulerPhase::Running);

        let state = Arc::clone(&self.state);
        let idle_sleep = self.config.idle_sleep;
        let spawned = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || run_loop(&mut tick_loop, &state, idle_sleep));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!(
                    ticks_per_second = self.config.ticks_per_second,
                    tick_interval_us = self.config.tick_interval().as_micros(),
                    objects = self.registry.len(),
                    "Tick scheduler started"
                );
                Ok(true)
            }
            Err(source) => {
                self.state.set_phase(SchedulerPhase::Stopped);
                self.remove_stats_bridge();
                error!(error = %source, "Failed to spawn tick thread");
                Err(SchedulerError::Spawn { source })
            }
        }
    }

    /// Ask the loop to exit and wait up to the shutdown grace period.
    ///
    /// The scheduler ends in [`SchedulerPhase::Stopped`] whether or not the
    /// thread exited in time. Stopping a scheduler that never started is a
    /// no-op that leaves it startable.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutdownTimeout`] if the loop thread was
    /// still busy when the grace period ran out, or
    /// [`SchedulerError::LoopPanicked`] if it died from a panic.
    pub fn stop(&mut self) -> Result<StopOutcome, SchedulerError> {
        if !self
            .state
            .transition(SchedulerPhase::Running, SchedulerPhase::Stopping)
        {
            return Ok(StopOutcome::NotRunning);
        }
        self.state.request_stop();

        let result = match self.handle.take() {
            Some(handle) => self.await_exit(handle),
            None => Ok(StopOutcome::Clean),
        };

        self.remove_stats_bridge();
        self.state.set_phase(SchedulerPhase::Stopped);
        result
    }

    fn await_exit(&self, handle: JoinHandle<()>) -> Result<StopOutcome, SchedulerError> {
        let grace = self.config.shutdown_grace;
        let waiting_since = Instant::now();
        while !handle.is_finished() && waiting_since.elapsed() < grace {
            thread::sleep(STOP_POLL);
        }

        if !handle.is_finished() {
            let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
            warn!(grace_ms, "Tick loop did not exit in time, detaching thread");
            // Dropping the handle detaches the thread; it exits on its own
            // once the blocking consumer returns.
            drop(handle);
            return Err(SchedulerError::ShutdownTimeout { grace_ms });
        }

        match handle.join() {
            Ok(()) => {
                info!(
                    cycles = self.state.cycle_index(),
                    total_ticks = self.state.total_ticks(),
                    dispatch_failures = self.state.dispatch_failures(),
                    "Tick scheduler stopped"
                );
                Ok(StopOutcome::Clean)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Tick loop panicked");
                Err(SchedulerError::LoopPanicked { message })
            }
        }
    }

    /// Publish the measured rate and live object count once per cycle.
    fn register_stats_bridge(&self) -> SubscriptionId {
        let presentation = Arc::clone(&self.presentation);
        let registry = self.registry.clone();
        self.events.cycle.subscribe(move |snapshot| {
            let live = u64::try_from(registry.len()).unwrap_or(u64::MAX);
            presentation.publish(snapshot.tick_count, live, snapshot.cycle_index);
        })
    }

    fn remove_stats_bridge(&mut self) {
        if let Some(id) = self.stats_bridge.take() {
            self.events.cycle.unsubscribe(id);
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Raw clock ticks (nanoseconds) since the current cycle began.
    pub fn current_cycle_elapsed(&self) -> u64 {
        self.clock.elapsed_ticks()
    }

    /// Ticks fired so far in the current cycle.
    pub fn current_tick(&self) -> u64 {
        self.state.current_tick()
    }

    /// Ticks fired during the last completed cycle.
    pub fn last_measured_tps(&self) -> u64 {
        self.state.last_measured_tps()
    }

    /// Completed cycles.
    pub fn cycle_index(&self) -> u64 {
        self.state.cycle_index()
    }

    /// Ticks fired since start.
    pub fn total_ticks(&self) -> u64 {
        self.state.total_ticks()
    }

    /// Consumer failures isolated since start.
    pub fn dispatch_failures(&self) -> u64 {
        self.state.dispatch_failures()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.state.phase()
    }

    /// Whether the loop is running and no stop has been requested.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Ideal duration between ticks.
    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval()
    }

    /// Shared handle to the atomic state, readable after the scheduler is
    /// dropped.
    pub fn state(&self) -> Arc<SchedulerState> {
        Arc::clone(&self.state)
    }

    /// Subscribe to every tick.
    pub fn on_tick<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TickSnapshot) + Send + Sync + 'static,
    {
        self.events.tick.subscribe(callback)
    }

    /// Subscribe to every cycle boundary.
    pub fn on_cycle<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TickSnapshot) + Send + Sync + 'static,
    {
        self.events.cycle.subscribe(callback)
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("config", &self.config)
            .field("phase", &self.state.phase())
            .field("cycle_index", &self.state.cycle_index())
            .field("objects", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if self.state.is_running() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Tick scheduler did not stop cleanly on drop");
            }
        }
    }
}

fn run_loop(tick_loop: &mut TickLoop, state: &SchedulerState, idle_sleep: Duration) {
    debug!("Tick loop entered");
    while !state.is_stop_requested() {
        let report = tick_loop.step();
        if report.is_idle() {
            idle(idle_sleep, report.until_next_tick);
        }
    }
    debug!(
        cycle = tick_loop.cycle_index(),
        tick = tick_loop.current_tick(),
        "Tick loop exited"
    );
}

/// Back off between idle iterations without overshooting the next tick.
fn idle(idle_sleep: Duration, until_next_tick: Duration) {
    if idle_sleep.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(idle_sleep.min(until_next_tick));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn collaborators() -> Collaborators {
        Collaborators::new(ObjectRegistry::new(), Arc::new(PresentationContext::new()))
    }

    fn manual_scheduler(clock: &ManualClock) -> TickScheduler {
        TickScheduler::with_clock(
            SchedulerConfig::with_rate(80),
            collaborators(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn zero_rate_is_invalid_config() {
        let result = TickScheduler::new(SchedulerConfig::with_rate(0), collaborators());
        assert!(matches!(result, Err(SchedulerError::InvalidConfig { .. })));
    }

    #[test]
    fn zero_length_interval_is_invalid_config() {
        let result = TickScheduler::new(SchedulerConfig::with_rate(2_000_000_000), collaborators());
        assert!(matches!(result, Err(SchedulerError::InvalidConfig { .. })));
    }

    #[test]
    fn empty_store_is_invalid_config() {
        let result = TickScheduler::from_store(&ConfigStore::new(), collaborators());
        assert!(matches!(result, Err(SchedulerError::InvalidConfig { .. })));
    }

    #[test]
    fn store_rate_drives_interval() {
        let store = ConfigStore::new().with(senryaku_types::SettingKind::TicksPerSecond, 50_u32);
        let scheduler = TickScheduler::from_store(&store, collaborators()).unwrap();
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn stop_before_start_leaves_scheduler_startable() {
        let clock = ManualClock::new();
        let mut scheduler = manual_scheduler(&clock);
        assert_eq!(scheduler.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert!(scheduler.start().unwrap());
        assert_eq!(scheduler.stop().unwrap(), StopOutcome::Clean);
    }

    #[test]
    fn lifecycle_is_one_shot() {
        let clock = ManualClock::new();
        let mut scheduler = manual_scheduler(&clock);
        assert!(scheduler.start().unwrap());
        assert!(!scheduler.start().unwrap());
        assert!(scheduler.is_running());

        assert_eq!(scheduler.stop().unwrap(), StopOutcome::Clean);
        assert_eq!(scheduler.phase(), SchedulerPhase::Stopped);
        assert_eq!(scheduler.stop().unwrap(), StopOutcome::NotRunning);
        assert!(matches!(scheduler.start(), Err(SchedulerError::Terminated)));
    }

    #[test]
    fn cycle_elapsed_reads_the_clock() {
        let clock = ManualClock::new();
        let scheduler = manual_scheduler(&clock);
        clock.advance(Duration::from_micros(3));
        assert_eq!(scheduler.current_cycle_elapsed(), 3_000);
    }

    #[test]
    fn manual_clock_loop_publishes_stats_after_cycle() {
        let clock = ManualClock::new();
        let registry = ObjectRegistry::new();
        let presentation = Arc::new(PresentationContext::new());
        let mut scheduler = TickScheduler::with_clock(
            SchedulerConfig::with_rate(80),
            Collaborators::new(registry, Arc::clone(&presentation)),
            Arc::new(clock.clone()),
        )
        .unwrap();
        scheduler.start().unwrap();

        // One jump past the cycle length: one tick, one cycle.
        clock.advance(Duration::from_millis(1100));
        let waiting_since = Instant::now();
        while scheduler.cycle_index() == 0 && waiting_since.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.stop().unwrap(), StopOutcome::Clean);

        assert_eq!(scheduler.cycle_index(), 1);
        assert_eq!(scheduler.last_measured_tps(), 1);
        let stats = presentation.snapshot();
        assert_eq!(stats.ticks_per_second, 1);
        assert_eq!(stats.cycle_index, 0);
        assert!(stats.updated_at.is_some());
    }

    #[test]
    fn drop_stops_running_loop() {
        let clock = ManualClock::new();
        let mut scheduler = manual_scheduler(&clock);
        scheduler.start().unwrap();
        let state = scheduler.state();
        drop(scheduler);
        assert_eq!(state.phase(), SchedulerPhase::Stopped);
        assert!(state.is_stop_requested());
    }
}
