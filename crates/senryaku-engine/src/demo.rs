//! Demo collaborators registered by the engine.
//!
//! Drifters wander a bounded square and bounce off its edges. Faulty
//! objects fail on a fixed schedule so the isolation path shows up in the
//! logs and the failure counter.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use senryaku_core::config::DemoConfig;
use senryaku_core::input::InputError;
use senryaku_core::object::{ObjectError, ObjectRegistry, SimObject};
use senryaku_types::{ObjectId, TickSnapshot};
use tracing::{info, trace};

/// Lowest coordinate a drifter may occupy.
const MIN_COORD: i64 = -1_000;

/// Highest coordinate a drifter may occupy.
const MAX_COORD: i64 = 1_000;

/// Per-tick speed range along one axis.
const MIN_SPEED: i64 = -5;
const MAX_SPEED: i64 = 5;

// -----------------------------------------------------------------------
// Drifter
// -----------------------------------------------------------------------

/// An object moving at constant velocity inside a bounded square.
#[derive(Debug)]
pub struct Drifter {
    id: ObjectId,
    name: String,
    position: (i64, i64),
    velocity: (i64, i64),
}

impl Drifter {
    /// Create a drifter at a random position with a random velocity.
    pub fn random(index: u32, rng: &mut impl Rng) -> Self {
        Self {
            id: ObjectId::new(),
            name: format!("drifter-{index}"),
            position: (
                rng.random_range(MIN_COORD..=MAX_COORD),
                rng.random_range(MIN_COORD..=MAX_COORD),
            ),
            velocity: (
                rng.random_range(MIN_SPEED..=MAX_SPEED),
                rng.random_range(MIN_SPEED..=MAX_SPEED),
            ),
        }
    }

    /// Current position.
    pub const fn position(&self) -> (i64, i64) {
        self.position
    }
}

/// Move one axis, reflecting the velocity instead of leaving the bounds.
fn advance_axis(position: i64, velocity: i64) -> (i64, i64) {
    let next = position.saturating_add(velocity);
    if (MIN_COORD..=MAX_COORD).contains(&next) {
        (next, velocity)
    } else {
        (position, velocity.saturating_neg())
    }
}

impl SimObject for Drifter {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn on_tick(&mut self, _snapshot: &TickSnapshot) -> Result<(), ObjectError> {
        let (x, vx) = advance_axis(self.position.0, self.velocity.0);
        let (y, vy) = advance_axis(self.position.1, self.velocity.1);
        self.position = (x, y);
        self.velocity = (vx, vy);
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Faulty object
// -----------------------------------------------------------------------

/// An object that fails every `every`th tick it receives.
#[derive(Debug)]
pub struct FaultyObject {
    id: ObjectId,
    name: String,
    every: u64,
    received: u64,
}

impl FaultyObject {
    /// Create an object failing every `every` ticks. Zero never fails.
    pub fn new(index: u32, every: u64) -> Self {
        Self {
            id: ObjectId::new(),
            name: format!("faulty-{index}"),
            every,
            received: 0,
        }
    }
}

impl SimObject for FaultyObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn on_tick(&mut self, _snapshot: &TickSnapshot) -> Result<(), ObjectError> {
        self.received = self.received.saturating_add(1);
        if self.received.checked_rem(self.every) == Some(0) {
            return Err(ObjectError::TickFailed {
                message: format!("scripted fault after {} ticks", self.received),
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Setup
// -----------------------------------------------------------------------

/// Register the configured demo objects. Returns how many were added.
pub fn populate(registry: &ObjectRegistry, config: &DemoConfig) -> u32 {
    let mut rng = SmallRng::seed_from_u64(config.seed);
    for index in 0..config.object_count {
        registry.register(Drifter::random(index, &mut rng));
    }
    for index in 0..config.faulty_objects {
        registry.register(FaultyObject::new(index, config.fault_every_n_ticks));
    }
    let added = config.object_count.saturating_add(config.faulty_objects);
    info!(
        drifters = config.object_count,
        faulty = config.faulty_objects,
        fault_every_n_ticks = config.fault_every_n_ticks,
        seed = config.seed,
        "Demo objects registered"
    );
    added
}

/// Input dispatcher that only tracks how far behind the loop has been.
pub fn tick_logger() -> impl FnMut(u64) -> Result<(), InputError> + Send {
    let mut accumulated: u64 = 0;
    move |ticks_elapsed| {
        accumulated = accumulated.saturating_add(ticks_elapsed);
        trace!(ticks_elapsed, accumulated, "Input poll");
        Ok(())
    }
}
