//! Per-tick and per-cycle notification channels.
//!
//! Subscribers are plain callbacks run synchronously on the tick thread.
//! They are informational: a slow subscriber slows the tick rate, and a
//! panicking one is logged and skipped without affecting the others.
//!
//! Emission works on a copy of the subscriber list, so a callback may
//! subscribe or unsubscribe without deadlocking the channel. Changes take
//! effect from the next emission.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use senryaku_types::TickSnapshot;
use tracing::warn;

use crate::isolate::isolate;

/// A registered callback.
pub type Subscriber = Arc<dyn Fn(&TickSnapshot) + Send + Sync>;

/// Handle returned by [`EventChannel::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// A named list of subscribers that all receive the same snapshot.
pub struct EventChannel {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl EventChannel {
    /// Create an empty channel. `name` appears in failure logs.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register `callback`. Subscribers run in registration order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TickSnapshot) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        subs.len() != before
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the channel has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `snapshot` to every subscriber.
    ///
    /// Returns the number of subscribers that panicked.
    pub fn emit(&self, snapshot: &TickSnapshot) -> u64 {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sub)| Arc::clone(sub))
            .collect();

        let mut failures: u64 = 0;
        for subscriber in subscribers {
            if let Err(message) = isolate(|| (*subscriber)(snapshot)) {
                warn!(
                    channel = self.name,
                    cycle = snapshot.cycle_index,
                    tick = snapshot.tick_count,
                    panic = %message,
                    "event subscriber panicked"
                );
                failures = failures.saturating_add(1);
            }
        }
        failures
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}

/// The two channels a scheduler publishes on.
#[derive(Debug)]
pub struct TickEvents {
    /// Fired after every tick has been dispatched to consumers.
    pub tick: EventChannel,
    /// Fired once per cycle, before the cycle counters reset.
    pub cycle: EventChannel,
}

impl TickEvents {
    /// Create both channels with no subscribers.
    pub const fn new() -> Self {
        Self {
            tick: EventChannel::new("tick"),
            cycle: EventChannel::new("cycle"),
        }
    }
}

impl Default for TickEvents {
    fn default() -> Self {
        Self::new()
    }
}
