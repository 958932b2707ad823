//! Simulation objects and the shared registry the scheduler ticks.
//!
//! The registry is owned by the application, not by the scheduler: objects
//! are added and removed from any thread while the loop is running. Each
//! tick works on a snapshot of the registry taken before dispatch begins,
//! so an object added or removed mid-tick is included or excluded for the
//! whole tick, never half of it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use senryaku_types::{ObjectId, TickSnapshot};
use tracing::warn;

use crate::isolate::isolate;

/// Errors reported by a simulation object's tick handler.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The object could not advance its state this tick.
    #[error("tick handler failed: {message}")]
    TickFailed {
        /// Description of the failure.
        message: String,
    },
}

/// A participant in the fixed-tick simulation.
pub trait SimObject: Send {
    /// Stable identity used for registration and removal.
    fn id(&self) -> ObjectId;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Advance one tick.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError`] if the object cannot advance. The scheduler
    /// logs the failure and still ticks every other object.
    fn on_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), ObjectError>;
}

/// An object shared between the registry and its owner.
pub type SharedObject = Arc<Mutex<dyn SimObject>>;

/// Outcome of delivering one tick to a set of objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Objects whose handler returned `Ok`.
    pub delivered: u64,
    /// Objects whose handler returned an error or panicked.
    pub failed: u64,
}

/// Shared, ordered collection of simulation objects.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    objects: Arc<RwLock<Vec<(ObjectId, SharedObject)>>>,
}

impl ObjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object, returning its ID and a handle the caller can keep
    /// to inspect it later.
    pub fn register<O>(&self, object: O) -> (ObjectId, Arc<Mutex<O>>)
    where
        O: SimObject + 'static,
    {
        let id = object.id();
        let handle = Arc::new(Mutex::new(object));
        let shared: SharedObject = Arc::clone(&handle) as SharedObject;
        self.write().push((id, shared));
        (id, handle)
    }

    /// Remove the object with `id`. Returns `false` if it was not present.
    pub fn remove(&self, id: ObjectId) -> bool {
        let mut objects = self.write();
        let before = objects.len();
        objects.retain(|(obj_id, _)| *obj_id != id);
        objects.len() != before
    }

    /// Whether an object with `id` is registered.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.read().iter().any(|(obj_id, _)| *obj_id == id)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current collection, in registration order.
    pub fn snapshot(&self) -> Vec<SharedObject> {
        self.read().iter().map(|(_, obj)| Arc::clone(obj)).collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(ObjectId, SharedObject)>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(ObjectId, SharedObject)>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Deliver `snapshot` to each object in order.
///
/// A handler error or panic is logged and counted; the remaining objects
/// still receive the tick. An object whose lock was poisoned by an earlier
/// panic keeps receiving ticks.
pub(crate) fn dispatch_tick(objects: &[SharedObject], snapshot: &TickSnapshot) -> DispatchReport {
    let mut report = DispatchReport::default();
    for object in objects {
        let mut guard = object.lock().unwrap_or_else(PoisonError::into_inner);
        match isolate(|| guard.on_tick(snapshot)) {
            Ok(Ok(())) => report.delivered = report.delivered.saturating_add(1),
            Ok(Err(e)) => {
                warn!(
                    object = guard.name(),
                    cycle = snapshot.cycle_index,
                    tick = snapshot.tick_count,
                    error = %e,
                    "simulation object failed"
                );
                report.failed = report.failed.saturating_add(1);
            }
            Err(message) => {
                warn!(
                    object = guard.name(),
                    cycle = snapshot.cycle_index,
                    tick = snapshot.tick_count,
                    panic = %message,
                    "simulation object panicked"
                );
                report.failed = report.failed.saturating_add(1);
            }
        }
    }
    report
}
