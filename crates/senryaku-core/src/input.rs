//! Input dispatch hook.
//!
//! Once per tick, before any simulation object runs, the scheduler hands
//! the input dispatcher the coarse count of tick intervals covered since the
//! previous tick. Device polling itself is the dispatcher's business.

/// Errors reported by an input dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// A bound handler failed while processing the tick.
    #[error("input handler failed: {message}")]
    Handler {
        /// Description of the failure.
        message: String,
    },
}

/// Receiver of the per-tick input notification.
///
/// Implemented for any `FnMut(u64) -> Result<(), InputError>` closure.
pub trait InputDispatcher: Send {
    /// Process input for one tick.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if a handler fails. The scheduler logs the
    /// error and continues with object dispatch.
    fn dispatch(&mut self, ticks_elapsed: u64) -> Result<(), InputError>;
}

impl<F> InputDispatcher for F
where
    F: FnMut(u64) -> Result<(), InputError> + Send,
{
    fn dispatch(&mut self, ticks_elapsed: u64) -> Result<(), InputError> {
        self(ticks_elapsed)
    }
}

/// Dispatcher that ignores every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInput;

impl InputDispatcher for NullInput {
    fn dispatch(&mut self, _ticks_elapsed: u64) -> Result<(), InputError> {
        Ok(())
    }
}
