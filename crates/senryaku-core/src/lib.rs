//! Fixed-tick scheduler, cycle statistics, and consumer dispatch.
//!
//! This crate owns the simulation heartbeat: a background loop samples a
//! monotonic clock, fires ticks at the configured rate, and closes a
//! roughly one-second cycle that measures the achieved tick rate.
//!
//! # Modules
//!
//! - [`clock`] -- [`Clock`] trait with monotonic and manual implementations.
//! - [`config`] -- Typed configuration store, YAML loading, and resolved
//!   [`SchedulerConfig`].
//! - [`events`] -- Per-tick and per-cycle subscriber channels.
//! - [`input`] -- [`InputDispatcher`] trait notified once per tick.
//! - [`object`] -- [`SimObject`] trait and the shared [`ObjectRegistry`].
//! - [`presentation`] -- Lock-free statistics read by a UI thread.
//! - [`runner`] -- [`TickScheduler`]: thread lifecycle, start and stop.
//! - [`state`] -- Atomic scheduler state shared with observers.
//! - [`tick`] -- [`TickLoop`]: one iteration of tick and cycle detection.
//!
//! [`Clock`]: clock::Clock
//! [`SchedulerConfig`]: config::SchedulerConfig
//! [`InputDispatcher`]: input::InputDispatcher
//! [`SimObject`]: object::SimObject
//! [`ObjectRegistry`]: object::ObjectRegistry
//! [`TickScheduler`]: runner::TickScheduler
//! [`TickLoop`]: tick::TickLoop

pub mod clock;
pub mod config;
pub mod events;
pub mod input;
mod isolate;
pub mod object;
pub mod presentation;
pub mod runner;
pub mod state;
pub mod tick;
