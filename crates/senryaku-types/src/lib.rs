//! Shared type definitions for the Senryaku tick scheduler.
//!
//! Everything that crosses a crate boundary lives here: identifiers for
//! simulation objects, the closed set of configuration keys, scheduler
//! lifecycle enums, and the timing snapshots handed to tick consumers.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for entity identifiers
//! - [`enums`] -- Setting kinds, scheduler phases, estimate modes, stop outcomes
//! - [`structs`] -- Tick snapshots and presentation statistics

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{EstimateMode, SchedulerPhase, SettingKind, StopOutcome};
pub use ids::ObjectId;
pub use structs::{StatsSnapshot, TickSnapshot};
