//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure `main` can hit so it can propagate
//! with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or installation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: senryaku_core::config::ConfigError,
    },

    /// The scheduler could not be built, started, or stopped.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: senryaku_core::runner::SchedulerError,
    },

    /// A blocking task on the async runtime failed.
    #[error("task join error: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Final statistics could not be serialized.
    #[error("stats serialization error: {source}")]
    Json {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
