//! Demo engine for the Senryaku fixed-tick scheduler.
//!
//! Loads configuration, registers demo objects, and runs the scheduler on
//! its background thread while an async reporter reads the presentation
//! statistics once per second.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `senryaku-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Install the process-wide configuration store
//! 4. Register demo objects
//! 5. Start the scheduler and the statistics reporter
//! 6. Wait for Ctrl-C or the configured run time
//! 7. Stop the scheduler and log final statistics as JSON

mod demo;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use senryaku_core::config::{self, SchedulerConfig, SimulationConfig};
use senryaku_core::object::ObjectRegistry;
use senryaku_core::presentation::PresentationContext;
use senryaku_core::runner::{Collaborators, TickScheduler};
use senryaku_core::state::SchedulerState;
use senryaku_types::{StatsSnapshot, StopOutcome};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "senryaku-config.yaml";

/// How often the reporter logs presentation statistics.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Statistics logged once the scheduler has stopped.
#[derive(Debug, Serialize)]
struct FinalStats {
    stats: StatsSnapshot,
    total_ticks: u64,
    cycles: u64,
    dispatch_failures: u64,
    clean_stop: bool,
}

/// Application entry point for the demo engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the scheduler cannot start,
/// or it fails to stop within its grace period.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration; logging depends on it.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging.level);
    info!("senryaku-engine starting");
    if from_file {
        info!(path = CONFIG_PATH, "Configuration loaded");
    } else {
        info!(path = CONFIG_PATH, "Config file not found, using defaults");
    }

    // 3. Install the configuration store.
    let store = config::install_global(config::ConfigStore::from_config(&config))?;
    let scheduler_config = SchedulerConfig::from_store(store)?;
    info!(
        ticks_per_second = scheduler_config.ticks_per_second,
        cycle_length_ms = config.timing.cycle_length_ms,
        shutdown_grace_ms = config.timing.shutdown_grace_ms,
        estimate_mode = scheduler_config.estimate_mode.as_str(),
        "Scheduler configuration resolved"
    );

    // 4. Register demo objects.
    let registry = ObjectRegistry::new();
    demo::populate(&registry, &config.demo);

    // 5. Start the scheduler and reporter.
    let presentation = Arc::new(PresentationContext::new());
    let collaborators = Collaborators::new(registry, Arc::clone(&presentation))
        .with_input(demo::tick_logger());
    let mut scheduler = TickScheduler::new(scheduler_config, collaborators)?;
    scheduler.start()?;

    let reporter = tokio::spawn(report_stats(
        Arc::clone(&presentation),
        scheduler.state(),
    ));

    // 6. Run until interrupted.
    wait_for_shutdown(config.demo.run_seconds).await;
    reporter.abort();

    // 7. Stop off the async workers; the wait is bounded but blocking.
    let (scheduler, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = scheduler.stop();
        (scheduler, outcome)
    })
    .await
    .map_err(EngineError::from)?;

    let final_stats = FinalStats {
        stats: presentation.snapshot(),
        total_ticks: scheduler.total_ticks(),
        cycles: scheduler.cycle_index(),
        dispatch_failures: scheduler.dispatch_failures(),
        clean_stop: matches!(outcome, Ok(StopOutcome::Clean)),
    };
    let json = serde_json::to_string(&final_stats).map_err(EngineError::from)?;
    info!(stats = %json, "Final statistics");

    outcome.map_err(EngineError::from)?;
    info!("senryaku-engine shutdown complete");
    Ok(())
}

/// Initialize tracing with `RUST_LOG`, falling back to `default_level`.
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();
}

/// Load `senryaku-config.yaml` from the working directory.
///
/// Returns the configuration and whether it came from the file.
fn load_config() -> Result<(SimulationConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((SimulationConfig::from_file(config_path)?, true))
    } else {
        Ok((SimulationConfig::default(), false))
    }
}

/// Log presentation statistics every [`REPORT_INTERVAL`].
async fn report_stats(presentation: Arc<PresentationContext>, state: Arc<SchedulerState>) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    // The first tick completes immediately; skip it so the first report
    // follows a full cycle.
    interval.tick().await;
    loop {
        interval.tick().await;
        let stats = presentation.snapshot();
        info!(
            tps = stats.ticks_per_second,
            live_objects = stats.live_objects,
            cycle = stats.cycle_index,
            total_ticks = state.total_ticks(),
            dispatch_failures = state.dispatch_failures(),
            "Tick statistics"
        );
    }
}

/// Wait for Ctrl-C, or for `run_seconds` when it is non-zero.
async fn wait_for_shutdown(run_seconds: u64) {
    let run_limit = async {
        if run_seconds == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(run_seconds)).await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Ctrl-C received, stopping"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, stopping"),
        },
        () = run_limit => info!(run_seconds, "Run time elapsed, stopping"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_limit_ends_wait() {
        let waited = tokio::time::timeout(Duration::from_secs(5), wait_for_shutdown(1)).await;
        assert!(waited.is_ok());
    }

    #[test]
    fn final_stats_serialize_as_json() {
        let stats = FinalStats {
            stats: StatsSnapshot {
                ticks_per_second: 80,
                live_objects: 16,
                cycle_index: 3,
                updated_at: None,
            },
            total_ticks: 320,
            cycles: 4,
            dispatch_failures: 0,
            clean_stop: true,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&stats).unwrap()).unwrap();
        assert_eq!(value["stats"]["ticks_per_second"], 80);
        assert_eq!(value["total_ticks"], 320);
        assert_eq!(value["clean_stop"], true);
    }

    #[tokio::test]
    async fn scheduler_runs_under_the_runtime() {
        let registry = ObjectRegistry::new();
        demo::populate(
            &registry,
            &config::DemoConfig {
                object_count: 3,
                faulty_objects: 1,
                fault_every_n_ticks: 2,
                ..config::DemoConfig::default()
            },
        );
        let presentation = Arc::new(PresentationContext::new());
        let mut scheduler = TickScheduler::new(
            SchedulerConfig::with_rate(100),
            Collaborators::new(registry, presentation).with_input(demo::tick_logger()),
        )
        .unwrap();
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (scheduler, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = scheduler.stop();
            (scheduler, outcome)
        })
        .await
        .unwrap();
        assert_eq!(outcome.unwrap(), StopOutcome::Clean);
        assert!(scheduler.total_ticks() > 0);
        assert!(scheduler.dispatch_failures() > 0);
    }
}
