//! Configuration store, YAML loading, and the resolved scheduler settings.
//!
//! Settings flow through three layers:
//!
//! 1. [`SimulationConfig`] mirrors `senryaku-config.yaml`. Every field has a
//!    serde default, so a missing file or an empty document is valid.
//! 2. [`ConfigStore`] is the process-wide key/value view over a closed set of
//!    [`SettingKind`] keys. Reads coerce the stored value to the requested
//!    type; an absent key yields the type's zero value.
//! 3. [`SchedulerConfig`] is the typed, validated bundle the tick scheduler
//!    is constructed from.
//!
//! # Design Principles
//!
//! - An absent key is not an error. A stored value that cannot be coerced
//!   to the requested type is, and it is reported as
//!   [`ConfigError::Coercion`] rather than clamped or wrapped.
//! - The store is immutable once built; [`install_global`] publishes it for
//!   the life of the process.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use senryaku_types::{EstimateMode, SettingKind};

/// Default target rate in ticks per second.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 80;

/// Default statistics cycle length in milliseconds.
pub const DEFAULT_CYCLE_LENGTH_MS: u64 = 1000;

/// Default grace period granted to the tick loop on stop, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 100;

/// Default idle sleep between loop iterations, in microseconds.
pub const DEFAULT_IDLE_SLEEP_MICROS: u64 = 500;

/// Errors that can occur when loading or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A stored value cannot be represented as the requested type.
    #[error("setting {kind} holds {value}, which is not a valid {target}")]
    Coercion {
        /// The setting that was read.
        kind: SettingKind,
        /// Display form of the stored value.
        value: String,
        /// Name of the requested type.
        target: &'static str,
    },

    /// The resolved settings violate an invariant.
    #[error("invalid scheduler configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// A global store was already installed for this process.
    #[error("a global configuration store is already installed")]
    AlreadyInstalled,
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

// ---------------------------------------------------------------------------
// YAML file
// ---------------------------------------------------------------------------

/// Top-level configuration file.
///
/// Mirrors the structure of `senryaku-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Tick scheduler timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Demo collaborators registered by the engine binary.
    #[serde(default)]
    pub demo: DemoConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Scheduler timing section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Target ticks per second.
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,

    /// Statistics cycle length in milliseconds.
    #[serde(default = "default_cycle_length_ms")]
    pub cycle_length_ms: u64,

    /// Grace period for a clean stop in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Idle sleep between iterations in microseconds (0 = yield only).
    #[serde(default = "default_idle_sleep_micros")]
    pub idle_sleep_micros: u64,

    /// How the per-tick ticks-elapsed estimate is computed.
    #[serde(default)]
    pub estimate_mode: EstimateMode,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: default_ticks_per_second(),
            cycle_length_ms: default_cycle_length_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            idle_sleep_micros: default_idle_sleep_micros(),
            estimate_mode: EstimateMode::default(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Demo collaborators section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DemoConfig {
    /// Number of well-behaved drifting objects to register.
    #[serde(default = "default_object_count")]
    pub object_count: u32,

    /// Number of objects that fail periodically.
    #[serde(default)]
    pub faulty_objects: u32,

    /// A faulty object fails on every tick whose total count is a multiple
    /// of this value.
    #[serde(default = "default_fault_every_n_ticks")]
    pub fault_every_n_ticks: u64,

    /// Run for this many seconds, then stop (0 = until Ctrl-C).
    #[serde(default)]
    pub run_seconds: u64,

    /// Seed for the demo objects' random motion.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            object_count: default_object_count(),
            faulty_objects: 0,
            fault_every_n_ticks: default_fault_every_n_ticks(),
            run_seconds: 0,
            seed: default_seed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key/value store
// ---------------------------------------------------------------------------

/// A raw stored setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    /// Integer wide enough to hold any `u64` or `i64` without loss.
    Int(i128),
    /// Ticks-elapsed estimate mode.
    Mode(EstimateMode),
}

impl core::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Mode(v) => f.write_str(v.as_str()),
        }
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u32> for SettingValue {
    fn from(v: u32) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u64> for SettingValue {
    fn from(v: u64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<EstimateMode> for SettingValue {
    fn from(v: EstimateMode) -> Self {
        Self::Mode(v)
    }
}

/// A type that a [`SettingValue`] can be coerced into.
///
/// [`Default`] supplies the zero value returned for absent keys.
pub trait FromSetting: Sized + Default {
    /// Human-readable type name used in coercion errors.
    const TYPE_NAME: &'static str;

    /// Convert the stored value, or `None` if it does not fit.
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSetting for u32 {
    const TYPE_NAME: &'static str = "u32";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Int(v) => Self::try_from(*v).ok(),
            SettingValue::Mode(_) => None,
        }
    }
}

impl FromSetting for u64 {
    const TYPE_NAME: &'static str = "u64";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Int(v) => Self::try_from(*v).ok(),
            SettingValue::Mode(_) => None,
        }
    }
}

impl FromSetting for EstimateMode {
    const TYPE_NAME: &'static str = "estimate mode";

    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Mode(v) => Some(*v),
            SettingValue::Int(_) => None,
        }
    }
}

/// Immutable mapping from [`SettingKind`] to a stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    entries: BTreeMap<SettingKind, SettingValue>,
}

impl ConfigStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Return the store with `kind` set to `value`.
    #[must_use]
    pub fn with(mut self, kind: SettingKind, value: impl Into<SettingValue>) -> Self {
        self.entries.insert(kind, value.into());
        self
    }

    /// Build a store holding every scheduler setting from the YAML config.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let timing = &config.timing;
        Self::new()
            .with(SettingKind::TicksPerSecond, timing.ticks_per_second)
            .with(SettingKind::CycleLengthMs, timing.cycle_length_ms)
            .with(SettingKind::ShutdownGraceMs, timing.shutdown_grace_ms)
            .with(SettingKind::IdleSleepMicros, timing.idle_sleep_micros)
            .with(SettingKind::EstimateMode, timing.estimate_mode)
    }

    /// Read `kind` as `T`.
    ///
    /// Returns `T::default()` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Coercion`] if the stored value cannot be
    /// represented as `T`.
    pub fn get<T: FromSetting>(&self, kind: SettingKind) -> Result<T, ConfigError> {
        self.get_or(kind, T::default())
    }

    /// Read `kind` as `T`, returning `fallback` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Coercion`] if the stored value cannot be
    /// represented as `T`.
    pub fn get_or<T: FromSetting>(&self, kind: SettingKind, fallback: T) -> Result<T, ConfigError> {
        self.entries
            .get(&kind)
            .map_or(Ok(fallback), |value| coerce(kind, value))
    }
}

fn coerce<T: FromSetting>(kind: SettingKind, value: &SettingValue) -> Result<T, ConfigError> {
    T::from_setting(value).ok_or_else(|| ConfigError::Coercion {
        kind,
        value: value.to_string(),
        target: T::TYPE_NAME,
    })
}

static GLOBAL: OnceLock<ConfigStore> = OnceLock::new();
static EMPTY: ConfigStore = ConfigStore::new();

/// Publish `store` as the process-wide configuration.
///
/// # Errors
///
/// Returns [`ConfigError::AlreadyInstalled`] if a store was already
/// installed; the existing store is left untouched.
pub fn install_global(store: ConfigStore) -> Result<&'static ConfigStore, ConfigError> {
    let mut installed = false;
    let current = GLOBAL.get_or_init(|| {
        installed = true;
        store
    });
    if installed {
        Ok(current)
    } else {
        Err(ConfigError::AlreadyInstalled)
    }
}

/// The process-wide configuration, or an empty store if none is installed.
pub fn global() -> &'static ConfigStore {
    GLOBAL.get().unwrap_or(&EMPTY)
}

// ---------------------------------------------------------------------------
// Resolved scheduler settings
// ---------------------------------------------------------------------------

/// Typed settings a tick scheduler is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Target ticks per second. Must be positive.
    pub ticks_per_second: u32,
    /// Length of one statistics cycle.
    pub cycle_length: Duration,
    /// How long `stop` waits for the loop to exit.
    pub shutdown_grace: Duration,
    /// Sleep between iterations when nothing is due (zero = yield).
    pub idle_sleep: Duration,
    /// How the ticks-elapsed estimate is computed.
    pub estimate_mode: EstimateMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            cycle_length: Duration::from_millis(DEFAULT_CYCLE_LENGTH_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            idle_sleep: Duration::from_micros(DEFAULT_IDLE_SLEEP_MICROS),
            estimate_mode: EstimateMode::default(),
        }
    }
}

impl SchedulerConfig {
    /// Config for `ticks_per_second` with every other setting at its default.
    pub fn with_rate(ticks_per_second: u32) -> Self {
        Self {
            ticks_per_second,
            ..Self::default()
        }
    }

    /// Resolve scheduler settings from a store.
    ///
    /// The target rate has no fallback: an absent `TicksPerSecond` reads as
    /// zero and is rejected by [`validate`](Self::validate). The remaining
    /// settings fall back to their defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Coercion`] if any stored value has the wrong
    /// type.
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        Ok(Self {
            ticks_per_second: store.get(SettingKind::TicksPerSecond)?,
            cycle_length: Duration::from_millis(
                store.get_or(SettingKind::CycleLengthMs, DEFAULT_CYCLE_LENGTH_MS)?,
            ),
            shutdown_grace: Duration::from_millis(
                store.get_or(SettingKind::ShutdownGraceMs, DEFAULT_SHUTDOWN_GRACE_MS)?,
            ),
            idle_sleep: Duration::from_micros(
                store.get_or(SettingKind::IdleSleepMicros, DEFAULT_IDLE_SLEEP_MICROS)?,
            ),
            estimate_mode: store.get(SettingKind::EstimateMode)?,
        })
    }

    /// Ideal duration between ticks: one second divided by the target rate.
    ///
    /// Zero when the rate is zero or above one billion;
    /// [`validate`](Self::validate) rejects both.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1)
            .checked_div(self.ticks_per_second)
            .unwrap_or(Duration::ZERO)
    }

    /// Check the invariants the tick loop relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the rate is zero or so high that
    /// the interval rounds to zero nanoseconds, if the cycle is empty, or if
    /// a single tick interval is longer than the cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::Invalid {
                reason: "ticks_per_second must be at least 1".to_owned(),
            });
        }
        if self.tick_interval().is_zero() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "ticks_per_second {} is finer than nanosecond resolution",
                    self.ticks_per_second
                ),
            });
        }
        if self.cycle_length.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "cycle_length_ms must be at least 1".to_owned(),
            });
        }
        if self.tick_interval() > self.cycle_length {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "tick interval {:?} exceeds cycle length {:?}",
                    self.tick_interval(),
                    self.cycle_length
                ),
            });
        }
        Ok(())
    }
}

const fn default_ticks_per_second() -> u32 {
    DEFAULT_TICKS_PER_SECOND
}

const fn default_cycle_length_ms() -> u64 {
    DEFAULT_CYCLE_LENGTH_MS
}

const fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

const fn default_idle_sleep_micros() -> u64 {
    DEFAULT_IDLE_SLEEP_MICROS
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_object_count() -> u32 {
    16
}

const fn default_fault_every_n_ticks() -> u64 {
    40
}

const fn default_seed() -> u64 {
    42
}
