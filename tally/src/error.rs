//! Error types for the tally usage counters.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for all tally operations.
///
/// Per-call misuse (a negative amount, a cyclic parent) surfaces as
/// [`CounterError`]; construction-time misconfiguration surfaces as
/// [`ConfigError`] before any state exists; scheduler lifecycle problems
/// surface as [`SchedulerError`].
#[derive(Error, Debug)]
pub enum TallyError {
    /// Error raised by a counter or ring buffer operation.
    #[error("counter error: {0}")]
    Counter(#[from] CounterError),

    /// Error raised while validating or loading configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error raised by the background scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised by counters and their history buffers.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CounterError {
    /// Increment amounts must be non-negative.
    #[error("increment amount must be non-negative, got {amount}")]
    NegativeAmount {
        /// The rejected amount.
        amount: i64,
    },

    /// Ring buffers need room for at least one entry.
    #[error("ring buffer capacity must be at least 1, got {capacity}")]
    InvalidCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// Linking the counter to the requested parent would form a cycle.
    #[error("parent chain would revisit the counter's own key")]
    ParentCycle,
}

/// Errors raised while validating or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A roll cadence was zero.
    #[error("{granularity} cadence cannot be zero")]
    ZeroCadence {
        /// Which cadence was zero (`second`, `minute`, `hour`, `day`).
        granularity: &'static str,
    },

    /// Cadences must grow strictly from second to day.
    #[error("{finer} cadence ({finer_every:?}) must be shorter than {coarser} cadence ({coarser_every:?})")]
    CadencesNotOrdered {
        /// The finer granularity.
        finer: &'static str,
        /// Its cadence.
        finer_every: Duration,
        /// The coarser granularity.
        coarser: &'static str,
        /// Its cadence.
        coarser_every: Duration,
    },

    /// The scheduler thread name is unusable.
    #[error("invalid scheduler thread name {name:?}: {reason}")]
    InvalidThreadName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A history buffer is shorter than the longest window lookback.
    #[error("{history} of {capacity} is shorter than the {required} entries windows read")]
    HistoryTooShort {
        /// Which history was too short (`hour_history` or `day_history`).
        history: &'static str,
        /// The configured capacity.
        capacity: usize,
        /// The minimum capacity.
        required: usize,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the background scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// `start` was called while the scheduler thread was already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The thread factory failed to spawn the scheduler thread.
    #[error("failed to spawn scheduler thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Error returned when parsing an unknown built-in window name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown window '{name}'")]
pub struct UnknownWindow {
    /// The name that did not match any built-in window.
    pub name: String,
}

/// Type alias for `Result<T, TallyError>`.
pub type Result<T> = std::result::Result<T, TallyError>;
