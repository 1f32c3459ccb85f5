//! Registry and scheduler configuration.
//!
//! Configuration is fixed when a [`Registry`](crate::registry::Registry) is
//! constructed and validated before any state is created. Every type here is
//! serde-serializable so deployments can keep it in a JSON file; durations are
//! written as seconds (`f64`).
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tally::config::{DayReset, RegistryConfig, SchedulerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig {
//!     recursive_increments: true,
//!     scheduler: SchedulerConfig {
//!         day: DayReset::Never,
//!         ..SchedulerConfig::default()
//!     },
//!     ..RegistryConfig::default()
//! };
//! config.validate()?;
//!
//! let json = serde_json::to_string(&config)?;
//! let parsed: RegistryConfig = serde_json::from_str(&json)?;
//! assert_eq!(parsed, config);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::counter::{DEFAULT_DAY_HISTORY, DEFAULT_HOUR_HISTORY};
use crate::error::{ConfigError, Result};
use crate::window::DefaultWindow;

/// Default name of the scheduler thread.
pub const DEFAULT_THREAD_NAME: &str = "tally-updater";

/// Configuration for a [`Registry`](crate::registry::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Whether increments on a child are forwarded to its ancestors.
    pub recursive_increments: bool,

    /// Completed minutes kept per counter.
    ///
    /// Must cover the longest minute lookback any built-in window uses
    /// ([`DefaultWindow::MAX_MINUTE_LOOKBACK`]).
    pub hour_history: NonZeroUsize,

    /// Completed hours kept per counter.
    ///
    /// Must cover the longest hour lookback any built-in window uses
    /// ([`DefaultWindow::MAX_HOUR_LOOKBACK`]).
    pub day_history: NonZeroUsize,

    /// Background roll cadences.
    pub scheduler: SchedulerConfig,
}

impl RegistryConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::HistoryTooShort`] if `hour_history` is shorter than
    ///   [`DefaultWindow::MAX_MINUTE_LOOKBACK`] or `day_history` is shorter
    ///   than [`DefaultWindow::MAX_HOUR_LOOKBACK`]
    /// - any error from [`SchedulerConfig::validate`]
    pub fn validate(&self) -> Result<()> {
        let histories = [
            ("hour_history", self.hour_history, DefaultWindow::MAX_MINUTE_LOOKBACK),
            ("day_history", self.day_history, DefaultWindow::MAX_HOUR_LOOKBACK),
        ];

        for (history, capacity, required) in histories {
            if capacity.get() < required {
                return Err(ConfigError::HistoryTooShort {
                    history,
                    capacity: capacity.get(),
                    required,
                }
                .into());
            }
        }

        self.scheduler.validate()
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not valid configuration JSON
    /// - any validation error from [`RegistryConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            recursive_increments: false,
            hour_history: DEFAULT_HOUR_HISTORY,
            day_history: DEFAULT_DAY_HISTORY,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Cadences of the background roll sweeps.
///
/// The defaults are real wall-clock periods. Shorter cadences are useful for
/// tests and simulations; they must still grow strictly from second to day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the scheduler thread.
    pub thread_name: String,

    /// How often `roll_second` runs.
    #[serde(with = "duration_serde")]
    pub second: Duration,

    /// How often `roll_minute` runs.
    #[serde(with = "duration_serde")]
    pub minute: Duration,

    /// How often `roll_hour` runs.
    #[serde(with = "duration_serde")]
    pub hour: Duration,

    /// Whether and how often `roll_day` runs.
    pub day: DayReset,
}

impl SchedulerConfig {
    /// Validates the cadences and thread name.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroCadence`] if any cadence is zero
    /// - [`ConfigError::CadencesNotOrdered`] unless second < minute < hour < day
    /// - [`ConfigError::InvalidThreadName`] if the name is empty or contains NUL
    pub fn validate(&self) -> Result<()> {
        if self.thread_name.is_empty() {
            return Err(ConfigError::InvalidThreadName {
                name: self.thread_name.clone(),
                reason: "name cannot be empty",
            }
            .into());
        }

        if self.thread_name.contains('\0') {
            return Err(ConfigError::InvalidThreadName {
                name: self.thread_name.clone(),
                reason: "name cannot contain NUL bytes",
            }
            .into());
        }

        let mut cadences = vec![
            ("second", self.second),
            ("minute", self.minute),
            ("hour", self.hour),
        ];
        if let DayReset::Every(day) = self.day {
            cadences.push(("day", day));
        }

        for &(granularity, every) in &cadences {
            if every.is_zero() {
                return Err(ConfigError::ZeroCadence { granularity }.into());
            }
        }

        for pair in cadences.windows(2) {
            let (finer, finer_every) = pair[0];
            let (coarser, coarser_every) = pair[1];

            if finer_every >= coarser_every {
                return Err(ConfigError::CadencesNotOrdered {
                    finer,
                    finer_every,
                    coarser,
                    coarser_every,
                }
                .into());
            }
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            second: Duration::from_secs(1),
            minute: Duration::from_secs(60),
            hour: Duration::from_secs(3600),
            day: DayReset::default(),
        }
    }
}

/// Policy for resetting the day accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayReset {
    /// Never reset: the day accumulator grows like the total.
    Never,

    /// Reset on a fixed cadence, measured from scheduler start.
    Every(#[serde(with = "duration_serde")] Duration),
}

impl Default for DayReset {
    fn default() -> Self {
        Self::Every(Duration::from_secs(86_400))
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TallyError;

    #[test]
    fn test_default_config_is_valid() {
        let config = RegistryConfig::default();

        assert!(config.validate().is_ok());
        assert!(!config.recursive_increments);
        assert_eq!(config.hour_history.get(), 60);
        assert_eq!(config.day_history.get(), 24);
        assert_eq!(config.scheduler.thread_name, DEFAULT_THREAD_NAME);
        assert_eq!(config.scheduler.day, DayReset::Every(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let config = SchedulerConfig {
            minute: Duration::ZERO,
            ..SchedulerConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            TallyError::Config(ConfigError::ZeroCadence { granularity: "minute" })
        ));
    }

    #[test]
    fn test_unordered_cadences_rejected() {
        let config = SchedulerConfig {
            second: Duration::from_secs(90),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            TallyError::Config(ConfigError::CadencesNotOrdered { finer: "second", .. })
        ));

        let config = SchedulerConfig {
            day: DayReset::Every(Duration::from_secs(60)),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            TallyError::Config(ConfigError::CadencesNotOrdered { coarser: "day", .. })
        ));
    }

    #[test]
    fn test_day_never_skips_day_ordering() {
        let config = SchedulerConfig {
            day: DayReset::Never,
            ..SchedulerConfig::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_thread_names_rejected() {
        for name in ["", "tally\0updater"] {
            let config = SchedulerConfig {
                thread_name: name.to_string(),
                ..SchedulerConfig::default()
            };
            assert!(matches!(
                config.validate().unwrap_err(),
                TallyError::Config(ConfigError::InvalidThreadName { .. })
            ));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "recursive_increments": true,
            "scheduler": { "second": 0.5, "minute": 30, "day": "never" }
        }"#;

        let config: RegistryConfig = serde_json::from_str(json).unwrap();

        assert!(config.recursive_increments);
        assert_eq!(config.hour_history, DEFAULT_HOUR_HISTORY);
        assert_eq!(config.scheduler.second, Duration::from_millis(500));
        assert_eq!(config.scheduler.minute, Duration::from_secs(30));
        assert_eq!(config.scheduler.hour, Duration::from_secs(3600));
        assert_eq!(config.scheduler.day, DayReset::Never);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_day_every_json_shape() {
        let json = serde_json::to_value(DayReset::Every(Duration::from_secs(7200))).unwrap();
        assert_eq!(json, serde_json::json!({ "every": 7200.0 }));
    }

    #[test]
    fn test_zero_history_rejected_by_parser() {
        let result: std::result::Result<RegistryConfig, _> =
            serde_json::from_str(r#"{ "hour_history": 0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_short_history_rejected() {
        let config = RegistryConfig {
            hour_history: NonZeroUsize::new(2).unwrap(),
            ..RegistryConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            TallyError::Config(ConfigError::HistoryTooShort {
                history: "hour_history",
                capacity: 2,
                required: 29,
            })
        ));

        let config = RegistryConfig {
            day_history: NonZeroUsize::new(10).unwrap(),
            ..RegistryConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            TallyError::Config(ConfigError::HistoryTooShort {
                history: "day_history",
                ..
            })
        ));
    }

    #[test]
    fn test_minimum_history_accepted() {
        let config = RegistryConfig {
            hour_history: NonZeroUsize::new(29).unwrap(),
            day_history: NonZeroUsize::new(11).unwrap(),
            ..RegistryConfig::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_duration_rejected_by_parser() {
        let result: std::result::Result<SchedulerConfig, _> =
            serde_json::from_str(r#"{ "second": -1.0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.json");
        std::fs::write(&path, r#"{ "recursive_increments": true }"#).unwrap();

        let config = RegistryConfig::from_json_file(&path).unwrap();
        assert!(config.recursive_increments);

        let missing = RegistryConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(
            missing.unwrap_err(),
            TallyError::Config(ConfigError::Read { .. })
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RegistryConfig::from_json_file(&path).unwrap_err(),
            TallyError::Config(ConfigError::Parse { .. })
        ));
    }
}
