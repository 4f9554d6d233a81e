//! Scheduler configuration.
//!
//! [`SchedulerConfig`] is a plain serde-friendly struct so hosts can embed it
//! in their own configuration files, load it from JSON, or read it from the
//! environment.
//!
//! | Variable                      | Effect                                        |
//! |-------------------------------|-----------------------------------------------|
//! | `RQUEUES_ENV`                 | `production` disables drain warnings          |
//! | `RQUEUES_DEFAULT_PARALLELISM` | parallelism for queues created by `schedule`  |
//! | `RQUEUES_DRAIN_WARNING_MS`    | drain warning threshold, `0` disables it      |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_MODE: &str = "RQUEUES_ENV";
const ENV_DEFAULT_PARALLELISM: &str = "RQUEUES_DEFAULT_PARALLELISM";
const ENV_DRAIN_WARNING_MS: &str = "RQUEUES_DRAIN_WARNING_MS";

/// Default delay after which `await_all` warns about a queue that has not drained.
pub const DEFAULT_DRAIN_WARNING_MS: u64 = 2_000;

/// Errors produced while loading a [`SchedulerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Tunables for a [`QueueRegistry`](crate::QueueRegistry).
///
/// # Examples
///
/// ```
/// use rqueues::SchedulerConfig;
///
/// let config = SchedulerConfig::from_json(r#"{ "default_parallelism": 2 }"#).unwrap();
/// assert_eq!(config.default_parallelism, 2);
/// assert!(config.drain_warning().is_some());
///
/// assert!(SchedulerConfig::production().drain_warning().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Parallelism of queues created through `schedule` (must be positive).
    pub default_parallelism: usize,
    /// Warn when a queue has not drained within this many milliseconds during
    /// `await_all`. `None` disables the diagnostic.
    pub drain_warning_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_parallelism: 1,
            drain_warning_ms: Some(DEFAULT_DRAIN_WARNING_MS),
        }
    }
}

impl SchedulerConfig {
    /// Production profile: drain diagnostics disabled.
    pub fn production() -> Self {
        Self {
            drain_warning_ms: None,
            ..Self::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input or unknown fields and
    /// [`ConfigError::InvalidValue`] when a value fails validation.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()
    }

    /// Reads the `RQUEUES_*` environment variables on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), but with a caller-supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_MODE) {
            Some(mode) if mode.eq_ignore_ascii_case("production") => Self::production(),
            _ => Self::default(),
        };

        if let Some(raw) = lookup(ENV_DEFAULT_PARALLELISM) {
            config.default_parallelism = parse_number(ENV_DEFAULT_PARALLELISM, &raw)?;
        }

        if let Some(raw) = lookup(ENV_DRAIN_WARNING_MS) {
            config.drain_warning_ms = match parse_number::<u64>(ENV_DRAIN_WARNING_MS, &raw)? {
                0 => None,
                ms => Some(ms),
            };
        }

        config.validate()
    }

    /// Drain warning threshold as a [`Duration`].
    pub fn drain_warning(&self) -> Option<Duration> {
        self.drain_warning_ms.map(Duration::from_millis)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.default_parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                key: "default_parallelism",
                value: "0".to_owned(),
                reason: "parallelism must be at least 1",
            });
        }
        Ok(self)
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_owned(),
        reason: "expected a non-negative integer",
    })
}
