//! Client configuration with type-safe validation.
//!
//! Every tunable is a `nutype` newtype validated at construction, so an
//! out-of-range timeout or backoff parameter is rejected when the
//! configuration is built (or deserialized), never at request time.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeout::ServiceClass;

/// Per-service operation timeout in milliseconds.
///
/// Validated to be between 1 millisecond and 1 hour.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct TimeoutMs(u64);

impl TimeoutMs {
    /// Convert to Duration for deadline computation.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Backoff before the first retry, in milliseconds.
///
/// Validated to be at most 10 seconds. Zero disables backoff entirely.
#[nutype(
    validate(less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackoffMinMs(u64);

/// Upper bound on any single backoff, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackoffMaxMs(u64);

impl BackoffMaxMs {
    /// Convert to Duration.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Growth factor between consecutive backoffs.
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 10.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Into, Serialize, Deserialize)
)]
pub struct BackoffFactor(f64);

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document was not valid JSON or held an out-of-range value.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Default deadline budget for each service class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Key-value operations.
    pub key_value: TimeoutMs,
    /// Key-value writes with a durability requirement.
    pub key_value_durable: TimeoutMs,
    /// Query service.
    pub query: TimeoutMs,
    /// Analytics service.
    pub analytics: TimeoutMs,
    /// Search service.
    pub search: TimeoutMs,
    /// Management APIs.
    pub management: TimeoutMs,
    /// View service.
    pub view: TimeoutMs,
}

impl TimeoutConfig {
    /// Create the timeout table with the standard defaults.
    ///
    /// # Errors
    ///
    /// Returns validation errors if any of the default values are invalid
    /// (which should never happen with proper constants).
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            key_value: TimeoutMs::try_new(2_500)?,
            key_value_durable: TimeoutMs::try_new(10_000)?,
            query: TimeoutMs::try_new(75_000)?,
            analytics: TimeoutMs::try_new(75_000)?,
            search: TimeoutMs::try_new(75_000)?,
            management: TimeoutMs::try_new(75_000)?,
            view: TimeoutMs::try_new(75_000)?,
        })
    }

    /// Load a timeout table from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The configured default for `service` (non-durable).
    pub const fn for_service(&self, service: ServiceClass) -> TimeoutMs {
        match service {
            ServiceClass::KeyValue => self.key_value,
            ServiceClass::Query => self.query,
            ServiceClass::Analytics => self.analytics,
            ServiceClass::Search => self.search,
            ServiceClass::Management => self.management,
            ServiceClass::View => self.view,
        }
    }

    /// Set the key-value timeout.
    #[must_use]
    pub const fn with_key_value(mut self, timeout: TimeoutMs) -> Self {
        self.key_value = timeout;
        self
    }

    /// Set the durable key-value timeout.
    #[must_use]
    pub const fn with_key_value_durable(mut self, timeout: TimeoutMs) -> Self {
        self.key_value_durable = timeout;
        self
    }

    /// Set the query timeout.
    #[must_use]
    pub const fn with_query(mut self, timeout: TimeoutMs) -> Self {
        self.query = timeout;
        self
    }

    /// Set the analytics timeout.
    #[must_use]
    pub const fn with_analytics(mut self, timeout: TimeoutMs) -> Self {
        self.analytics = timeout;
        self
    }

    /// Set the search timeout.
    #[must_use]
    pub const fn with_search(mut self, timeout: TimeoutMs) -> Self {
        self.search = timeout;
        self
    }

    /// Set the management timeout.
    #[must_use]
    pub const fn with_management(mut self, timeout: TimeoutMs) -> Self {
        self.management = timeout;
        self
    }

    /// Set the view timeout.
    #[must_use]
    pub const fn with_view(mut self, timeout: TimeoutMs) -> Self {
        self.view = timeout;
        self
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new().expect("Default timeout configuration should always be valid")
    }
}

/// Exponential backoff schedule between retries.
///
/// The n-th retry waits `min * factor^n`, capped at `max`. With jitter
/// enabled the wait is drawn uniformly from `[0, capped]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Backoff before the first retry.
    pub min: BackoffMinMs,
    /// Cap on any single backoff.
    pub max: BackoffMaxMs,
    /// Multiplier applied per retry.
    pub factor: BackoffFactor,
    /// Whether to randomize each backoff.
    pub jitter: bool,
}

impl BackoffConfig {
    /// Create the standard schedule: 1ms doubling up to 500ms, no jitter.
    ///
    /// # Errors
    ///
    /// Returns validation errors if any of the default values are invalid.
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            min: BackoffMinMs::try_new(1)?,
            max: BackoffMaxMs::try_new(500)?,
            factor: BackoffFactor::try_new(2.0)?,
            jitter: false,
        })
    }

    /// Load a backoff schedule from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the initial backoff.
    #[must_use]
    pub const fn with_min(mut self, min: BackoffMinMs) -> Self {
        self.min = min;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub const fn with_max(mut self, max: BackoffMaxMs) -> Self {
        self.max = max;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_factor(mut self, factor: BackoffFactor) -> Self {
        self.factor = factor;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new().expect("Default backoff configuration should always be valid")
    }
}

/// Everything a [`RequestExecutor`](crate::RequestExecutor) is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default budgets per service class.
    pub timeouts: TimeoutConfig,
    /// Retry backoff schedule.
    pub backoff: BackoffConfig,
}

impl ExecutorConfig {
    /// Load an executor configuration from JSON; missing sections keep their defaults.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = ExecutorConfig::from_json(r#"{"timeouts": {"key_value": 1000}}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the timeout table.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}
