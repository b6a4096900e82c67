//! Deadline budgets per service class.

use std::fmt;
use std::time::Duration;

use crate::config::TimeoutConfig;

/// The server-side service an operation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceClass {
    /// Key-value (document) operations.
    KeyValue,
    /// SQL++ query service.
    Query,
    /// Analytics service.
    Analytics,
    /// Full-text search service.
    Search,
    /// Management APIs (buckets, collections, indexes, users).
    Management,
    /// Map/reduce views.
    View,
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeyValue => "kv",
            Self::Query => "query",
            Self::Analytics => "analytics",
            Self::Search => "search",
            Self::Management => "management",
            Self::View => "view",
        })
    }
}

/// Resolves the deadline budget of an operation.
///
/// A pure lookup: an explicit per-call timeout always wins, durable key-value
/// writes get the durable default, everything else gets its service default.
#[derive(Debug, Clone, Default)]
pub struct TimeoutResolver {
    config: TimeoutConfig,
}

impl TimeoutResolver {
    /// Creates a resolver over the given defaults.
    pub const fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// The defaults this resolver reads from.
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Budget for one operation.
    pub fn resolve(
        &self,
        service: ServiceClass,
        per_call: Option<Duration>,
        durable_write: bool,
    ) -> Duration {
        if let Some(timeout) = per_call {
            return timeout;
        }
        if durable_write && service == ServiceClass::KeyValue {
            return self.config.key_value_durable.as_duration();
        }
        self.config.for_service(service).as_duration()
    }
}
