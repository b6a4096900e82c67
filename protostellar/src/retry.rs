//! Retry reasons, decisions, strategies and the orchestrator that ties them together.
//!
//! A [`RetryReason`] only says *why* an attempt should be repeated. Whether it
//! is repeated is up to the request's [`RetryStrategy`]; how long to wait is up
//! to the [`RetryOrchestrator`]'s backoff schedule. Neither decision depends on
//! the other.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::BackoffConfig;
use crate::context::RequestContext;
use crate::errors::{ErrorKind, ProtostellarError};

/// Why an attempt is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    /// The document is locked by another client.
    DocumentLocked,
    /// The node serving the request is temporarily unavailable.
    NodeUnavailable,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DocumentLocked => "document_locked",
            Self::NodeUnavailable => "node_unavailable",
        })
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Wait `after`, then issue another attempt.
    Retry {
        /// Backoff before the next attempt.
        after: Duration,
    },
    /// Stop and surface the error.
    Fail(ProtostellarError),
}

impl RetryDecision {
    /// Returns true for [`RetryDecision::Retry`].
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    /// Backoff in microseconds, if this is a retry.
    pub fn after_micros(&self) -> Option<u64> {
        match self {
            Self::Retry { after } => Some(u64::try_from(after.as_micros()).unwrap_or(u64::MAX)),
            Self::Fail(_) => None,
        }
    }

    /// The terminal error, if this is a failure.
    pub const fn error(&self) -> Option<&ProtostellarError> {
        match self {
            Self::Retry { .. } => None,
            Self::Fail(error) => Some(error),
        }
    }
}

/// Decides whether a request may be retried for a given reason.
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// Returns true if the request may be retried because of `reason`.
    fn permits(&self, reason: RetryReason) -> bool;
}

/// Retries every reason until the deadline. The default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestEffortRetryStrategy;

impl RetryStrategy for BestEffortRetryStrategy {
    fn permits(&self, _reason: RetryReason) -> bool {
        true
    }
}

/// Never retries. Every retryable failure becomes terminal on first sight.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastRetryStrategy;

impl RetryStrategy for FailFastRetryStrategy {
    fn permits(&self, _reason: RetryReason) -> bool {
        false
    }
}

/// Retries only the reasons accepted by a predicate.
///
/// # Example
///
/// ```rust,ignore
/// let locks_only = ReasonFilter::new(|reason| reason == RetryReason::DocumentLocked);
/// let options = RequestOptions::new(ServiceClass::KeyValue)
///     .with_retry_strategy(Arc::new(locks_only));
/// ```
#[derive(Clone, Copy)]
pub struct ReasonFilter {
    predicate: fn(RetryReason) -> bool,
}

impl ReasonFilter {
    /// Creates a filter from a predicate.
    pub const fn new(predicate: fn(RetryReason) -> bool) -> Self {
        Self { predicate }
    }
}

impl fmt::Debug for ReasonFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasonFilter").finish_non_exhaustive()
    }
}

impl RetryStrategy for ReasonFilter {
    fn permits(&self, reason: RetryReason) -> bool {
        (self.predicate)(reason)
    }
}

/// Turns a retry reason into a decision and keeps the context's bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    backoff: BackoffConfig,
}

impl RetryOrchestrator {
    /// Creates an orchestrator with the given backoff schedule.
    pub const fn new(backoff: BackoffConfig) -> Self {
        Self { backoff }
    }

    /// The backoff schedule in use.
    pub const fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Decide whether `ctx` retries because of `reason`.
    ///
    /// A strategy veto fails immediately regardless of remaining budget and
    /// leaves the bookkeeping untouched. Otherwise the reason is recorded, the
    /// retry count incremented, and a backoff no longer than the remaining
    /// budget returned.
    pub fn maybe_retry<Req>(&self, ctx: &mut RequestContext<Req>, reason: RetryReason) -> RetryDecision {
        if !ctx.retry_strategy().permits(reason) {
            debug!(
                operation_id = %ctx.operation_id(),
                %reason,
                strategy = ?ctx.retry_strategy(),
                "retry strategy declined retry"
            );
            return RetryDecision::Fail(ctx.fail(ErrorKind::Generic {
                message: format!("request not retried ({reason})"),
            }));
        }

        let after = self.backoff_for(ctx.retry_count()).min(ctx.remaining());
        ctx.record_retry(reason);
        debug!(
            operation_id = %ctx.operation_id(),
            %reason,
            retry_count = ctx.retry_count(),
            backoff = ?after,
            "scheduling retry"
        );
        RetryDecision::Retry { after }
    }

    /// Backoff before retry number `retry_count + 1`, before deadline capping.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let min_ms: u64 = self.backoff.min.into();
        if min_ms == 0 {
            return Duration::ZERO;
        }
        let max = self.backoff.max.as_duration();
        let factor: f64 = self.backoff.factor.into();

        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let scaled = Duration::from_millis(min_ms).as_secs_f64() * factor.powi(exponent);
        let delay = if scaled < max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            max
        };

        if self.backoff.jitter && !delay.is_zero() {
            let upper = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
            Duration::from_micros(rand::rng().random_range(0..=upper))
        } else {
            delay
        }
    }
}
