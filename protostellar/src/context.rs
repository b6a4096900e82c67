//! Per-operation request state.
//!
//! A [`RequestContext`] is created once per logical operation, owned by the
//! executor loop running that operation, and dropped when the call returns.
//! It is never pooled, cloned into another operation, or shared between
//! concurrent loops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::{ErrorKind, ProtostellarError};
use crate::retry::{BestEffortRetryStrategy, RetryReason, RetryStrategy};
use crate::timeout::ServiceClass;

/// A single value in the diagnostic context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DiagnosticValue {
    /// A single string.
    Text(String),
    /// A list of strings.
    List(Vec<String>),
}

impl From<&str> for DiagnosticValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for DiagnosticValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for DiagnosticValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Ordered, append-only diagnostic context.
///
/// Entries are never removed. A key keeps the position of its first insertion;
/// writing the same key again replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    entries: Vec<(String, DiagnosticValue)>,
}

impl DiagnosticContext {
    /// Creates an empty context.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records `value` under `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<DiagnosticValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up the value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&DiagnosticValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiagnosticValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for DiagnosticContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// Caller-supplied options for one operation.
///
/// # Example
///
/// ```rust,ignore
/// let options = RequestOptions::new(ServiceClass::KeyValue)
///     .with_idempotent(true)
///     .with_timeout(Duration::from_secs(1))
///     .with_context("documentId", "airline_10");
/// let mut ctx = executor.context(get_request, options);
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    service: ServiceClass,
    timeout: Option<Duration>,
    idempotent: bool,
    durable: bool,
    retry_strategy: Arc<dyn RetryStrategy>,
    context: DiagnosticContext,
}

impl RequestOptions {
    /// Options for a non-idempotent, non-durable call with the best-effort strategy.
    pub fn new(service: ServiceClass) -> Self {
        Self {
            service,
            timeout: None,
            idempotent: false,
            durable: false,
            retry_strategy: Arc::new(BestEffortRetryStrategy),
            context: DiagnosticContext::new(),
        }
    }

    /// Overrides the service default timeout for this call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the operation as idempotent (reads and well-known safe writes).
    #[must_use]
    pub const fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Marks the operation as a write with a durability requirement.
    #[must_use]
    pub const fn with_durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Replaces the retry strategy.
    #[must_use]
    pub fn with_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Seeds the diagnostic context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<DiagnosticValue>) -> Self {
        self.context.append(key, value);
        self
    }

    /// The service class of the operation.
    pub const fn service(&self) -> ServiceClass {
        self.service
    }

    /// The explicit per-call timeout, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the operation is idempotent.
    pub const fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Whether the operation is a durable write.
    pub const fn is_durable(&self) -> bool {
        self.durable
    }
}

/// Mutable state of one logical operation across all of its attempts.
#[derive(Debug)]
pub struct RequestContext<Req> {
    operation_id: Uuid,
    service: ServiceClass,
    idempotent: bool,
    retry_strategy: Arc<dyn RetryStrategy>,
    retry_count: u32,
    retry_reasons: Vec<RetryReason>,
    deadline: Instant,
    request: Req,
    diagnostics: DiagnosticContext,
    attempt: DiagnosticContext,
}

impl<Req> RequestContext<Req> {
    /// Creates a context whose absolute deadline is fixed at `deadline`.
    pub fn new(request: Req, options: RequestOptions, deadline: Instant) -> Self {
        let operation_id = Uuid::now_v7();
        let mut diagnostics = options.context;
        diagnostics.append("operationId", operation_id.to_string());

        Self {
            operation_id,
            service: options.service,
            idempotent: options.idempotent,
            retry_strategy: options.retry_strategy,
            retry_count: 0,
            retry_reasons: Vec::new(),
            deadline,
            request,
            diagnostics,
            attempt: DiagnosticContext::new(),
        }
    }

    /// Creates a context whose deadline is `budget` from now.
    pub fn with_budget(request: Req, options: RequestOptions, budget: Duration) -> Self {
        Self::new(request, options, deadline_after(budget))
    }

    /// Identifier of this operation, used in logs and diagnostics.
    pub const fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Service class the operation targets.
    pub const fn service(&self) -> ServiceClass {
        self.service
    }

    /// Whether the operation is idempotent.
    pub const fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// The retry strategy consulted before every retry.
    pub fn retry_strategy(&self) -> &dyn RetryStrategy {
        self.retry_strategy.as_ref()
    }

    /// Number of retry decisions made so far.
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// One-based number of the attempt about to start.
    pub const fn attempt(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Distinct retry reasons recorded so far, in first-seen order.
    pub fn retry_reasons(&self) -> &[RetryReason] {
        &self.retry_reasons
    }

    /// The absolute deadline shared by every attempt.
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Budget left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once no further attempt may start.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The wire request sent on every attempt.
    pub const fn request(&self) -> &Req {
        &self.request
    }

    /// Diagnostic context of the operation: caller entries and the operation id.
    pub const fn diagnostics(&self) -> &DiagnosticContext {
        &self.diagnostics
    }

    /// Diagnostics of the most recently classified attempt.
    ///
    /// Empty until an attempt fails; cleared whenever a new attempt starts.
    pub const fn attempt_diagnostics(&self) -> &DiagnosticContext {
        &self.attempt
    }

    /// Adds an entry to the operation's diagnostic context.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<DiagnosticValue>) {
        self.diagnostics.append(key, value);
    }

    /// Adds an entry describing the current attempt.
    pub fn annotate_attempt(&mut self, key: impl Into<String>, value: impl Into<DiagnosticValue>) {
        self.attempt.append(key, value);
    }

    /// Forgets what the previous attempt recorded.
    pub(crate) fn begin_attempt(&mut self) {
        self.attempt = DiagnosticContext::new();
    }

    /// Builds a terminal error of `kind` carrying this context.
    pub fn fail(&self, kind: ErrorKind) -> ProtostellarError {
        ProtostellarError::new(
            kind,
            self.snapshot(),
            self.retry_count,
            self.retry_reasons.clone(),
        )
    }

    /// Builds the deadline error for this operation.
    ///
    /// Idempotent operations time out unambiguously; anything else may have
    /// been applied and times out ambiguously.
    pub fn timeout_error(&self) -> ProtostellarError {
        let kind = if self.idempotent {
            ErrorKind::UnambiguousTimeout
        } else {
            ErrorKind::AmbiguousTimeout
        };
        self.fail(kind)
    }

    /// Builds a decoding failure for a response that could not be converted.
    pub fn decoding_failure(&self, detail: impl fmt::Display) -> ProtostellarError {
        let mut diagnostics = self.snapshot();
        diagnostics.append("decodingError", detail.to_string());
        ProtostellarError::new(
            ErrorKind::DecodingFailure,
            diagnostics,
            self.retry_count,
            self.retry_reasons.clone(),
        )
    }

    fn snapshot(&self) -> DiagnosticContext {
        let mut snapshot = self.diagnostics.clone();
        for (key, value) in self.attempt.iter() {
            snapshot.append(key, value.clone());
        }
        snapshot
    }

    pub(crate) fn record_retry(&mut self, reason: RetryReason) {
        self.retry_count = self.retry_count.saturating_add(1);
        if !self.retry_reasons.contains(&reason) {
            self.retry_reasons.push(reason);
        }
    }
}

/// Absolute deadline `budget` from now, saturating far in the future.
pub(crate) fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FailFastRetryStrategy;

    fn context(idempotent: bool) -> RequestContext<&'static str> {
        RequestContext::with_budget(
            "get airline_10",
            RequestOptions::new(ServiceClass::KeyValue).with_idempotent(idempotent),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn diagnostic_context_keeps_insertion_order() {
        let mut diagnostics = DiagnosticContext::new();
        diagnostics.append("b", "1");
        diagnostics.append("a", vec!["x".to_string(), "y".to_string()]);
        diagnostics.append("b", "2");

        let keys: Vec<_> = diagnostics.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(diagnostics.get("b"), Some(&DiagnosticValue::from("2")));
        assert_eq!(diagnostics.to_string(), r#"{"b":"2","a":["x","y"]}"#);
    }

    #[test]
    fn options_seed_the_diagnostic_context() {
        let ctx = RequestContext::with_budget(
            (),
            RequestOptions::new(ServiceClass::KeyValue).with_context("documentId", "airline_10"),
            Duration::from_secs(1),
        );

        let keys: Vec<_> = ctx.diagnostics().iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["documentId", "operationId"]);
        assert_eq!(
            ctx.diagnostics().get("operationId"),
            Some(&DiagnosticValue::Text(ctx.operation_id().to_string()))
        );
    }

    #[test]
    fn record_retry_counts_every_retry_but_each_reason_once() {
        let mut ctx = context(true);
        ctx.record_retry(RetryReason::DocumentLocked);
        ctx.record_retry(RetryReason::NodeUnavailable);
        ctx.record_retry(RetryReason::DocumentLocked);

        assert_eq!(ctx.retry_count(), 3);
        assert_eq!(
            ctx.retry_reasons(),
            [RetryReason::DocumentLocked, RetryReason::NodeUnavailable]
        );
    }

    #[test]
    fn timeout_error_depends_on_idempotency() {
        assert_eq!(
            context(true).timeout_error().kind(),
            &ErrorKind::UnambiguousTimeout
        );
        assert_eq!(
            context(false).timeout_error().kind(),
            &ErrorKind::AmbiguousTimeout
        );
    }

    #[test]
    fn fail_snapshots_context_and_bookkeeping() {
        let mut ctx = context(false);
        ctx.annotate("serverMessage", "locked");
        ctx.record_retry(RetryReason::DocumentLocked);

        let error = ctx.fail(ErrorKind::CasMismatch);
        assert_eq!(error.context(), ctx.diagnostics());
        assert_eq!(error.retry_count(), 1);
        assert_eq!(error.retry_reasons(), [RetryReason::DocumentLocked]);
    }

    #[test]
    fn attempt_diagnostics_follow_operation_entries_and_reset() {
        let mut ctx = context(true);
        ctx.annotate("bucket", "travel-sample");
        ctx.annotate_attempt("statusCode", "UNAVAILABLE");
        ctx.annotate_attempt("serverMessage", "node restarting");

        let keys: Vec<_> = ctx
            .fail(ErrorKind::InternalServerFailure)
            .context()
            .iter()
            .map(|(key, _)| key.to_string())
            .collect();
        assert_eq!(keys, ["operationId", "bucket", "statusCode", "serverMessage"]);

        ctx.begin_attempt();
        assert!(ctx.attempt_diagnostics().is_empty());
        let error = ctx.fail(ErrorKind::InternalServerFailure);
        assert!(error.context().get("serverMessage").is_none());
        assert_eq!(error.context(), ctx.diagnostics());
    }

    #[test]
    fn attempt_number_saturates() {
        let mut ctx = context(true);
        assert_eq!(ctx.attempt(), 1);

        ctx.retry_count = u32::MAX;
        assert_eq!(ctx.attempt(), u32::MAX);
    }

    #[test]
    fn decoding_failure_adds_detail_without_touching_context() {
        let ctx = context(true);
        let error = ctx.decoding_failure("missing content");

        assert_eq!(error.kind(), &ErrorKind::DecodingFailure);
        assert_eq!(
            error.context().get("decodingError"),
            Some(&DiagnosticValue::from("missing content"))
        );
        assert!(ctx.diagnostics().get("decodingError").is_none());
    }

    #[test]
    fn deadline_is_in_the_future_and_fixed() {
        let ctx = context(true);
        assert!(!ctx.is_expired());
        assert!(ctx.remaining() <= Duration::from_secs(5));
        assert_eq!(ctx.deadline(), ctx.deadline());
    }

    #[test]
    fn custom_strategy_is_carried_into_the_context() {
        let ctx = RequestContext::with_budget(
            (),
            RequestOptions::new(ServiceClass::Query)
                .with_retry_strategy(Arc::new(FailFastRetryStrategy)),
            Duration::from_secs(1),
        );
        assert!(!ctx.retry_strategy().permits(RetryReason::NodeUnavailable));
    }
}
