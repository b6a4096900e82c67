//! Classification of failed RPC attempts.
//!
//! Decision precedence, first match wins:
//!
//! 1. a transport-side deadline signal in the status message,
//! 2. the first structured error detail, when it maps to an outcome,
//! 3. the status code.
//!
//! Classification never fails: a corrupt detail payload becomes a generic
//! terminal error carrying the server message.

use tonic::{Code, Status};
use tracing::trace;

use crate::context::RequestContext;
use crate::details::{decode_first_detail, ErrorDetail};
use crate::errors::{ErrorKind, ResourceType};
use crate::retry::{RetryDecision, RetryOrchestrator, RetryReason};

/// Status messages produced by the transport itself when the per-attempt
/// deadline elapses, as opposed to a deadline reported by the server.
pub const TRANSPORT_DEADLINE_MESSAGES: [&str; 2] = ["Deadline Exceeded", "Timeout expired"];

/// Maps failed statuses to retry decisions.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    orchestrator: RetryOrchestrator,
}

impl ErrorClassifier {
    /// Creates a classifier that delegates retryable failures to `orchestrator`.
    pub const fn new(orchestrator: RetryOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// The orchestrator deciding retryable failures.
    pub const fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }

    /// Classify a failed attempt of `ctx`.
    ///
    /// Replaces the attempt diagnostics of `ctx` with the status code, the
    /// server message and any detail fields of this status.
    pub fn classify<Req>(&self, status: &Status, ctx: &mut RequestContext<Req>) -> RetryDecision {
        ctx.begin_attempt();
        ctx.annotate_attempt("statusCode", code_name(status.code()));
        ctx.annotate_attempt("serverMessage", server_message(status));

        if is_transport_deadline(status) {
            return RetryDecision::Fail(ctx.timeout_error());
        }

        match decode_first_detail(status.details()) {
            Ok(Some(detail)) => {
                if let Some(decision) = self.classify_detail(status.code(), detail, ctx) {
                    return decision;
                }
            }
            Ok(None) => {}
            Err(error) => {
                trace!(%error, "discarding undecodable error details");
                return RetryDecision::Fail(ctx.fail(ErrorKind::Generic {
                    message: server_message(status),
                }));
            }
        }

        self.classify_code(status, ctx)
    }

    fn classify_detail<Req>(
        &self,
        code: Code,
        detail: ErrorDetail,
        ctx: &mut RequestContext<Req>,
    ) -> Option<RetryDecision> {
        let kind = match detail {
            ErrorDetail::PreconditionFailure { violations } => {
                match violations.first()?.as_str() {
                    "LOCKED" => {
                        return Some(self.orchestrator.maybe_retry(ctx, RetryReason::DocumentLocked))
                    }
                    "VALUE_TOO_LARGE" => ErrorKind::ValueTooLarge,
                    "PATH_MISMATCH" => ErrorKind::PathMismatch,
                    "DOC_TOO_DEEP" => ErrorKind::DocumentTooDeep,
                    "DOC_NOT_JSON" => ErrorKind::DocumentNotJson,
                    "PATH_VALUE_OUT_OF_RANGE" => ErrorKind::NumberTooBig,
                    "VALUE_OUT_OF_RANGE" => ErrorKind::BadDelta,
                    _ => return None,
                }
            }
            ErrorDetail::ResourceInfo {
                resource_type,
                resource_name,
            } => {
                ctx.annotate_attempt("resourceName", resource_name);
                ctx.annotate_attempt("resourceType", resource_type.as_str());
                let resource = ResourceType::parse(&resource_type)?;
                match (code, resource) {
                    (Code::NotFound, resource) => ErrorKind::NotFound { resource },
                    (Code::AlreadyExists, resource) => ErrorKind::AlreadyExists { resource },
                    (Code::PermissionDenied, ResourceType::User) => ErrorKind::AuthenticationFailure,
                    (Code::PermissionDenied, _) => ErrorKind::PermissionDenied,
                    _ => return None,
                }
            }
            ErrorDetail::ErrorInfo { reason, domain, .. } => {
                ctx.annotate_attempt("errorReason", reason.as_str());
                if !domain.is_empty() {
                    ctx.annotate_attempt("errorDomain", domain);
                }
                if code == Code::Aborted && reason == "CAS_MISMATCH" {
                    ErrorKind::CasMismatch
                } else {
                    return None;
                }
            }
            ErrorDetail::Unknown { type_url } => {
                trace!(%type_url, "ignoring unknown error detail");
                return None;
            }
        };

        Some(RetryDecision::Fail(ctx.fail(kind)))
    }

    fn classify_code<Req>(&self, status: &Status, ctx: &mut RequestContext<Req>) -> RetryDecision {
        let kind = match status.code() {
            Code::Cancelled => ErrorKind::RequestCancelled,
            Code::Internal => ErrorKind::InternalServerFailure,
            Code::InvalidArgument => ErrorKind::InvalidArgument,
            // Server-observed: the mutation may have applied whatever the idempotency.
            Code::DeadlineExceeded => ErrorKind::AmbiguousTimeout,
            Code::Unimplemented => ErrorKind::FeatureNotAvailable,
            Code::Unauthenticated => ErrorKind::AuthenticationFailure,
            Code::Unavailable => {
                return self.orchestrator.maybe_retry(ctx, RetryReason::NodeUnavailable)
            }
            Code::Ok
            | Code::Unknown
            | Code::NotFound
            | Code::AlreadyExists
            | Code::PermissionDenied
            | Code::ResourceExhausted
            | Code::FailedPrecondition
            | Code::Aborted
            | Code::OutOfRange
            | Code::DataLoss => ErrorKind::Generic {
                message: server_message(status),
            },
        };

        RetryDecision::Fail(ctx.fail(kind))
    }
}

/// Returns true if the status reports a deadline elapsed inside the transport.
pub fn is_transport_deadline(status: &Status) -> bool {
    TRANSPORT_DEADLINE_MESSAGES
        .iter()
        .any(|message| status.message().eq_ignore_ascii_case(message))
}

/// Canonical upper-case name of a status code.
pub const fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
    }
}

fn server_message(status: &Status) -> String {
    if status.message().is_empty() {
        code_name(status.code()).to_string()
    } else {
        status.message().to_string()
    }
}
