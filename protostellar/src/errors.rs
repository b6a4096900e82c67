//! Error types for Protostellar request execution.
//!
//! Every operation run through the [`RequestExecutor`](crate::RequestExecutor)
//! ends in either a response or exactly one [`ProtostellarError`]. The error
//! couples an [`ErrorKind`] (what went wrong) with the diagnostic context the
//! request accumulated and the retry bookkeeping at the moment of failure.
//!
//! # Timeouts
//!
//! Timeouts come in two kinds and callers must treat them differently:
//!
//! - [`ErrorKind::UnambiguousTimeout`]: the operation was idempotent, so it is
//!   safe to report that it did not happen.
//! - [`ErrorKind::AmbiguousTimeout`]: the operation may or may not have been
//!   applied server-side. Mutations must be re-read before being retried by
//!   the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! match executor.run_unary(&mut ctx, &kv_get).await {
//!     Ok(response) => handle(response),
//!     Err(error) if error.is_ambiguous() => reconcile_and_retry(),
//!     Err(error) => match error.kind() {
//!         ErrorKind::NotFound { resource: ResourceType::Document } => create_it(),
//!         _ => return Err(error.into()),
//!     },
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::context::DiagnosticContext;
use crate::retry::RetryReason;

/// Kind of server resource named by a resource-info error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A key-value document.
    Document,
    /// A query or search index.
    Index,
    /// A bucket.
    Bucket,
    /// A scope within a bucket.
    Scope,
    /// A collection within a scope.
    Collection,
    /// A sub-document path inside a document.
    Path,
    /// A user account.
    User,
}

impl ResourceType {
    /// Parses the wire spelling used by the server (`"document"`, `"index"`, ...).
    ///
    /// Returns `None` for resource types this client does not know about.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document" => Some(Self::Document),
            "index" => Some(Self::Index),
            "bucket" => Some(Self::Bucket),
            "scope" => Some(Self::Scope),
            "collection" => Some(Self::Collection),
            "path" => Some(Self::Path),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    /// Wire spelling of the resource type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Index => "index",
            Self::Bucket => "bucket",
            Self::Scope => "scope",
            Self::Collection => "collection",
            Self::Path => "path",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal failure taxonomy.
///
/// Matched exhaustively by callers; never inferred from a type hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The named resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Which kind of resource was missing.
        resource: ResourceType,
    },

    /// The named resource already exists.
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Which kind of resource already existed.
        resource: ResourceType,
    },

    /// The credentials are valid but lack the required permission.
    #[error("permission denied")]
    PermissionDenied,

    /// The credentials were rejected.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// The supplied CAS did not match the document's current CAS.
    #[error("CAS mismatch")]
    CasMismatch,

    /// The server rejected an argument of the request.
    #[error("invalid argument")]
    InvalidArgument,

    /// The server does not implement the requested operation.
    #[error("feature not available")]
    FeatureNotAvailable,

    /// The server failed internally.
    #[error("internal server failure")]
    InternalServerFailure,

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    RequestCancelled,

    /// The deadline expired and the operation may have been applied.
    #[error("ambiguous timeout")]
    AmbiguousTimeout,

    /// The deadline expired and the operation is known not to have taken effect.
    #[error("unambiguous timeout")]
    UnambiguousTimeout,

    /// A successful response could not be converted into a result.
    #[error("decoding failure")]
    DecodingFailure,

    /// The value exceeds the server's document size limit.
    #[error("value too large")]
    ValueTooLarge,

    /// A sub-document path does not match the document structure.
    #[error("path mismatch")]
    PathMismatch,

    /// The document is nested deeper than the server allows.
    #[error("document too deep")]
    DocumentTooDeep,

    /// A sub-document operation targeted a document that is not JSON.
    #[error("document not JSON")]
    DocumentNotJson,

    /// The number stored at a sub-document path is out of range.
    #[error("number too big")]
    NumberTooBig,

    /// The counter delta is out of range.
    #[error("bad delta")]
    BadDelta,

    /// Any failure without a more specific kind.
    #[error("{message}")]
    Generic {
        /// Server message, or a description of the failure.
        message: String,
    },
}

impl ErrorKind {
    /// Returns true for either timeout kind.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::AmbiguousTimeout | Self::UnambiguousTimeout)
    }
}

/// A terminal failure of a Protostellar request.
///
/// Carries the diagnostic context and retry bookkeeping of the request that
/// produced it so operators can see what happened without reproducing it.
#[derive(Debug, Clone)]
pub struct ProtostellarError {
    kind: ErrorKind,
    context: DiagnosticContext,
    retry_count: u32,
    retry_reasons: Vec<RetryReason>,
}

impl ProtostellarError {
    /// Creates an error from its parts.
    pub const fn new(
        kind: ErrorKind,
        context: DiagnosticContext,
        retry_count: u32,
        retry_reasons: Vec<RetryReason>,
    ) -> Self {
        Self {
            kind,
            context,
            retry_count,
            retry_reasons,
        }
    }

    /// The failure kind.
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Diagnostic context accumulated by the request up to the failure.
    pub const fn context(&self) -> &DiagnosticContext {
        &self.context
    }

    /// Number of retries performed before the failure.
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Distinct reasons for the retries performed, in first-seen order.
    pub fn retry_reasons(&self) -> &[RetryReason] {
        &self.retry_reasons
    }

    /// Returns true for either timeout kind.
    pub const fn is_timeout(&self) -> bool {
        self.kind.is_timeout()
    }

    /// Returns true if the operation's effect is unknown.
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self.kind, ErrorKind::AmbiguousTimeout)
    }
}

impl fmt::Display for ProtostellarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.context.is_empty() {
            write!(f, " {}", self.context)?;
        }
        if self.retry_count > 0 {
            let reasons = self
                .retry_reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " (retried {} times: {reasons})", self.retry_count)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtostellarError {}

/// Result alias used throughout the crate.
pub type ProtostellarResult<T> = Result<T, ProtostellarError>;
