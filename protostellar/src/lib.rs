//! `Protostellar` - deadline-bounded request execution for a gRPC document database
//!
//! Every operation gets one absolute deadline, fixed when its
//! [`RequestContext`] is created and shared by all of its attempts. Failed
//! attempts are classified from their status code and first structured error
//! detail into either a retry (document locked, node unavailable) or a typed
//! [`ProtostellarError`]. Timeouts of idempotent operations are unambiguous;
//! timeouts of anything else are ambiguous because the server may have
//! applied the mutation.
//!
//! The entry point is [`RequestExecutor`]:
//!
//! ```rust,ignore
//! use protostellar::{ExecutorConfig, RequestExecutor, RequestOptions, ServiceClass};
//!
//! let executor = RequestExecutor::new(ExecutorConfig::default());
//! let mut ctx = executor.context(
//!     request,
//!     RequestOptions::new(ServiceClass::KeyValue).with_idempotent(true),
//! );
//! let response = executor.run_unary(&mut ctx, &invoker).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod context;
pub mod details;
pub mod errors;
pub mod executor;
pub mod retry;
pub mod timeout;

pub use classify::{code_name, is_transport_deadline, ErrorClassifier, TRANSPORT_DEADLINE_MESSAGES};
pub use config::{
    BackoffConfig, BackoffFactor, BackoffMaxMs, BackoffMinMs, ConfigError, ExecutorConfig,
    TimeoutConfig, TimeoutMs,
};
pub use context::{DiagnosticContext, DiagnosticValue, RequestContext, RequestOptions};
pub use details::{decode_first_detail, DetailDecodeError, ErrorDetail};
pub use errors::{ErrorKind, ProtostellarError, ProtostellarResult, ResourceType};
pub use executor::{RequestExecutor, ResponseStream, StreamingRpc, UnaryRpc};
pub use retry::{
    BestEffortRetryStrategy, FailFastRetryStrategy, ReasonFilter, RetryDecision,
    RetryOrchestrator, RetryReason, RetryStrategy,
};
pub use timeout::{ServiceClass, TimeoutResolver};
