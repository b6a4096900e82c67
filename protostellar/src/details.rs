//! Structured error details attached to failed RPC statuses.
//!
//! A failed status may carry a binary-encoded `google.rpc.Status` whose
//! `details` list holds `Any`-wrapped detail messages. Only the first detail is
//! honored. It is decoded into the closed [`ErrorDetail`] union, with
//! [`ErrorDetail::Unknown`] for shapes this client does not understand.

use std::collections::BTreeMap;

use prost::Message;
use thiserror::Error;
use tracing::trace;

/// Type URL of `google.rpc.PreconditionFailure`.
pub const PRECONDITION_FAILURE_TYPE_URL: &str = "type.googleapis.com/google.rpc.PreconditionFailure";
/// Type URL of `google.rpc.ResourceInfo`.
pub const RESOURCE_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.ResourceInfo";
/// Type URL of `google.rpc.ErrorInfo`.
pub const ERROR_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.ErrorInfo";

/// Wire messages of the `google.rpc` error model.
pub mod proto {
    use std::collections::HashMap;

    /// `google.rpc.Status`: the envelope carried in a status' binary details.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct RpcStatus {
        /// Status code.
        #[prost(int32, tag = "1")]
        pub code: i32,
        /// Developer-facing message.
        #[prost(string, tag = "2")]
        pub message: String,
        /// Detail messages.
        #[prost(message, repeated, tag = "3")]
        pub details: Vec<prost_types::Any>,
    }

    /// `google.rpc.PreconditionFailure`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PreconditionFailure {
        /// Failed preconditions.
        #[prost(message, repeated, tag = "1")]
        pub violations: Vec<PreconditionViolation>,
    }

    /// `google.rpc.PreconditionFailure.Violation`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PreconditionViolation {
        /// Violation type, e.g. `LOCKED`.
        #[prost(string, tag = "1")]
        pub r#type: String,
        /// Subject the precondition applied to.
        #[prost(string, tag = "2")]
        pub subject: String,
        /// Human-readable description.
        #[prost(string, tag = "3")]
        pub description: String,
    }

    /// `google.rpc.ResourceInfo`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ResourceInfo {
        /// Resource type, e.g. `document`.
        #[prost(string, tag = "1")]
        pub resource_type: String,
        /// Resource name.
        #[prost(string, tag = "2")]
        pub resource_name: String,
        /// Owner of the resource.
        #[prost(string, tag = "3")]
        pub owner: String,
        /// Human-readable description.
        #[prost(string, tag = "4")]
        pub description: String,
    }

    /// `google.rpc.ErrorInfo`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ErrorInfo {
        /// Machine-readable reason, e.g. `CAS_MISMATCH`.
        #[prost(string, tag = "1")]
        pub reason: String,
        /// Domain that produced the reason.
        #[prost(string, tag = "2")]
        pub domain: String,
        /// Additional structured metadata.
        #[prost(map = "string, string", tag = "3")]
        pub metadata: HashMap<String, String>,
    }
}

/// The first structured detail of a failed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    /// One or more preconditions failed; holds the violation types in order.
    PreconditionFailure {
        /// Violation types, e.g. `LOCKED`.
        violations: Vec<String>,
    },
    /// The failure concerns a named resource.
    ResourceInfo {
        /// Resource type as sent by the server.
        resource_type: String,
        /// Resource name.
        resource_name: String,
    },
    /// A machine-readable reason for the failure.
    ErrorInfo {
        /// Reason, e.g. `CAS_MISMATCH`.
        reason: String,
        /// Domain that produced the reason.
        domain: String,
        /// Additional metadata, sorted by key.
        metadata: BTreeMap<String, String>,
    },
    /// A detail shape this client does not decode.
    Unknown {
        /// Type URL of the detail.
        type_url: String,
    },
}

/// Failure to decode a detail payload.
#[derive(Debug, Error)]
pub enum DetailDecodeError {
    /// The `google.rpc.Status` envelope was corrupt.
    #[error("malformed status envelope: {0}")]
    Envelope(#[source] prost::DecodeError),

    /// A detail message was corrupt.
    #[error("malformed {type_url} detail: {source}")]
    Detail {
        /// Type URL of the corrupt detail.
        type_url: String,
        /// Underlying decode error.
        #[source]
        source: prost::DecodeError,
    },
}

/// Decodes the first structured detail of a status' binary details.
///
/// Returns `Ok(None)` when there is no payload or the envelope lists no
/// details.
pub fn decode_first_detail(payload: &[u8]) -> Result<Option<ErrorDetail>, DetailDecodeError> {
    if payload.is_empty() {
        return Ok(None);
    }

    let envelope = proto::RpcStatus::decode(payload).map_err(DetailDecodeError::Envelope)?;
    let Some(any) = envelope.details.into_iter().next() else {
        return Ok(None);
    };
    trace!(type_url = %any.type_url, "decoding structured error detail");

    let corrupt = |source| DetailDecodeError::Detail {
        type_url: any.type_url.clone(),
        source,
    };

    let detail = match any.type_url.as_str() {
        PRECONDITION_FAILURE_TYPE_URL => {
            let failure = proto::PreconditionFailure::decode(any.value.as_slice()).map_err(corrupt)?;
            ErrorDetail::PreconditionFailure {
                violations: failure
                    .violations
                    .into_iter()
                    .map(|violation| violation.r#type)
                    .collect(),
            }
        }
        RESOURCE_INFO_TYPE_URL => {
            let info = proto::ResourceInfo::decode(any.value.as_slice()).map_err(corrupt)?;
            ErrorDetail::ResourceInfo {
                resource_type: info.resource_type,
                resource_name: info.resource_name,
            }
        }
        ERROR_INFO_TYPE_URL => {
            let info = proto::ErrorInfo::decode(any.value.as_slice()).map_err(corrupt)?;
            ErrorDetail::ErrorInfo {
                reason: info.reason,
                domain: info.domain,
                metadata: info.metadata.into_iter().collect(),
            }
        }
        _ => ErrorDetail::Unknown {
            type_url: any.type_url.clone(),
        },
    };

    Ok(Some(detail))
}
