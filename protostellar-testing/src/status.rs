//! Builders for failed statuses carrying structured error details.
//!
//! # Example
//!
//! ```ignore
//! let status = StatusBuilder::new(Code::NotFound)
//!     .message("document not found")
//!     .resource_info("document", "airline_10")
//!     .build();
//! ```

use bytes::Bytes;
use prost::Message;
use prost_types::Any;
use protostellar::details::{
    proto, ERROR_INFO_TYPE_URL, PRECONDITION_FAILURE_TYPE_URL, RESOURCE_INFO_TYPE_URL,
};
use tonic::{Code, Status};

/// Builds a [`Status`] with an encoded `google.rpc.Status` details payload.
#[derive(Debug, Clone)]
pub struct StatusBuilder {
    code: Code,
    message: String,
    details: Vec<Any>,
    raw: Option<Bytes>,
}

impl StatusBuilder {
    /// Starts a status with `code` and an empty message.
    pub const fn new(code: Code) -> Self {
        Self {
            code,
            message: String::new(),
            details: Vec::new(),
            raw: None,
        }
    }

    /// Sets the human-readable status message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Appends a precondition-failure detail with one violation per type.
    #[must_use]
    pub fn precondition_failure<'a>(self, violations: impl IntoIterator<Item = &'a str>) -> Self {
        let failure = proto::PreconditionFailure {
            violations: violations
                .into_iter()
                .map(|kind| proto::PreconditionViolation {
                    r#type: kind.to_string(),
                    ..Default::default()
                })
                .collect(),
        };
        self.detail(PRECONDITION_FAILURE_TYPE_URL, failure.encode_to_vec())
    }

    /// Appends a resource-info detail.
    #[must_use]
    pub fn resource_info(self, resource_type: &str, resource_name: &str) -> Self {
        let info = proto::ResourceInfo {
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            ..Default::default()
        };
        self.detail(RESOURCE_INFO_TYPE_URL, info.encode_to_vec())
    }

    /// Appends an error-info detail.
    #[must_use]
    pub fn error_info(self, reason: &str, domain: &str) -> Self {
        let info = proto::ErrorInfo {
            reason: reason.to_string(),
            domain: domain.to_string(),
            ..Default::default()
        };
        self.detail(ERROR_INFO_TYPE_URL, info.encode_to_vec())
    }

    /// Appends a detail of a type the classifier does not know.
    #[must_use]
    pub fn unknown_detail(self, type_url: &str) -> Self {
        self.detail(type_url, Vec::new())
    }

    /// Replaces the details payload with bytes that do not decode.
    #[must_use]
    pub fn corrupt(mut self) -> Self {
        self.raw = Some(Bytes::from_static(&[0xff, 0xff, 0xff]));
        self
    }

    fn detail(mut self, type_url: &str, value: Vec<u8>) -> Self {
        self.details.push(Any {
            type_url: type_url.to_string(),
            value,
        });
        self
    }

    /// Builds the status.
    pub fn build(self) -> Status {
        if let Some(raw) = self.raw {
            return Status::with_details(self.code, self.message, raw);
        }
        if self.details.is_empty() {
            return Status::new(self.code, self.message);
        }

        let envelope = proto::RpcStatus {
            code: i32::from(self.code),
            message: self.message.clone(),
            details: self.details,
        };
        Status::with_details(self.code, self.message, envelope.encode_to_vec().into())
    }
}
