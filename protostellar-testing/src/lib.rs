//! Test support for the `protostellar` request executor.
//!
//! - [`scripted`]: in-memory invokers that replay canned outcomes and record
//!   every attempt they see.
//! - [`chaos`]: a wrapper injecting `UNAVAILABLE` failures into any invoker.
//! - [`status`]: builders for statuses carrying structured error details.

#![forbid(unsafe_code, unreachable_pub)]
#![deny(
    bad_style,
    clippy::allow_attributes,
    rust_2018_idioms,
    unused_imports,
    unused_must_use,
    unused_qualifications
)]

pub mod chaos;
pub mod scripted;
pub mod status;

pub use chaos::*;
pub use scripted::*;
pub use status::*;
