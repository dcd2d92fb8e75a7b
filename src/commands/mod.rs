//! Typed wrappers for common SYS and UTIL commands.
//!
//! Each submodule defines the request/response records for its subsystem
//! and adds convenience methods to [`Client`](crate::Client).

pub mod sys;
pub mod util;

pub use sys::{Capabilities, PingResponse, ResetIndication, ResetRequest, ResetType, VersionResponse};
pub use util::{LedControlRequest, LedControlResponse};
