//! # pidone-common
//!
//! Shared domain types and error taxonomy for the pidone bootstrap
//! supervisor. Everything here is plain data: no I/O, no runtime.

pub mod errors;
pub mod types;

pub use errors::{BootstrapError, BootstrapResult, SupervisorError, SupervisorResult};
pub use types::ServiceName;
