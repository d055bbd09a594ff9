//! # pidone-process
//!
//! Low-level process primitives for the bootstrap supervisor:
//! - Process existence checking
//! - Graceful and forced termination
//! - Step configuration validation
//!
//! The supervisor is a container entry process, so these are Unix-only.

pub mod check;
pub mod terminate;
pub mod validation;

pub use check::*;
pub use terminate::*;
pub use validation::*;
