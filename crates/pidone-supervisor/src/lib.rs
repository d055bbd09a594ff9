//! # pidone-supervisor
//!
//! The bootstrap supervisor itself: loads a declarative plan, runs blocking
//! prerequisite steps to completion in order, launches background services
//! with per-service output capture, then supervises them for the lifetime of
//! the container (restart with backoff, escalation on exhausted policies,
//! signal-triggered shutdown).

pub mod config;
pub mod lifecycle;
pub mod service;
pub mod supervisor;

pub use config::{BootstrapConfig, RestartConfig, RestartStrategy, StepConfig, StepKind};
pub use service::{ServiceExit, ServiceStatus};
pub use supervisor::Supervisor;
