//! Error types for the pidone bootstrap supervisor.
//!
//! Two layers, matching the two failure classes of the bootstrap:
//!
//! - [`SupervisorError`] - per-operation errors (spawn, terminate, capture,
//!   state transitions). These are recoverable or retriable at the
//!   supervision layer.
//! - [`BootstrapError`] - fatal outcomes that end the bootstrap: a blocking
//!   prerequisite exited non-zero, or a background service died and the
//!   restart policy gave up. These carry the process exit code reported to
//!   the container runtime.

use crate::types::ServiceName;
use thiserror::Error;

/// Result type alias for supervision operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Result type alias for bootstrap outcomes.
pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;

/// Per-operation error type for process supervision.
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    #[error("Step not found: {name}")]
    NotFound { name: String },

    #[error("Spawn failed: {name} - {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Stop failed: {name} - {reason}")]
    StopFailed { name: String, reason: String },

    #[error("Invalid state for {name}: expected {expected}, got {actual}")]
    InvalidState {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {name} - {reason}")]
    Configuration { name: String, reason: String },

    #[error("Output capture error: {name} - {reason}")]
    Capture { name: String, reason: String },
}

impl SupervisorError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn spawn_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn capture(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capture {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal bootstrap outcome, reported to the container runtime as the
/// supervisor's own exit code.
#[derive(Error, Debug, Clone)]
pub enum BootstrapError {
    /// A blocking prerequisite step exited non-zero (or could not be
    /// spawned). No dependent step runs after this.
    #[error("Prerequisite step '{name}' failed (exit code {exit_code:?})")]
    PrerequisiteFailed {
        name: ServiceName,
        exit_code: Option<i32>,
    },

    /// A background service died and the restart policy is exhausted or
    /// forbids restart.
    #[error("Background service '{name}' failed (exit code {exit_code:?})")]
    ServiceFailed {
        name: ServiceName,
        exit_code: Option<i32>,
    },

    /// A supervision operation failed in a way the bootstrap cannot recover
    /// from (e.g. a log sink could not be created).
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

impl BootstrapError {
    /// Exit code the supervisor process reports for this failure.
    ///
    /// Prerequisite failures propagate the child's own exit code when one
    /// exists; everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PrerequisiteFailed { exit_code, .. } => match exit_code {
                Some(code) if *code != 0 => *code,
                _ => 1,
            },
            Self::ServiceFailed { .. } | Self::Supervisor(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_construction() {
        let err = SupervisorError::spawn_failed("novnc", "executable not found");
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
        assert!(format!("{}", err).contains("Spawn failed"));
    }

    #[test]
    fn test_prerequisite_exit_code_propagates() {
        let err = BootstrapError::PrerequisiteFailed {
            name: ServiceName::from("setup"),
            exit_code: Some(3),
        };
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_prerequisite_exit_code_defaults_to_one() {
        let err = BootstrapError::PrerequisiteFailed {
            name: ServiceName::from("setup"),
            exit_code: None,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_service_failure_exit_code() {
        let err = BootstrapError::ServiceFailed {
            name: ServiceName::from("novnc"),
            exit_code: Some(137),
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = BootstrapError::PrerequisiteFailed {
            name: ServiceName::from("setup"),
            exit_code: Some(1),
        };
        match err {
            BootstrapError::PrerequisiteFailed { name, .. } => {
                assert_eq!(name.as_str(), "setup");
            }
            _ => panic!("Wrong error type"),
        }
    }
}
