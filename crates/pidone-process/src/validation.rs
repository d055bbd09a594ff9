//! Validation functions for bootstrap step configuration.

use pidone_common::{SupervisorError, SupervisorResult};

/// Validate a step name.
///
/// Names become log file names and liveness table keys, so they are
/// restricted to alphanumerics, hyphens, and underscores.
pub fn validate_step_name(name: &str) -> SupervisorResult<()> {
    if name.is_empty() {
        return Err(SupervisorError::configuration(
            "validation",
            "Step name cannot be empty",
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SupervisorError::configuration(
            name,
            "Step name can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// Validate a step command.
pub fn validate_command(name: &str, command: &str) -> SupervisorResult<()> {
    if command.is_empty() {
        return Err(SupervisorError::configuration(
            name,
            "Command cannot be empty",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_step_names() {
        assert!(validate_step_name("xorg-setup").is_ok());
        assert!(validate_step_name("http_server").is_ok());
        assert!(validate_step_name("novnc2").is_ok());
    }

    #[test]
    fn test_invalid_step_names() {
        assert!(validate_step_name("").is_err());
        assert!(validate_step_name("has space").is_err());
        assert!(validate_step_name("slash/name").is_err());
        assert!(validate_step_name("../escape").is_err());
    }

    #[test]
    fn test_command_validation() {
        assert!(validate_command("x", "/bin/sh").is_ok());
        assert!(validate_command("x", "").is_err());
    }
}
