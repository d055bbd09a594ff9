//! Process termination primitives.

use pidone_common::{SupervisorError, SupervisorResult};

/// Terminate a process gracefully with SIGTERM.
pub fn terminate_gracefully(pid: u32) -> SupervisorResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| SupervisorError::stop_failed(pid.to_string(), e.to_string()))
}

/// Force kill a process with SIGKILL.
pub fn force_kill(pid: u32) -> SupervisorResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| SupervisorError::stop_failed(pid.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_nonexistent_process_fails() {
        // A PID this high should not exist
        let result = terminate_gracefully(9_999_999);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            SupervisorError::StopFailed { .. }
        ));
    }
}
