//! Process existence checking.
//!
//! The supervisor reaps its own children, so a PID observed here is either a
//! live child or an unrelated process; callers only use this to confirm that
//! a child it is waiting out has actually gone away.

use pidone_common::{SupervisorError, SupervisorResult};

/// Check if a process with the given PID exists and is running.
///
/// Uses `kill(pid, 0)`, which sends no signal but reports whether the
/// process exists.
///
/// # Returns
///
/// * `Ok(true)` - Process exists and is running
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - Error occurred while checking
pub fn process_exists(pid: u32) -> SupervisorResult<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        // Process exists but belongs to someone else
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(SupervisorError::configuration(
            pid.to_string(),
            format!("Failed to check process: {}", e),
        )),
    }
}
