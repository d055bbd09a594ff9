//! Managed bootstrap steps.
//!
//! A [`ManagedService`] is the supervisor-side record for one step of the
//! plan: its configuration, state machine, restart bookkeeping, log sink,
//! and (while running) the child's PID. The supervisor exclusively owns
//! every record for the container's lifetime.
//!
//! Spawned children get piped stdout/stderr drained by capture pumps, and a
//! watcher task that awaits the child and reports its exit over a channel.
//! The child handle itself lives inside the watcher, so termination is
//! PID-based.

use crate::config::{StepConfig, StepKind};
use crate::lifecycle::ServiceLifecycle;
use chrono::{DateTime, Utc};
use pidone_capture::{spawn_capture, CaptureCounters, LogSink, StreamKind};
use pidone_common::{ServiceName, SupervisorError, SupervisorResult};
use pidone_state::{ServiceState, ServiceStateMachine};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exit notification from a watcher task.
#[derive(Debug, Clone)]
pub struct ServiceExit {
    pub name: ServiceName,
    pub exit_code: Option<i32>,
}

/// Liveness snapshot for one step.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub lines_captured: i64,
    pub bytes_captured: i64,
}

/// Supervisor-side record for one bootstrap step.
pub struct ManagedService {
    step: StepConfig,
    name: ServiceName,
    state: ServiceStateMachine,
    lifecycle: ServiceLifecycle,
    sink: Arc<dyn LogSink>,
    counters: CaptureCounters,
    capture_cancel: CancellationToken,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    restart_count: u32,
}

impl ManagedService {
    pub fn new(step: StepConfig, sink: Arc<dyn LogSink>, capture_cancel: CancellationToken) -> Self {
        let name = ServiceName::from(step.name.clone());
        let lifecycle = ServiceLifecycle::new(step.name.clone(), step.restart.clone());
        Self {
            state: ServiceStateMachine::new(&step.name),
            step,
            name,
            lifecycle,
            sink,
            counters: CaptureCounters::new(),
            capture_cancel,
            pid: None,
            started_at: None,
            restart_count: 0,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn kind(&self) -> StepKind {
        self.step.kind
    }

    pub fn state(&self) -> ServiceState {
        self.state.current_state()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.state.current_state(),
            pid: self.pid,
            restart_count: self.restart_count,
            lines_captured: self.counters.lines(),
            bytes_captured: self.counters.bytes(),
        }
    }

    /// Launch a background service: spawn, attach capture, register the
    /// watcher, and return as soon as the child is up. Never waits for the
    /// child.
    pub async fn launch(
        &mut self,
        exit_tx: mpsc::UnboundedSender<ServiceExit>,
    ) -> SupervisorResult<()> {
        debug_assert_eq!(self.step.kind, StepKind::Service);
        let relaunch = self.state.current_state() == ServiceState::PendingRestart;
        self.state.transition_to_starting()?;

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                warn!(service = %self.name, error = %e, "Spawn failed");
                return Err(e);
            }
        };

        let _capture_tasks = self.attach_capture(&mut child);
        self.pid = child.id();
        self.started_at = Some(Utc::now());
        if relaunch {
            self.restart_count += 1;
        }

        // Watcher owns the child from here: it reaps the process and
        // reports the exit to the supervision loop.
        let name = self.name.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(service = %name, error = %e, "Failed to await child");
                    None
                }
            };
            debug!(service = %name, exit_code = ?exit_code, "Child exited");
            let _ = exit_tx.send(ServiceExit { name, exit_code });
        });

        self.state.transition_to_running()?;
        info!(
            service = %self.name,
            pid = ?self.pid,
            relaunch,
            "Background service launched"
        );
        Ok(())
    }

    /// Run a blocking prerequisite step to completion and return its exit
    /// code. Capture pumps are awaited before returning, so the sink holds
    /// the step's full output.
    pub async fn run_to_completion(&mut self) -> SupervisorResult<Option<i32>> {
        debug_assert_eq!(self.step.kind, StepKind::Prerequisite);
        self.state.transition_to_starting()?;

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                self.state.transition_to_failed(format!("spawn failed: {}", e))?;
                return Err(e);
            }
        };

        let capture_tasks = self.attach_capture(&mut child);
        self.pid = child.id();
        info!(service = %self.name, pid = ?self.pid, "Prerequisite step started");

        let status = child.wait().await.map_err(|e| {
            SupervisorError::spawn_failed(self.name.as_str(), format!("wait failed: {}", e))
        })?;

        for task in capture_tasks {
            let _ = task.await;
        }
        self.pid = None;

        let exit_code = status.code();
        if status.success() {
            self.state
                .transition_to_exited("prerequisite completed".to_string())?;
            info!(service = %self.name, "Prerequisite step completed");
        } else {
            self.state
                .transition_to_failed(format!("exit code {:?}", exit_code))?;
            warn!(service = %self.name, exit_code = ?exit_code, "Prerequisite step failed");
        }

        Ok(exit_code)
    }

    fn spawn_child(&self) -> SupervisorResult<Child> {
        let mut cmd = Command::new(&self.step.command);
        cmd.args(&self.step.args);

        if let Some(ref wd) = self.step.working_directory {
            cmd.current_dir(wd);
        }
        for (key, value) in &self.step.environment {
            cmd.env(key, value);
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        cmd.spawn()
            .map_err(|e| SupervisorError::spawn_failed(self.name.as_str(), e.to_string()))
    }

    fn attach_capture(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            tasks.push(spawn_capture(
                self.name.as_str(),
                stdout,
                StreamKind::Stdout,
                Arc::clone(&self.sink),
                self.counters.clone(),
                self.capture_cancel.child_token(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(spawn_capture(
                self.name.as_str(),
                stderr,
                StreamKind::Stderr,
                Arc::clone(&self.sink),
                self.counters.clone(),
                self.capture_cancel.child_token(),
            ));
        }

        tasks
    }

    /// Decide whether this service may be relaunched after an exit.
    pub fn decide_restart(&mut self, exit_code: Option<i32>) -> Option<Duration> {
        self.lifecycle.next_restart(exit_code)
    }

    pub fn mark_pending_restart(&mut self, reason: String) -> SupervisorResult<()> {
        self.pid = None;
        self.state.transition_to_pending_restart(reason)
    }

    pub fn mark_exited(&mut self, reason: String) -> SupervisorResult<()> {
        self.pid = None;
        self.state.transition_to_exited(reason)
    }

    pub fn mark_failed(&mut self, reason: String) -> SupervisorResult<()> {
        self.pid = None;
        self.state.transition_to_failed(reason)
    }

    /// Terminate a live child: SIGTERM, wait up to the graceful timeout,
    /// then SIGKILL. The watcher still reaps the child and reports the exit.
    pub async fn terminate(&mut self, graceful_timeout: Duration) -> SupervisorResult<()> {
        let pid = match self.pid {
            Some(pid) if self.state.current_state().is_live() => pid,
            _ => return Ok(()),
        };

        info!(service = %self.name, pid, "Terminating child");
        if let Err(e) = pidone_process::terminate_gracefully(pid) {
            warn!(service = %self.name, pid, error = %e, "Failed to send SIGTERM");
        }

        if wait_for_exit(pid, graceful_timeout).await {
            self.pid = None;
            self.state
                .transition_to_exited("terminated during shutdown".to_string())?;
            return Ok(());
        }

        warn!(service = %self.name, pid, "Graceful shutdown timed out, force killing");
        if let Err(e) = pidone_process::force_kill(pid) {
            warn!(service = %self.name, pid, error = %e, "Failed to send SIGKILL");
        }

        if wait_for_exit(pid, FORCE_KILL_TIMEOUT).await {
            self.pid = None;
            self.state
                .transition_to_exited("killed during shutdown".to_string())?;
            Ok(())
        } else {
            Err(SupervisorError::stop_failed(
                self.name.as_str(),
                format!("PID {} survived SIGKILL", pid),
            ))
        }
    }
}

/// Poll until the PID disappears from the process table or the timeout
/// elapses. The watcher task reaps the child, so a gone PID means a
/// confirmed exit.
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if matches!(pidone_process::process_exists(pid), Ok(false)) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartStrategy;
    use pidone_capture::MemorySink;
    use std::collections::HashMap;

    fn sh_step(name: &str, kind: StepKind, script: &str) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            kind,
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_directory: None,
            environment: HashMap::new(),
            log_file: None,
            restart: None,
        }
    }

    fn managed(step: StepConfig) -> (ManagedService, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let svc = ManagedService::new(step, sink.clone(), CancellationToken::new());
        (svc, sink)
    }

    #[tokio::test]
    async fn test_prerequisite_success_captures_output() {
        let (mut svc, sink) = managed(sh_step("setup", StepKind::Prerequisite, "echo setup-done"));

        let code = svc.run_to_completion().await.unwrap();
        assert_eq!(code, Some(0));
        assert_eq!(svc.state(), ServiceState::Exited);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (StreamKind::Stdout, "setup-done".to_string()));
    }

    #[tokio::test]
    async fn test_prerequisite_failure_reports_exit_code() {
        let (mut svc, _sink) = managed(sh_step("setup", StepKind::Prerequisite, "exit 3"));

        let code = svc.run_to_completion().await.unwrap();
        assert_eq!(code, Some(3));
        assert_eq!(svc.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_prerequisite_spawn_failure() {
        let mut step = sh_step("setup", StepKind::Prerequisite, "");
        step.command = "/nonexistent/binary".to_string();
        let (mut svc, _sink) = managed(step);

        let result = svc.run_to_completion().await;
        assert!(matches!(
            result,
            Err(SupervisorError::SpawnFailed { .. })
        ));
        assert_eq!(svc.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_launch_does_not_block_and_reports_exit() {
        let (mut svc, _sink) = managed(sh_step("svc", StepKind::Service, "sleep 2; exit 5"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let before = std::time::Instant::now();
        svc.launch(tx).await.unwrap();
        // Launch must return without waiting for the child
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(svc.state(), ServiceState::Running);
        assert!(svc.pid().is_some());

        let exit = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.name.as_str(), "svc");
        assert_eq!(exit.exit_code, Some(5));
    }

    #[tokio::test]
    async fn test_terminate_kills_child() {
        let (mut svc, _sink) = managed(sh_step("svc", StepKind::Service, "sleep 30"));
        let (tx, _rx) = mpsc::unbounded_channel();

        svc.launch(tx).await.unwrap();
        let pid = svc.pid().unwrap();
        assert!(pidone_process::process_exists(pid).unwrap());

        svc.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(svc.state(), ServiceState::Exited);
        assert!(!pidone_process::process_exists(pid).unwrap());
    }

    #[tokio::test]
    async fn test_relaunch_counts_restarts() {
        let mut step = sh_step("svc", StepKind::Service, "exit 1");
        step.restart = Some(crate::config::RestartConfig {
            strategy: RestartStrategy::OnFailure,
            max_attempts: 3,
            delay: Duration::from_millis(10),
            backoff_multiplier: 1.0,
        });
        let (mut svc, _sink) = managed(step);
        let (tx, mut rx) = mpsc::unbounded_channel();

        svc.launch(tx.clone()).await.unwrap();
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.exit_code, Some(1));

        assert!(svc.decide_restart(exit.exit_code).is_some());
        svc.mark_pending_restart("exit code 1".to_string()).unwrap();

        svc.launch(tx).await.unwrap();
        assert_eq!(svc.status().restart_count, 1);
    }
}
