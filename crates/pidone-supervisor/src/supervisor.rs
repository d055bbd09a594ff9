//! The bootstrap supervisor.
//!
//! One supervision loop owns every [`ManagedService`] record. Watcher and
//! relaunch-timer tasks never touch the records; they report over channels
//! and the loop reacts. Launch order is strictly the plan's declared order;
//! after launch, background children run concurrently and unordered.

use crate::config::{BootstrapConfig, StepKind};
use crate::service::{ManagedService, ServiceExit, ServiceStatus};
use pidone_capture::FileSink;
use pidone_common::{BootstrapError, BootstrapResult, ServiceName, SupervisorError, SupervisorResult};
use pidone_state::ServiceState;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum LoopEvent {
    Shutdown,
    Exited(ServiceExit),
    RelaunchDue(ServiceName),
}

/// Bootstrap supervisor: launches the plan and stays resident supervising
/// its children. Constructed once per container invocation.
pub struct Supervisor {
    config: BootstrapConfig,
    services: Vec<ManagedService>,
    exit_tx: mpsc::UnboundedSender<ServiceExit>,
    exit_rx: mpsc::UnboundedReceiver<ServiceExit>,
    relaunch_tx: mpsc::UnboundedSender<ServiceName>,
    relaunch_rx: mpsc::UnboundedReceiver<ServiceName>,
    shutdown: CancellationToken,
    capture_cancel: CancellationToken,
}

impl Supervisor {
    /// Build the service table from the plan. Creates the log sinks (and
    /// the log directory) up front so a bad log path fails the bootstrap
    /// before anything is launched.
    pub fn new(config: BootstrapConfig) -> SupervisorResult<Self> {
        let capture_cancel = CancellationToken::new();

        let mut services = Vec::with_capacity(config.steps.len());
        for step in &config.steps {
            let sink = Arc::new(FileSink::create(config.log_path_for(step))?);
            services.push(ManagedService::new(
                step.clone(),
                sink,
                capture_cancel.child_token(),
            ));
        }

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (relaunch_tx, relaunch_rx) = mpsc::unbounded_channel();

        info!(steps = services.len(), "Supervisor created");
        Ok(Self {
            config,
            services,
            exit_tx,
            exit_rx,
            relaunch_tx,
            relaunch_rx,
            shutdown: CancellationToken::new(),
            capture_cancel,
        })
    }

    /// Token that triggers an orderly shutdown when cancelled. The binary
    /// wires this to SIGTERM/SIGINT.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the plan's steps strictly in declared order.
    ///
    /// Prerequisites run to completion; a non-zero exit aborts immediately
    /// and nothing later runs. Services are spawned and left running; their
    /// launch never blocks this sequence beyond the spawn itself.
    pub async fn launch_sequence(&mut self) -> BootstrapResult<()> {
        let exit_tx = self.exit_tx.clone();

        for i in 0..self.services.len() {
            let name = self.services[i].name().clone();
            match self.services[i].kind() {
                StepKind::Prerequisite => {
                    let exit_code = match self.services[i].run_to_completion().await {
                        Ok(code) => code,
                        Err(e) => {
                            error!(step = %name, error = %e, "Prerequisite could not be run");
                            return Err(BootstrapError::PrerequisiteFailed {
                                name,
                                exit_code: None,
                            });
                        }
                    };
                    if exit_code != Some(0) {
                        return Err(BootstrapError::PrerequisiteFailed { name, exit_code });
                    }
                }
                StepKind::Service => {
                    if let Err(e) = self.services[i].launch(exit_tx.clone()).await {
                        error!(step = %name, error = %e, "Service failed to launch");
                        return Err(BootstrapError::ServiceFailed {
                            name,
                            exit_code: None,
                        });
                    }
                }
            }
        }

        let running = self
            .services
            .iter()
            .filter(|s| s.state().is_live())
            .count();
        info!(services = running, "Bootstrap launch sequence complete");
        Ok(())
    }

    /// Print the operator-facing announcement lines.
    pub fn announce(&self) {
        for line in &self.config.supervisor.announce {
            println!("{}", line);
        }
    }

    /// Stay resident supervising the children. Never returns under normal
    /// operation; returns only when a shutdown is requested (yielding the
    /// process exit code 0) or when a service failure escalates.
    pub async fn idle_forever(&mut self) -> BootstrapResult<i32> {
        info!("Supervisor resident, awaiting child exits and signals");
        let shutdown = self.shutdown.clone();

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => LoopEvent::Shutdown,
                Some(exit) = self.exit_rx.recv() => LoopEvent::Exited(exit),
                Some(name) = self.relaunch_rx.recv() => LoopEvent::RelaunchDue(name),
            };

            let outcome = match event {
                LoopEvent::Shutdown => {
                    info!("Shutdown requested");
                    self.shutdown_children().await;
                    return Ok(0);
                }
                LoopEvent::Exited(exit) => self.handle_exit(exit),
                LoopEvent::RelaunchDue(name) => self.handle_relaunch(name).await,
            };

            if let Err(e) = outcome {
                error!(error = %e, "Escalating: terminating remaining children");
                self.shutdown_children().await;
                return Err(e);
            }
        }
    }

    /// Per-service liveness table, keyed by step name.
    pub fn liveness(&self) -> BTreeMap<ServiceName, ServiceStatus> {
        self.services
            .iter()
            .map(|s| (s.name().clone(), s.status()))
            .collect()
    }

    /// Forward termination to all live children: SIGTERM, graceful wait,
    /// SIGKILL stragglers. Capture pumps drain naturally as streams close;
    /// the cancellation token is a backstop.
    pub async fn shutdown_children(&mut self) {
        let graceful_timeout = self.config.supervisor.graceful_timeout;
        info!("Shutting down supervised children");

        for svc in self.services.iter_mut() {
            if svc.state().is_live() {
                if let Err(e) = svc.terminate(graceful_timeout).await {
                    warn!(service = %svc.name(), error = %e, "Failed to terminate child");
                }
            }
        }

        self.capture_cancel.cancel();
    }

    fn service_mut(&mut self, name: &ServiceName) -> SupervisorResult<&mut ManagedService> {
        self.services
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| SupervisorError::not_found(name.as_str()))
    }

    /// React to an observed child exit: relaunch with backoff if the policy
    /// allows it, tolerate clean exits, escalate otherwise.
    fn handle_exit(&mut self, exit: ServiceExit) -> BootstrapResult<()> {
        let svc = self.service_mut(&exit.name)?;

        if !svc.state().is_live() {
            // Exit observed for a child we already terminated or re-decided
            debug!(service = %exit.name, "Ignoring exit for non-running service");
            return Ok(());
        }

        warn!(
            service = %exit.name,
            exit_code = ?exit.exit_code,
            "Background service exited unexpectedly"
        );

        match svc.decide_restart(exit.exit_code) {
            Some(delay) => {
                svc.mark_pending_restart(format!("exit code {:?}", exit.exit_code))?;
                self.schedule_relaunch(exit.name, delay);
                Ok(())
            }
            None if exit.exit_code == Some(0) => {
                svc.mark_exited("clean exit, no restart policy".to_string())?;
                info!(service = %exit.name, "Service finished cleanly, continuing without it");
                Ok(())
            }
            None => {
                svc.mark_failed(format!("exit code {:?}, restarts exhausted", exit.exit_code))?;
                Err(BootstrapError::ServiceFailed {
                    name: exit.name,
                    exit_code: exit.exit_code,
                })
            }
        }
    }

    /// A scheduled relaunch came due.
    async fn handle_relaunch(&mut self, name: ServiceName) -> BootstrapResult<()> {
        let exit_tx = self.exit_tx.clone();
        let svc = self.service_mut(&name)?;

        if svc.state() != ServiceState::PendingRestart {
            // Shutdown or escalation raced the timer
            debug!(service = %name, state = %svc.state(), "Skipping stale relaunch");
            return Ok(());
        }

        match svc.launch(exit_tx).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(service = %name, error = %e, "Relaunch spawn failed");
                // A failed spawn consumes a restart attempt like a crash
                match svc.decide_restart(None) {
                    Some(delay) => {
                        svc.mark_pending_restart(format!("spawn failed: {}", e))?;
                        self.schedule_relaunch(name, delay);
                        Ok(())
                    }
                    None => {
                        svc.mark_failed(format!("spawn failed: {}", e))?;
                        Err(BootstrapError::ServiceFailed {
                            name,
                            exit_code: None,
                        })
                    }
                }
            }
        }
    }

    fn schedule_relaunch(&self, name: ServiceName, delay: std::time::Duration) {
        let tx = self.relaunch_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(name);
        });
    }
}
