//! Lifecycle state machine for bootstrap steps.
//!
//! Every step declared in the bootstrap plan owns one [`ServiceStateMachine`].
//! The machine enforces the legal lifecycle (`Pending -> Starting -> Running
//! -> Exited/Failed`, with `PendingRestart` for supervised relaunches) and
//! keeps a bounded transition history for diagnostics.

use chrono::{DateTime, Utc};
use pidone_common::{SupervisorError, SupervisorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 64;

/// Lifecycle state of a bootstrap step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Declared in the plan, not yet launched
    Pending,
    /// Spawn in progress
    Starting,
    /// Child process is alive
    Running,
    /// Child exited cleanly (terminal)
    Exited,
    /// Child failed and restarts are exhausted or forbidden (terminal)
    Failed,
    /// Child died; a supervised relaunch is scheduled
    PendingRestart,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Pending => write!(f, "pending"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Exited => write!(f, "exited"),
            ServiceState::Failed => write!(f, "failed"),
            ServiceState::PendingRestart => write!(f, "pending_restart"),
        }
    }
}

impl ServiceState {
    /// Check if the step is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Exited | ServiceState::Failed)
    }

    /// Check if the step has a live child process.
    pub fn is_live(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

/// Represents a state transition with timestamp and optional reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ServiceState,
    pub to_state: ServiceState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// State machine that manages transitions between step lifecycle states.
#[derive(Debug, Clone)]
pub struct ServiceStateMachine {
    name: String,
    current_state: ServiceState,
    previous_state: Option<ServiceState>,
    history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl ServiceStateMachine {
    /// Create a new state machine for a step.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            current_state: ServiceState::Pending,
            previous_state: None,
            history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// Get the current state.
    pub fn current_state(&self) -> ServiceState {
        self.current_state
    }

    /// Get the previous state.
    pub fn previous_state(&self) -> Option<ServiceState> {
        self.previous_state
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Get the time of the last state transition.
    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Check if a transition from the current state to the target is legal.
    pub fn is_valid_transition(&self, target: ServiceState) -> bool {
        match (self.current_state, target) {
            // From Pending
            (ServiceState::Pending, ServiceState::Starting) => true,
            (ServiceState::Pending, ServiceState::Failed) => true,

            // From Starting
            (ServiceState::Starting, ServiceState::Running) => true,
            (ServiceState::Starting, ServiceState::Exited) => true,
            (ServiceState::Starting, ServiceState::Failed) => true,
            (ServiceState::Starting, ServiceState::PendingRestart) => true,

            // From Running
            (ServiceState::Running, ServiceState::Exited) => true,
            (ServiceState::Running, ServiceState::Failed) => true,
            (ServiceState::Running, ServiceState::PendingRestart) => true,

            // From PendingRestart
            (ServiceState::PendingRestart, ServiceState::Starting) => true,
            (ServiceState::PendingRestart, ServiceState::Failed) => true,

            // Same state (no-op)
            (state, target) if state == target => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Transition to a new state with an optional reason.
    pub fn transition_to(
        &mut self,
        target: ServiceState,
        reason: Option<String>,
    ) -> SupervisorResult<()> {
        if !self.is_valid_transition(target) {
            return Err(SupervisorError::invalid_state(
                &self.name,
                format!("{:?}", target),
                format!("{:?}", self.current_state),
            ));
        }

        let now = Utc::now();
        self.history.push(StateTransition {
            from_state: self.current_state,
            to_state: target,
            timestamp: now,
            reason,
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        self.previous_state = Some(self.current_state);
        self.current_state = target;
        self.last_transition_time = now;

        tracing::debug!(
            step = %self.name,
            from = %self.previous_state.unwrap_or(ServiceState::Pending),
            to = %self.current_state,
            "State transition"
        );

        Ok(())
    }

    pub fn transition_to_starting(&mut self) -> SupervisorResult<()> {
        self.transition_to(ServiceState::Starting, Some("Launch requested".to_string()))
    }

    pub fn transition_to_running(&mut self) -> SupervisorResult<()> {
        self.transition_to(ServiceState::Running, Some("Child spawned".to_string()))
    }

    pub fn transition_to_exited(&mut self, reason: String) -> SupervisorResult<()> {
        self.transition_to(ServiceState::Exited, Some(reason))
    }

    pub fn transition_to_failed(&mut self, reason: String) -> SupervisorResult<()> {
        self.transition_to(ServiceState::Failed, Some(reason))
    }

    pub fn transition_to_pending_restart(&mut self, reason: String) -> SupervisorResult<()> {
        self.transition_to(ServiceState::PendingRestart, Some(reason))
    }

    /// Check if the step can be launched (fresh or relaunch).
    pub fn can_start(&self) -> bool {
        matches!(
            self.current_state,
            ServiceState::Pending | ServiceState::PendingRestart
        )
    }

    /// Time spent in the current state.
    pub fn time_in_current_state(&self) -> chrono::Duration {
        Utc::now() - self.last_transition_time
    }

    /// Count transitions into a specific state.
    pub fn count_transitions_to(&self, state: ServiceState) -> usize {
        self.history.iter().filter(|t| t.to_state == state).count()
    }
}
