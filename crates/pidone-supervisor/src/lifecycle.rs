//! Restart policy evaluation for supervised services.
//!
//! Decides, on each unexpected child exit, whether the service may be
//! relaunched and after what delay. A circuit breaker guards against crash
//! loops that burn through restart attempts faster than the backoff grows.

use crate::config::{RestartConfig, RestartStrategy};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RESTART_DELAY: Duration = Duration::from_secs(300);

/// Circuit breaker to prevent restart loops.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    time_window: Duration,
    recent_failures: Vec<DateTime<Utc>>,
    is_tripped: bool,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            time_window: Duration::from_secs(60),
            recent_failures: Vec::new(),
            is_tripped: false,
        }
    }

    /// Record a failure; returns true if the breaker just tripped.
    pub fn record_failure(&mut self) -> bool {
        let now = Utc::now();
        self.recent_failures.push(now);

        let cutoff = now - chrono::Duration::from_std(self.time_window).unwrap_or_default();
        self.recent_failures.retain(|&t| t > cutoff);

        if self.recent_failures.len() >= self.failure_threshold as usize && !self.is_tripped {
            self.is_tripped = true;
            warn!(
                failures = self.recent_failures.len(),
                window = ?self.time_window,
                "Circuit breaker tripped"
            );
            return true;
        }

        false
    }

    pub fn is_tripped(&self) -> bool {
        self.is_tripped
    }

    pub fn reset(&mut self) {
        self.is_tripped = false;
        self.recent_failures.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks restart attempts and applies the restart policy for one service.
#[derive(Debug, Clone)]
pub struct ServiceLifecycle {
    name: String,
    policy: Option<RestartConfig>,
    attempts: u32,
    last_restart_time: Option<DateTime<Utc>>,
    breaker: CircuitBreaker,
}

impl ServiceLifecycle {
    pub fn new(name: String, policy: Option<RestartConfig>) -> Self {
        Self {
            name,
            policy,
            attempts: 0,
            last_restart_time: None,
            breaker: CircuitBreaker::new(),
        }
    }

    /// Decide whether to relaunch after an exit with the given code.
    ///
    /// Returns the backoff delay before the relaunch, or `None` when the
    /// policy forbids restart, attempts are exhausted, or the circuit
    /// breaker is tripped. Counts the attempt when a restart is granted.
    pub fn next_restart(&mut self, exit_code: Option<i32>) -> Option<Duration> {
        self.breaker.record_failure();
        if self.breaker.is_tripped() {
            warn!(service = %self.name, "Circuit breaker tripped, refusing restart");
            return None;
        }

        let policy = match &self.policy {
            Some(policy) => policy.clone(),
            None => {
                debug!(service = %self.name, "No restart policy configured");
                return None;
            }
        };

        match policy.strategy {
            RestartStrategy::Never => {
                debug!(service = %self.name, "Restart policy is 'never'");
                None
            }
            RestartStrategy::OnFailure if exit_code == Some(0) => {
                debug!(service = %self.name, "Service exited cleanly, not restarting");
                None
            }
            RestartStrategy::OnFailure | RestartStrategy::Always => self.grant_restart(&policy),
        }
    }

    fn grant_restart(&mut self, policy: &RestartConfig) -> Option<Duration> {
        if self.attempts >= policy.max_attempts {
            warn!(
                service = %self.name,
                attempts = self.attempts,
                max = policy.max_attempts,
                "Maximum restart attempts exceeded"
            );
            return None;
        }

        let delay = self.calculate_restart_delay(policy);
        self.attempts += 1;
        self.last_restart_time = Some(Utc::now());

        info!(
            service = %self.name,
            delay = ?delay,
            attempt = self.attempts,
            max = policy.max_attempts,
            "Restart scheduled"
        );

        Some(delay)
    }

    /// Exponential backoff, capped at five minutes.
    fn calculate_restart_delay(&self, policy: &RestartConfig) -> Duration {
        let multiplier = policy.backoff_multiplier.powf(self.attempts as f32);
        let delay_secs = policy.delay.as_secs_f64() * multiplier as f64;
        Duration::from_secs_f64(delay_secs.min(MAX_RESTART_DELAY.as_secs_f64()))
    }

    /// Reset attempt counters and the breaker (after a sustained healthy run).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.breaker.reset();
        debug!(service = %self.name, "Restart counters reset");
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> RestartConfig {
        RestartConfig {
            strategy: RestartStrategy::OnFailure,
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_restart_on_failure() {
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(test_policy()));

        assert!(lc.next_restart(Some(1)).is_some());
        assert_eq!(lc.attempts(), 1);

        // Clean exit under on_failure does not restart
        assert!(lc.next_restart(Some(0)).is_none());
    }

    #[test]
    fn test_no_policy_means_no_restart() {
        let mut lc = ServiceLifecycle::new("svc".to_string(), None);
        assert!(lc.next_restart(Some(1)).is_none());
    }

    #[test]
    fn test_never_strategy() {
        let policy = RestartConfig {
            strategy: RestartStrategy::Never,
            ..test_policy()
        };
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(policy));
        assert!(lc.next_restart(Some(1)).is_none());
    }

    #[test]
    fn test_always_strategy_restarts_on_clean_exit() {
        let policy = RestartConfig {
            strategy: RestartStrategy::Always,
            ..test_policy()
        };
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(policy));
        assert!(lc.next_restart(Some(0)).is_some());
    }

    #[test]
    fn test_max_attempts() {
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(test_policy()));

        for i in 1..=3 {
            assert!(lc.next_restart(Some(1)).is_some());
            assert_eq!(lc.attempts(), i);
        }
        assert!(lc.next_restart(Some(1)).is_none());
    }

    #[test]
    fn test_backoff_delays_grow() {
        let policy = test_policy();
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(policy.clone()));

        assert_eq!(lc.calculate_restart_delay(&policy), Duration::from_secs(1));
        lc.attempts = 1;
        assert_eq!(lc.calculate_restart_delay(&policy), Duration::from_secs(2));
        lc.attempts = 2;
        assert_eq!(lc.calculate_restart_delay(&policy), Duration::from_secs(4));
    }

    #[test]
    fn test_reset_restores_attempts() {
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(test_policy()));
        lc.next_restart(Some(1));
        lc.next_restart(Some(1));
        assert_eq!(lc.attempts(), 2);

        lc.reset();
        assert_eq!(lc.attempts(), 0);
        assert!(lc.next_restart(Some(1)).is_some());
    }

    #[test]
    fn test_circuit_breaker_trips_on_rapid_failures() {
        let policy = RestartConfig {
            max_attempts: 100,
            ..test_policy()
        };
        let mut lc = ServiceLifecycle::new("svc".to_string(), Some(policy));

        // Breaker threshold is 5 failures in 60s
        for _ in 0..4 {
            assert!(lc.next_restart(Some(1)).is_some());
        }
        assert!(lc.next_restart(Some(1)).is_none());
        assert!(lc.breaker.is_tripped());
    }
}
