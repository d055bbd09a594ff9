//! Bootstrap plan configuration.
//!
//! The plan is a YAML file: supervisor-wide options plus an ordered list of
//! steps. List order is launch order. Durations are written as strings like
//! `"500ms"`, `"10s"`, or `"2m"`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub supervisor: SupervisorOptions,
    pub steps: Vec<StepConfig>,
}

/// Supervisor-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorOptions {
    /// Directory for per-step log files. A step without an explicit
    /// `log_file` gets `<log_directory>/<name>.log`.
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// How long to wait after SIGTERM before force-killing a child during
    /// shutdown.
    #[serde(default = "default_graceful_timeout", with = "duration_serde")]
    pub graceful_timeout: Duration,

    /// Operator-facing lines printed once all services are launched
    /// (typically service URLs).
    #[serde(default)]
    pub announce: Vec<String>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            graceful_timeout: default_graceful_timeout(),
            announce: Vec::new(),
        }
    }
}

/// Kind of bootstrap step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Must complete successfully before later steps run.
    Prerequisite,
    /// Started asynchronously and left running for the container's lifetime.
    Service,
}

/// One step of the bootstrap plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub kind: StepKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Explicit log sink path; defaults to `<log_directory>/<name>.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Restart policy. Only meaningful for service steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartConfig>,
}

/// Restart policy for a background service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_restart_strategy")]
    pub strategy: RestartStrategy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_restart_delay", with = "duration_serde")]
    pub delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            strategy: default_restart_strategy(),
            max_attempts: default_max_attempts(),
            delay: default_restart_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Restart strategy enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    Never,
    OnFailure,
    Always,
}

impl BootstrapConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: BootstrapConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("Bootstrap plan has no steps");
        }

        if self.supervisor.graceful_timeout.is_zero() {
            bail!("supervisor.graceful_timeout must be greater than zero");
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            pidone_process::validate_step_name(&step.name)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            pidone_process::validate_command(&step.name, &step.command)
                .map_err(|e| anyhow::anyhow!("{}", e))?;

            if !seen.insert(step.name.as_str()) {
                bail!("Duplicate step name: {}", step.name);
            }

            if step.kind == StepKind::Prerequisite && step.restart.is_some() {
                bail!(
                    "Step '{}': restart policies are not valid on prerequisite steps",
                    step.name
                );
            }
        }

        Ok(())
    }

    /// Log sink path for a step.
    pub fn log_path_for(&self, step: &StepConfig) -> PathBuf {
        step.log_file.clone().unwrap_or_else(|| {
            self.supervisor
                .log_directory
                .join(format!("{}.log", step.name))
        })
    }

    /// Service steps only, in plan order.
    pub fn services(&self) -> impl Iterator<Item = &StepConfig> {
        self.steps.iter().filter(|s| s.kind == StepKind::Service)
    }
}

// Default value functions

fn default_log_directory() -> PathBuf {
    PathBuf::from("/var/log/pidone")
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_restart_strategy() -> RestartStrategy {
    RestartStrategy::OnFailure
}

fn default_max_attempts() -> u32 {
    3
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f32 {
    1.5
}

// Custom serialization for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PLAN: &str = r#"
supervisor:
  log_directory: /tmp/pidone-test-logs
  graceful_timeout: 5s
  announce:
    - "open http://localhost:8080 in your browser"
steps:
  - name: setup
    kind: prerequisite
    command: /opt/bin/start_all.sh
  - name: novnc
    kind: service
    command: /opt/bin/novnc_startup.sh
    restart:
      strategy: on_failure
      max_attempts: 2
      delay: 500ms
  - name: http-server
    kind: service
    command: python3
    args: ["-m", "http.server", "8080"]
    working_directory: /srv/static
"#;

    #[test]
    fn test_parse_valid_plan() {
        let config = BootstrapConfig::load_from_string(VALID_PLAN).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[0].kind, StepKind::Prerequisite);
        assert_eq!(config.supervisor.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.supervisor.announce.len(), 1);

        let restart = config.steps[1].restart.as_ref().unwrap();
        assert_eq!(restart.strategy, RestartStrategy::OnFailure);
        assert_eq!(restart.delay, Duration::from_millis(500));

        assert_eq!(config.services().count(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::load_from_string(
            r#"
steps:
  - name: only
    kind: service
    command: /bin/true
"#,
        )
        .unwrap();
        assert_eq!(config.supervisor.graceful_timeout, Duration::from_secs(10));
        assert!(config.supervisor.announce.is_empty());
        assert_eq!(
            config.log_path_for(&config.steps[0]),
            PathBuf::from("/var/log/pidone/only.log")
        );
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(
            duration_serde::parse_duration("250ms").unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            duration_serde::parse_duration("10s").unwrap(),
            Duration::from_secs(10)
        );
        assert_eq!(
            duration_serde::parse_duration("2m").unwrap(),
            Duration::from_secs(120)
        );
        assert!(duration_serde::parse_duration("10").is_err());
        assert!(duration_serde::parse_duration("fast").is_err());
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(BootstrapConfig::load_from_string("steps: []").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = BootstrapConfig::load_from_string(
            r#"
steps:
  - name: same
    kind: service
    command: /bin/true
  - name: same
    kind: service
    command: /bin/false
"#,
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_restart_on_prerequisite_rejected() {
        let result = BootstrapConfig::load_from_string(
            r#"
steps:
  - name: setup
    kind: prerequisite
    command: /bin/true
    restart:
      strategy: always
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_step_name_rejected() {
        let result = BootstrapConfig::load_from_string(
            r#"
steps:
  - name: "bad name"
    kind: service
    command: /bin/true
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_log_file_wins() {
        let config = BootstrapConfig::load_from_string(
            r#"
steps:
  - name: svc
    kind: service
    command: /bin/true
    log_file: /custom/place.log
"#,
        )
        .unwrap();
        assert_eq!(
            config.log_path_for(&config.steps[0]),
            PathBuf::from("/custom/place.log")
        );
    }
}
