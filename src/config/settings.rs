use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{HubError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub scheduler: SchedulerConfig,
    pub bus: BusConfig,
    pub reporting: ReportingConfig,
}

impl HubConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = self.to_toml()?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HubError::Config(e.to_string()))
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.scheduler.max_pending == 0 {
            errors.push("scheduler.max_pending must be greater than 0");
        }
        if self.scheduler.retained_terminal == 0 {
            errors.push("scheduler.retained_terminal must be greater than 0");
        }
        if self.scheduler.tick_interval_ms == 0 {
            errors.push("scheduler.tick_interval_ms must be greater than 0");
        }

        if self.bus.inbox_capacity == 0 {
            errors.push("bus.inbox_capacity must be greater than 0");
        }

        if self.reporting.collaborator.trim().is_empty() {
            errors.push("reporting.collaborator must not be empty");
        }
        if self.reporting.collaborator == crate::agent::BROADCAST {
            errors.push("reporting.collaborator must name a single agent, not the broadcast wildcard");
        }
        if self.reporting.message_type.trim().is_empty() {
            errors.push("reporting.message_type must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HubError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Admission is refused once this many tasks are PENDING.
    pub max_pending: usize,
    /// COMPLETED/FAILED tasks kept for inspection; older ones are evicted by insertion order.
    pub retained_terminal: usize,
    pub tick_interval_ms: u64,
    /// Opt-in: check task params against the matching capability's schema at admission.
    pub validate_params: bool,
    /// How long `stop()` waits for the loops before aborting them.
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pending: 5,
            retained_terminal: 10,
            tick_interval_ms: 100,
            validate_params: false,
            shutdown_grace_ms: 2000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// What the bus does when a destination inbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the incoming message and log a warning.
    #[default]
    Reject,
    /// Wait for the consumer to make room.
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub inbox_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            overflow: OverflowPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Agent name that receives completion reports.
    pub collaborator: String,
    pub message_type: String,
    /// Also report FAILED tasks, not only COMPLETED ones.
    pub report_failures: bool,
    /// Longest the scheduler waits on a full collaborator inbox under the
    /// `block` overflow policy before dropping the report.
    pub send_timeout_ms: u64,
}

impl ReportingConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            collaborator: "master".to_string(),
            message_type: "task_completed".to_string(),
            report_failures: true,
            send_timeout_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_pending, 5);
        assert_eq!(config.scheduler.retained_terminal, 10);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.reporting.collaborator, "master");
        assert_eq!(config.bus.overflow, OverflowPolicy::Reject);
        assert!(!config.scheduler.validate_params);
        assert_eq!(config.reporting.send_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = HubConfig::default();
        config.scheduler.max_pending = 0;
        config.bus.inbox_capacity = 0;
        config.reporting.collaborator = "*".into();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_pending"));
        assert!(err.contains("inbox_capacity"));
        assert!(err.contains("broadcast wildcard"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [scheduler]
            max_pending = 3

            [bus]
            overflow = "block"
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_pending, 3);
        assert_eq!(config.scheduler.retained_terminal, 10);
        assert_eq!(config.bus.overflow, OverflowPolicy::Block);
        assert_eq!(config.bus.inbox_capacity, 256);
    }
}
