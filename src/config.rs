use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub thresholds: AdaptiveThresholds,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a single telemetry fetch may take before the cluster is
    /// treated as stale for the current tick.
    pub telemetry_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            telemetry_timeout_ms: 2_000,
        }
    }
}

impl SchedulerConfig {
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

/// Thresholds that drive scoring and rollback. Overridable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholds {
    pub tick_interval_secs: u64,
    /// Load percentage above which a cluster is penalized.
    pub high_load: f64,
    /// Load percentage above which a cluster is penalized heavily.
    pub critical_load: f64,
    /// Failure percentage that rolls a plan back when the request sets none.
    pub max_failure_rate: f64,
    pub optimal_response_time_ms: f64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            high_load: 80.0,
            critical_load: 95.0,
            max_failure_rate: 25.0,
            optimal_response_time_ms: 200.0,
        }
    }
}

impl AdaptiveThresholds {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Overlays every field that is set in `update`.
    pub fn apply(&mut self, update: &ThresholdsUpdate) {
        if let Some(v) = update.tick_interval_secs {
            self.tick_interval_secs = v;
        }
        if let Some(v) = update.high_load {
            self.high_load = v;
        }
        if let Some(v) = update.critical_load {
            self.critical_load = v;
        }
        if let Some(v) = update.max_failure_rate {
            self.max_failure_rate = v;
        }
        if let Some(v) = update.optimal_response_time_ms {
            self.optimal_response_time_ms = v;
        }
    }
}

/// Partial threshold override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsUpdate {
    pub tick_interval_secs: Option<u64>,
    pub high_load: Option<f64>,
    pub critical_load: Option<f64>,
    pub max_failure_rate: Option<f64>,
    pub optimal_response_time_ms: Option<f64>,
}

impl Config {
    #[tracing::instrument(name = "config::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        Ok(config)
    }
}
