use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cluster::{ClusterId, ClusterRegistry, ResourceUtilization};

/// Point in time view of a cluster as reported by the telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConditions {
    /// Current load as a percentage.
    pub current_load: f64,
    /// Response time in milliseconds.
    pub response_time_ms: f64,
    /// Percentage of failed requests.
    pub error_rate: f64,
    /// Requests per second.
    pub throughput: f64,
    pub active_connections: u64,
    /// Expected load in the next window, when the source can forecast it.
    #[serde(default)]
    pub load_forecast: Option<f64>,
    /// Percentage chance the cluster fails in the next window.
    #[serde(default)]
    pub failure_probability: f64,
    #[serde(default)]
    pub maintenance_scheduled: bool,
    #[serde(default)]
    pub utilization: Option<ResourceUtilization>,
}

impl LiveConditions {
    /// Conditions of a healthy, idle cluster with neutral predictive fields.
    pub fn nominal() -> Self {
        Self {
            current_load: 50.0,
            response_time_ms: 300.0,
            error_rate: 2.0,
            throughput: 0.0,
            active_connections: 0,
            load_forecast: None,
            failure_probability: 0.0,
            maintenance_scheduled: false,
            utilization: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry unavailable for cluster {cluster_id}: {reason}")]
    Unavailable {
        cluster_id: ClusterId,
        reason: String,
    },
    #[error("telemetry fetch for cluster {cluster_id} timed out after {timeout:?}")]
    Timeout {
        cluster_id: ClusterId,
        timeout: Duration,
    },
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn get_live_conditions(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<LiveConditions, TelemetryError>;
}

/// Fetches live conditions for many clusters at once.
pub struct TelemetrySampler {
    source: Arc<dyn TelemetrySource>,
    registry: Arc<ClusterRegistry>,
    /// How long a single cluster fetch may take before it is abandoned.
    fetch_timeout: Duration,
}

impl TelemetrySampler {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        registry: Arc<ClusterRegistry>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            fetch_timeout,
        }
    }

    /// Fetches every cluster concurrently. A cluster that fails or exceeds the
    /// fetch timeout yields an error entry without affecting the others.
    /// Utilization carried by successful samples is written back into the registry.
    #[tracing::instrument(name = "TelemetrySampler::sample_all", skip_all, fields(
        num_clusters = cluster_ids.len()
    ))]
    pub async fn sample_all(
        &self,
        cluster_ids: &[ClusterId],
    ) -> Vec<(ClusterId, Result<LiveConditions, TelemetryError>)> {
        let fetches = cluster_ids.iter().map(|cluster_id| async move {
            let result =
                match tokio::time::timeout(self.fetch_timeout, self.source.get_live_conditions(cluster_id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TelemetryError::Timeout {
                        cluster_id: cluster_id.clone(),
                        timeout: self.fetch_timeout,
                    }),
                };
            (cluster_id.clone(), result)
        });

        let samples = join_all(fetches).await;

        for (cluster_id, result) in samples.iter() {
            match result {
                Ok(conditions) => {
                    if let Some(utilization) = conditions.utilization {
                        self.registry.update_utilization(cluster_id, utilization).await;
                    }
                }
                Err(error) => warn!(%cluster_id, ?error, "unable to sample cluster"),
            }
        }

        samples
    }
}

/// Serves conditions from an in-memory table. Used by the binaries with
/// conditions from the fleet file, and by tests as a scripted fake.
#[derive(Debug, Default)]
pub struct StaticTelemetrySource {
    conditions: RwLock<HashMap<ClusterId, LiveConditions>>,
    failing: RwLock<HashMap<ClusterId, String>>,
    delays: RwLock<HashMap<ClusterId, Duration>>,
}

impl StaticTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conditions(conditions: impl IntoIterator<Item = (ClusterId, LiveConditions)>) -> Self {
        Self {
            conditions: RwLock::new(conditions.into_iter().collect()),
            ..Self::default()
        }
    }

    pub async fn set(&self, cluster_id: impl Into<ClusterId>, conditions: LiveConditions) {
        let cluster_id = cluster_id.into();
        self.failing.write().await.remove(&cluster_id);
        self.conditions.write().await.insert(cluster_id, conditions);
    }

    /// Makes every following fetch for the cluster fail.
    pub async fn fail(&self, cluster_id: impl Into<ClusterId>, reason: impl Into<String>) {
        self.failing
            .write()
            .await
            .insert(cluster_id.into(), reason.into());
    }

    /// Delays every following fetch for the cluster.
    pub async fn delay(&self, cluster_id: impl Into<ClusterId>, delay: Duration) {
        self.delays.write().await.insert(cluster_id.into(), delay);
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetrySource {
    #[tracing::instrument(name = "StaticTelemetrySource::get_live_conditions", skip_all, fields(
        cluster_id = %cluster_id
    ))]
    async fn get_live_conditions(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<LiveConditions, TelemetryError> {
        let delay = self.delays.read().await.get(cluster_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.failing.read().await.get(cluster_id) {
            return Err(TelemetryError::Unavailable {
                cluster_id: cluster_id.clone(),
                reason: reason.clone(),
            });
        }

        match self.conditions.read().await.get(cluster_id) {
            Some(conditions) => Ok(conditions.clone()),
            None => {
                info!("no conditions recorded for cluster");
                Err(TelemetryError::Unavailable {
                    cluster_id: cluster_id.clone(),
                    reason: "no conditions recorded".to_owned(),
                })
            }
        }
    }
}
