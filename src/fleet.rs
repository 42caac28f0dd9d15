use anyhow::Result;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::cluster::{
    Cluster, ClusterId, ClusterRegistry, ClusterStatus, Environment, Provider, ResourceUtilization,
};
use crate::config::Config;
use crate::priority_scheduler::PriorityScheduler;
use crate::telemetry::{LiveConditions, StaticTelemetrySource, TelemetrySampler};

/// The cluster inventory loaded with --fleet <FILE>.
#[derive(Debug, Deserialize)]
pub struct FleetDefinition {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub clusters: Vec<ClusterSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub id: ClusterId,
    #[serde(default)]
    pub name: Option<String>,
    pub region: String,
    #[serde(default)]
    pub zone: String,
    pub provider: Provider,
    pub environment: Environment,
    #[serde(default)]
    pub status: ClusterStatus,
    pub node_count: u32,
    pub pod_capacity: u32,
    #[serde(default)]
    pub utilization: ResourceUtilization,
    /// Served by the static telemetry source. Nominal conditions when absent.
    #[serde(default)]
    pub conditions: Option<LiveConditions>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FleetError {
    #[error("field {0} is required")]
    MissingField(String),
    #[error("cluster {0} is defined more than once")]
    DuplicateCluster(ClusterId),
    #[error("the fleet has no clusters")]
    EmptyFleet,
}

impl FleetDefinition {
    #[tracing::instrument(name = "FleetDefinition::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;
        let fleet: FleetDefinition = serde_yaml::from_str(&file_contents)?;

        fleet.validate()?;

        Ok(fleet)
    }

    fn validate(&self) -> Result<(), FleetError> {
        if self.clusters.is_empty() {
            return Err(FleetError::EmptyFleet);
        }

        let mut seen = HashSet::new();
        for (index, spec) in self.clusters.iter().enumerate() {
            if spec.id.trim().is_empty() {
                return Err(FleetError::MissingField(format!("clusters[{index}].id")));
            }
            if spec.region.trim().is_empty() {
                return Err(FleetError::MissingField(format!("clusters[{index}].region")));
            }
            if !seen.insert(&spec.id) {
                return Err(FleetError::DuplicateCluster(spec.id.clone()));
            }
        }

        Ok(())
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.clusters
            .iter()
            .map(|spec| Cluster {
                id: spec.id.clone(),
                name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
                region: spec.region.clone(),
                zone: spec.zone.clone(),
                provider: spec.provider,
                environment: spec.environment,
                status: spec.status,
                node_count: spec.node_count,
                pod_capacity: spec.pod_capacity,
                utilization: spec.utilization.clamped(),
            })
            .collect()
    }

    pub fn conditions(&self) -> Vec<(ClusterId, LiveConditions)> {
        self.clusters
            .iter()
            .map(|spec| {
                (
                    spec.id.clone(),
                    spec.conditions.clone().unwrap_or_else(LiveConditions::nominal),
                )
            })
            .collect()
    }

    /// A scheduler over this fleet, fed by the conditions embedded in the file.
    pub fn scheduler(&self, config: &Config) -> PriorityScheduler {
        let registry = Arc::new(ClusterRegistry::with_clusters(self.clusters()));
        let source = Arc::new(StaticTelemetrySource::with_conditions(self.conditions()));
        let sampler = TelemetrySampler::new(
            source,
            Arc::clone(&registry),
            config.scheduler.telemetry_timeout(),
        );

        PriorityScheduler::new(registry, sampler, config.thresholds.clone())
    }
}
