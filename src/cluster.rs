use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub type ClusterId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
    OnPremise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    #[default]
    Online,
    Degraded,
    Maintenance,
    Offline,
}

/// Resource utilization of a cluster. Every field is a percentage in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
}

impl ResourceUtilization {
    /// Clamps every dimension into [0, 100].
    pub fn clamped(self) -> Self {
        Self {
            cpu: self.cpu.clamp(0.0, 100.0),
            memory: self.memory.clamp(0.0, 100.0),
            storage: self.storage.clamp(0.0, 100.0),
            network: self.network.clamp(0.0, 100.0),
        }
    }

    /// The highest of cpu, memory and storage utilization.
    pub fn max_utilization(&self) -> f64 {
        self.cpu.max(self.memory).max(self.storage)
    }
}

/// A compute cluster that remediation actions can be applied against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub region: String,
    pub zone: String,
    pub provider: Provider,
    pub environment: Environment,
    #[serde(default)]
    pub status: ClusterStatus,
    /// Number of nodes in the cluster.
    pub node_count: u32,
    /// Maximum number of pods the cluster can host.
    pub pod_capacity: u32,
    /// Refreshed by the telemetry sampler.
    #[serde(default)]
    pub utilization: ResourceUtilization,
}

impl Cluster {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_offline(&self) -> bool {
        self.status == ClusterStatus::Offline
    }

    /// Pod slots left over once the most utilized resource is accounted for.
    pub fn remediation_capacity(&self) -> f64 {
        f64::from(self.pod_capacity) * (100.0 - self.utilization.max_utilization()) / 100.0
    }
}

/// Canonical set of known clusters.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(name = "ClusterRegistry::with_clusters", skip_all)]
    pub fn with_clusters(clusters: impl IntoIterator<Item = Cluster>) -> Self {
        let clusters = clusters
            .into_iter()
            .map(|cluster| (cluster.id.clone(), cluster))
            .collect();

        Self {
            clusters: RwLock::new(clusters),
        }
    }

    #[tracing::instrument(name = "ClusterRegistry::register", skip_all, fields(
        cluster_id = %cluster.id
    ))]
    pub async fn register(&self, cluster: Cluster) {
        info!("registering cluster");
        self.clusters.write().await.insert(cluster.id.clone(), cluster);
    }

    pub async fn get(&self, cluster_id: &str) -> Option<Cluster> {
        self.clusters.read().await.get(cluster_id).cloned()
    }

    pub async fn contains(&self, cluster_id: &str) -> bool {
        self.clusters.read().await.contains_key(cluster_id)
    }

    /// Cluster ids sorted ascending.
    pub async fn ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<_> = self.clusters.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every cluster sorted by id.
    pub async fn all(&self) -> Vec<Cluster> {
        let mut clusters: Vec<_> = self.clusters.read().await.values().cloned().collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        clusters
    }

    #[tracing::instrument(name = "ClusterRegistry::update_utilization", skip_all, fields(
        cluster_id = %cluster_id
    ))]
    pub async fn update_utilization(&self, cluster_id: &str, utilization: ResourceUtilization) {
        match self.clusters.write().await.get_mut(cluster_id) {
            None => warn!("utilization received for unknown cluster"),
            Some(cluster) => cluster.utilization = utilization.clamped(),
        }
    }

    #[tracing::instrument(name = "ClusterRegistry::update_status", skip_all, fields(
        cluster_id = %cluster_id,
        status = ?status
    ))]
    pub async fn update_status(&self, cluster_id: &str, status: ClusterStatus) {
        match self.clusters.write().await.get_mut(cluster_id) {
            None => warn!("status received for unknown cluster"),
            Some(cluster) => cluster.status = status,
        }
    }
}
