use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cluster::{
    Cluster, ClusterId, ClusterRegistry, ClusterStatus, Environment, Provider, ResourceUtilization,
};
use crate::config::AdaptiveThresholds;
use crate::coordinator::{ExecutionOutcome, OutcomeStatus, RemediationAction, RemediationExecutor};
use crate::health_scorer::{AdaptiveFactors, PriorityScore, RiskLevel, ScoreState};
use crate::priority_scheduler::PriorityScheduler;
use crate::telemetry::{LiveConditions, StaticTelemetrySource, TelemetrySampler};

pub fn cluster(id: &str, environment: Environment) -> Cluster {
    Cluster {
        id: id.to_owned(),
        name: format!("{id} cluster"),
        region: "us-east-1".to_owned(),
        zone: "us-east-1a".to_owned(),
        provider: Provider::Aws,
        environment,
        status: ClusterStatus::Online,
        node_count: 10,
        pod_capacity: 1_000,
        utilization: ResourceUtilization {
            cpu: 40.0,
            memory: 40.0,
            storage: 40.0,
            network: 20.0,
        },
    }
}

pub fn conditions(load: f64, error_rate: f64, response_time_ms: f64) -> LiveConditions {
    LiveConditions {
        current_load: load,
        response_time_ms,
        error_rate,
        throughput: 1_000.0,
        active_connections: 250,
        load_forecast: None,
        failure_probability: 0.0,
        maintenance_scheduled: false,
        utilization: None,
    }
}

/// A ranked score built by hand, bypassing the scorer.
pub fn score(cluster_id: &str, priority_score: f64, risk_level: RiskLevel) -> PriorityScore {
    PriorityScore {
        cluster_id: cluster_id.to_owned(),
        priority_score,
        risk_level,
        execution_order: 0,
        confidence_level: 90.0,
        reasoning: Vec::new(),
        adaptive_factors: AdaptiveFactors {
            load_trend: 0.0,
            resource_availability: 60.0,
            network_latency: 300.0,
            maintenance_window: false,
        },
        state: ScoreState::Scored,
        is_production: false,
    }
}

pub struct Harness {
    pub registry: Arc<ClusterRegistry>,
    pub source: Arc<StaticTelemetrySource>,
    pub scheduler: Arc<PriorityScheduler>,
}

/// Scheduler over the given clusters and conditions, with a short fetch timeout.
pub fn harness(fleet: Vec<(Cluster, LiveConditions)>) -> Harness {
    let registry = Arc::new(ClusterRegistry::with_clusters(
        fleet.iter().map(|(cluster, _)| cluster.clone()),
    ));
    let source = Arc::new(StaticTelemetrySource::with_conditions(
        fleet
            .into_iter()
            .map(|(cluster, conditions)| (cluster.id, conditions)),
    ));
    let sampler = TelemetrySampler::new(
        source.clone(),
        Arc::clone(&registry),
        Duration::from_millis(200),
    );
    let scheduler = Arc::new(PriorityScheduler::new(
        Arc::clone(&registry),
        sampler,
        AdaptiveThresholds::default(),
    ));

    Harness {
        registry,
        source,
        scheduler,
    }
}

/// Fails the clusters it was told to fail and records every call.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: HashSet<ClusterId>,
    erroring: HashSet<ClusterId>,
    stalling: HashSet<ClusterId>,
    pub calls: Mutex<Vec<ClusterId>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, cluster_id: &str) -> Self {
        self.failing.insert(cluster_id.to_owned());
        self
    }

    /// The executor itself errors instead of reporting an outcome.
    pub fn erroring(mut self, cluster_id: &str) -> Self {
        self.erroring.insert(cluster_id.to_owned());
        self
    }

    /// The executor never returns for the cluster.
    pub fn stalling(mut self, cluster_id: &str) -> Self {
        self.stalling.insert(cluster_id.to_owned());
        self
    }

    pub async fn calls(&self) -> Vec<ClusterId> {
        self.calls.lock().await.clone()
    }

    pub async fn call_counts(&self) -> HashMap<ClusterId, usize> {
        let mut counts = HashMap::new();
        for cluster_id in self.calls.lock().await.iter() {
            *counts.entry(cluster_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl RemediationExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        cluster_id: &ClusterId,
        _action: &RemediationAction,
    ) -> Result<ExecutionOutcome> {
        self.calls.lock().await.push(cluster_id.clone());

        if self.stalling.contains(cluster_id) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }

        if self.erroring.contains(cluster_id) {
            anyhow::bail!("executor lost connection to {cluster_id}");
        }

        let status = if self.failing.contains(cluster_id) {
            OutcomeStatus::Failure
        } else {
            OutcomeStatus::Success
        };

        Ok(ExecutionOutcome {
            status,
            duration_secs: 1.0,
        })
    }
}

pub fn action() -> RemediationAction {
    RemediationAction {
        name: "restart-ingress".to_owned(),
        description: "Restart the ingress controller".to_owned(),
    }
}
