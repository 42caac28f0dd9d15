use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::{Cluster, ClusterId, ClusterStatus, Environment, Provider};
use crate::priority_scheduler::RankingSnapshot;

/// Health assumed for clusters the scheduler has not scored yet.
const UNSCORED_HEALTH: f64 = 50.0;
const MAX_SELECTION_CONFIDENCE: f64 = 95.0;
const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    /// Random order. Two identical calls may return different clusters.
    RoundRobin,
    LeastLoaded,
    CapacityBased,
    Geographic,
}

impl FromStr for LoadBalancingStrategy {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "least-loaded" => Ok(Self::LeastLoaded),
            "capacity-based" => Ok(Self::CapacityBased),
            "geographic" => Ok(Self::Geographic),
            other => Err(SelectionError::InvalidLoadBalancingStrategy(other.to_owned())),
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RoundRobin => "round-robin",
            Self::LeastLoaded => "least-loaded",
            Self::CapacityBased => "capacity-based",
            Self::Geographic => "geographic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionCriteria {
    /// Highest acceptable utilization on any of cpu, memory or storage.
    pub max_utilization: f64,
    pub min_health_score: f64,
    pub preferred_regions: Vec<String>,
    pub strategy: LoadBalancingStrategy,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            max_utilization: 85.0,
            min_health_score: 50.0,
            preferred_regions: Vec::new(),
            strategy: LoadBalancingStrategy::LeastLoaded,
        }
    }
}

/// Percentage points of a cluster's capacity that a fix needs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionConstraints {
    pub preferred_regions: Vec<String>,
    pub excluded_clusters: HashSet<ClusterId>,
    /// Empty means any provider.
    pub allowed_providers: Vec<Provider>,
    pub environment: Option<Environment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvaluation {
    pub cluster_id: ClusterId,
    pub composite_score: f64,
    pub resource_fit_score: f64,
    pub health_score: f64,
    pub capacity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestClusterSelection {
    pub cluster: Cluster,
    pub evaluation: CandidateEvaluation,
    /// Capped at 95.
    pub confidence: f64,
    pub reasoning: Vec<String>,
    /// Up to three runners-up, best first.
    pub alternatives: Vec<CandidateEvaluation>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no cluster is suitable for the remediation")]
    NoSuitableCluster { rejection_reasons: Vec<String> },
    #[error("at least one cluster must be requested")]
    ZeroRequiredCount,
    #[error("invalid load balancing strategy: {0}")]
    InvalidLoadBalancingStrategy(String),
}

/// Picks clusters for a fix out of a ranking snapshot. Never mutates scores.
#[derive(Debug)]
pub struct ClusterSelector<'a> {
    clusters: &'a [Cluster],
    ranking: &'a RankingSnapshot,
}

impl<'a> ClusterSelector<'a> {
    pub fn new(clusters: &'a [Cluster], ranking: &'a RankingSnapshot) -> Self {
        Self { clusters, ranking }
    }

    fn health_of(&self, cluster_id: &str) -> Option<f64> {
        self.ranking
            .get(cluster_id)
            .map(|score| score.priority_score)
    }

    /// Clusters in ranking order, unscored ones last by id.
    fn ranked_clusters(&self) -> Vec<&'a Cluster> {
        let mut clusters: Vec<&Cluster> = self.clusters.iter().collect();
        clusters.sort_by_key(|cluster| {
            let order = self
                .ranking
                .get(&cluster.id)
                .map(|score| score.execution_order)
                .unwrap_or(usize::MAX);
            (order, cluster.id.clone())
        });
        clusters
    }

    #[tracing::instrument(name = "ClusterSelector::select", skip_all, fields(
        criteria = ?criteria,
        required_count,
        num_excluded = exclude.len()
    ))]
    pub fn select(
        &self,
        criteria: &SelectionCriteria,
        required_count: usize,
        exclude: &HashSet<ClusterId>,
    ) -> Result<Vec<Cluster>, SelectionError> {
        if required_count == 0 {
            return Err(SelectionError::ZeroRequiredCount);
        }

        let mut rejection_reasons = Vec::new();
        let mut candidates = Vec::new();

        for cluster in self.ranked_clusters() {
            if cluster.is_offline() {
                rejection_reasons.push(format!("{}: offline", cluster.id));
                continue;
            }
            if exclude.contains(&cluster.id) {
                rejection_reasons.push(format!("{}: excluded", cluster.id));
                continue;
            }
            match self.health_of(&cluster.id) {
                None => {
                    rejection_reasons.push(format!("{}: not scored yet", cluster.id));
                    continue;
                }
                Some(health) if health < criteria.min_health_score => {
                    rejection_reasons.push(format!(
                        "{}: health {health:.1} below {:.1}",
                        cluster.id, criteria.min_health_score
                    ));
                    continue;
                }
                Some(_) => {}
            }
            let utilization = cluster.utilization.max_utilization();
            if utilization > criteria.max_utilization {
                rejection_reasons.push(format!(
                    "{}: utilization {utilization:.1}% above {:.1}%",
                    cluster.id, criteria.max_utilization
                ));
                continue;
            }

            candidates.push(cluster);
        }

        if candidates.is_empty() {
            return Err(SelectionError::NoSuitableCluster { rejection_reasons });
        }

        match criteria.strategy {
            LoadBalancingStrategy::LeastLoaded => candidates.sort_by(|a, b| {
                a.utilization
                    .max_utilization()
                    .total_cmp(&b.utilization.max_utilization())
            }),
            LoadBalancingStrategy::CapacityBased => candidates.sort_by(|a, b| {
                b.remediation_capacity()
                    .total_cmp(&a.remediation_capacity())
            }),
            LoadBalancingStrategy::Geographic => candidates
                .sort_by_key(|cluster| !criteria.preferred_regions.contains(&cluster.region)),
            LoadBalancingStrategy::RoundRobin => candidates.shuffle(&mut rand::thread_rng()),
        }

        if candidates.len() < required_count {
            warn!(
                available = candidates.len(),
                required_count, "fewer suitable clusters than requested"
            );
        }

        let selected: Vec<Cluster> = candidates
            .into_iter()
            .take(required_count)
            .cloned()
            .collect();

        info!(selected = ?selected.iter().map(|c| &c.id).collect::<Vec<_>>(), "clusters selected");

        Ok(selected)
    }

    #[tracing::instrument(name = "ClusterSelector::select_best", skip_all, fields(
        requirements = ?requirements,
        constraints = ?constraints
    ))]
    pub fn select_best(
        &self,
        requirements: &ResourceRequirements,
        constraints: &SelectionConstraints,
    ) -> Result<BestClusterSelection, SelectionError> {
        let mut rejection_reasons = Vec::new();
        let mut candidates = Vec::new();

        for cluster in self.ranked_clusters() {
            let maintenance = cluster.status == ClusterStatus::Maintenance
                || self
                    .ranking
                    .conditions_for(&cluster.id)
                    .map(|live| live.maintenance_scheduled)
                    .unwrap_or(false);

            let rejection = if cluster.is_offline() {
                Some("offline")
            } else if maintenance {
                Some("under maintenance")
            } else if constraints.excluded_clusters.contains(&cluster.id) {
                Some("excluded")
            } else if !constraints.allowed_providers.is_empty()
                && !constraints.allowed_providers.contains(&cluster.provider)
            {
                Some("provider not allowed")
            } else if constraints
                .environment
                .map(|environment| environment != cluster.environment)
                .unwrap_or(false)
            {
                Some("environment mismatch")
            } else {
                None
            };

            match rejection {
                Some(reason) => rejection_reasons.push(format!("{}: {reason}", cluster.id)),
                None => candidates.push(cluster),
            }
        }

        if candidates.is_empty() {
            return Err(SelectionError::NoSuitableCluster { rejection_reasons });
        }

        let max_capacity = candidates
            .iter()
            .map(|cluster| cluster.remediation_capacity())
            .fold(0.0, f64::max);

        let mut evaluated: Vec<(&Cluster, CandidateEvaluation)> = candidates
            .into_iter()
            .map(|cluster| {
                let resource_fit_score = resource_fit(cluster, requirements);
                let health_score = self.health_of(&cluster.id).unwrap_or(UNSCORED_HEALTH);
                let capacity_score = if max_capacity > 0.0 {
                    cluster.remediation_capacity() / max_capacity * 100.0
                } else {
                    0.0
                };
                let composite_score =
                    0.4 * resource_fit_score + 0.4 * health_score + 0.2 * capacity_score;

                (
                    cluster,
                    CandidateEvaluation {
                        cluster_id: cluster.id.clone(),
                        composite_score,
                        resource_fit_score,
                        health_score,
                        capacity_score,
                    },
                )
            })
            .collect();

        evaluated.sort_by(|(a, a_eval), (b, b_eval)| {
            b_eval
                .composite_score
                .total_cmp(&a_eval.composite_score)
                .then_with(|| {
                    let a_preferred = constraints.preferred_regions.contains(&a.region);
                    let b_preferred = constraints.preferred_regions.contains(&b.region);
                    b_preferred.cmp(&a_preferred)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut evaluated = evaluated.into_iter();
        let (best, evaluation) = match evaluated.next() {
            Some(v) => v,
            None => return Err(SelectionError::NoSuitableCluster { rejection_reasons }),
        };
        let alternatives: Vec<CandidateEvaluation> = evaluated
            .take(MAX_ALTERNATIVES)
            .map(|(_, evaluation)| evaluation)
            .collect();

        let reasoning = explain(best, &evaluation, constraints);
        let confidence = evaluation.composite_score.min(MAX_SELECTION_CONFIDENCE);

        info!(cluster_id = %best.id, confidence, "best cluster selected");

        Ok(BestClusterSelection {
            cluster: best.clone(),
            evaluation,
            confidence,
            reasoning,
            alternatives,
        })
    }
}

/// Average over cpu, memory and storage of how much of the requirement the
/// cluster's free capacity covers, each dimension capped at 100.
pub fn resource_fit(cluster: &Cluster, requirements: &ResourceRequirements) -> f64 {
    let utilization = &cluster.utilization;
    let dimensions = [
        (100.0 - utilization.cpu, requirements.cpu),
        (100.0 - utilization.memory, requirements.memory),
        (100.0 - utilization.storage, requirements.storage),
    ];

    let total: f64 = dimensions
        .iter()
        .map(|&(available, required)| {
            if required <= 0.0 {
                100.0
            } else {
                (available.max(0.0) / required * 100.0).min(100.0)
            }
        })
        .sum();

    total / dimensions.len() as f64
}

fn explain(
    cluster: &Cluster,
    evaluation: &CandidateEvaluation,
    constraints: &SelectionConstraints,
) -> Vec<String> {
    let fit = evaluation.resource_fit_score;
    let fit_tier = if fit >= 80.0 {
        "excellent"
    } else if fit >= 50.0 {
        "adequate"
    } else {
        "insufficient"
    };

    let health = evaluation.health_score;
    let health_tier = if health >= 80.0 {
        "excellent"
    } else if health >= 60.0 {
        "good"
    } else if health >= 40.0 {
        "fair"
    } else {
        "poor"
    };

    let capacity = evaluation.capacity_score;
    let capacity_tier = if capacity >= 70.0 {
        "high"
    } else if capacity >= 40.0 {
        "moderate"
    } else {
        "limited"
    };

    let location = if constraints.preferred_regions.contains(&cluster.region) {
        format!("located in preferred region {}", cluster.region)
    } else {
        format!("located in {} ({:?})", cluster.region, cluster.provider)
    };

    vec![
        format!("{fit_tier} resource fit ({fit:.1}%)"),
        format!("{health_tier} health ({health:.1})"),
        format!("{capacity_tier} remediation capacity ({capacity:.1})"),
        location,
    ]
}
