use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cluster::ClusterId;
use crate::health_scorer::{PriorityScore, RiskLevel};
use crate::priority_scheduler::RankingSnapshot;

/// Seconds a fix takes on a cluster before complexity and risk are applied.
const BASE_DURATION_SECS: f64 = 120.0;
const MAX_SUCCESS_PROBABILITY: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    Conservative,
    Balanced,
    Aggressive,
    Emergency,
}

impl ExecutionStrategy {
    fn success_multiplier(self) -> f64 {
        match self {
            Self::Conservative => 1.1,
            Self::Balanced => 1.0,
            Self::Aggressive => 0.85,
            Self::Emergency => 0.9,
        }
    }
}

impl FromStr for ExecutionStrategy {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            "emergency" => Ok(Self::Emergency),
            other => Err(PlanningError::InvalidStrategy(other.to_owned())),
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
            Self::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPolicy {
    #[default]
    Sequential,
    Parallel,
    Canary,
}

impl FromStr for SyncPolicy {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "canary" => Ok(Self::Canary),
            other => Err(PlanningError::InvalidSyncPolicy(other.to_owned())),
        }
    }
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Canary => "canary",
        };
        f.write_str(s)
    }
}

/// Condition that aborts a plan once a phase has resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackTrigger {
    AnyFailure,
    /// Failure percentage strictly above the value.
    FailureRateAbove(f64),
}

impl RollbackTrigger {
    pub fn fires(&self, failures: usize, total: usize) -> bool {
        match self {
            Self::AnyFailure => failures > 0,
            Self::FailureRateAbove(limit) => total > 0 && failure_rate(failures, total) > *limit,
        }
    }
}

impl fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyFailure => f.write_str("any_failure"),
            Self::FailureRateAbove(limit) => write!(f, "failure_rate > {limit}%"),
        }
    }
}

/// Failure percentage, zero when nothing ran.
pub fn failure_rate(failures: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    /// 1-based.
    pub number: usize,
    pub clusters: Vec<ClusterId>,
    /// Members run concurrently.
    pub parallel: bool,
    /// Longest member estimate.
    pub estimated_duration_secs: f64,
    pub risk_assessment: String,
    pub rollback_triggers: Vec<RollbackTrigger>,
    /// Phase that must succeed before this one starts.
    pub depends_on: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEstimate {
    pub cluster_id: ClusterId,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub target_clusters: Vec<ClusterId>,
    /// `None` when the plan was shaped by the sync policy alone.
    pub strategy: Option<ExecutionStrategy>,
    pub sync_policy: SyncPolicy,
    pub phases: Vec<Phase>,
    pub cluster_estimates: Vec<ClusterEstimate>,
    pub estimated_total_duration_secs: f64,
    pub success_probability: f64,
    pub created_at: DateTime<Utc>,
    status: PlanStatus,
}

impl ExecutionPlan {
    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("invalid execution strategy: {0}")]
    InvalidStrategy(String),
    #[error("invalid sync policy: {0}")]
    InvalidSyncPolicy(String),
    #[error("a plan needs at least one target cluster")]
    EmptyTarget,
    #[error("cluster {0} is targeted more than once")]
    DuplicateTarget(ClusterId),
    #[error("cluster {0} has no priority score")]
    UnscoredCluster(ClusterId),
}

/// Estimated seconds to remediate one cluster.
pub fn estimate_cluster_duration(score: &PriorityScore) -> f64 {
    let complexity = (100.0 - score.priority_score) / 100.0;
    BASE_DURATION_SECS * complexity * score.risk_level.duration_multiplier()
}

/// Partitions target clusters into phases using the scores of one snapshot.
#[derive(Debug)]
pub struct ExecutionPlanner<'a> {
    ranking: &'a RankingSnapshot,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(ranking: &'a RankingSnapshot) -> Self {
        Self { ranking }
    }

    /// Plans with a strategy, phases running one after another.
    pub fn plan(
        &self,
        targets: &[ClusterId],
        strategy: ExecutionStrategy,
    ) -> Result<ExecutionPlan, PlanningError> {
        self.plan_with_policy(targets, strategy, SyncPolicy::Sequential)
    }

    /// Plans with a strategy. A `Parallel` sync policy keeps the strategy's
    /// phases but estimates the total as the slowest single cluster. A
    /// `Canary` sync policy runs the top ranked target alone first and
    /// partitions the rest by the strategy.
    #[tracing::instrument(name = "ExecutionPlanner::plan_with_policy", skip_all, fields(
        targets = ?targets,
        %strategy,
        %sync_policy
    ))]
    pub fn plan_with_policy(
        &self,
        targets: &[ClusterId],
        strategy: ExecutionStrategy,
        sync_policy: SyncPolicy,
    ) -> Result<ExecutionPlan, PlanningError> {
        let ordered = self.ordered_targets(targets)?;

        let phases = match sync_policy {
            SyncPolicy::Canary => {
                let (canary, rest) = ordered.split_at(1);
                let mut phases = vec![build_phase(
                    1,
                    canary.to_vec(),
                    vec![RollbackTrigger::AnyFailure],
                )];
                if !rest.is_empty() {
                    phases.extend(strategy_phases(strategy, rest).into_iter().map(|mut phase| {
                        phase.number += 1;
                        phase
                    }));
                }
                phases
            }
            SyncPolicy::Sequential | SyncPolicy::Parallel => strategy_phases(strategy, &ordered),
        };

        Ok(self.assemble(
            targets,
            &ordered,
            Some(strategy),
            sync_policy,
            phases,
            strategy.success_multiplier(),
        ))
    }

    /// Plans from the sync policy alone. Canary isolates the top ranked
    /// target, the rest follow once it succeeds.
    #[tracing::instrument(name = "ExecutionPlanner::plan_for_sync_policy", skip_all, fields(
        targets = ?targets,
        %sync_policy
    ))]
    pub fn plan_for_sync_policy(
        &self,
        targets: &[ClusterId],
        sync_policy: SyncPolicy,
    ) -> Result<ExecutionPlan, PlanningError> {
        let ordered = self.ordered_targets(targets)?;

        let phases = match sync_policy {
            SyncPolicy::Sequential => ordered
                .iter()
                .enumerate()
                .map(|(index, score)| {
                    build_phase(index + 1, vec![*score], vec![RollbackTrigger::AnyFailure])
                })
                .collect(),
            SyncPolicy::Parallel => vec![build_phase(
                1,
                ordered.clone(),
                vec![RollbackTrigger::FailureRateAbove(50.0)],
            )],
            SyncPolicy::Canary => {
                let (canary, rest) = ordered.split_at(1);
                let mut phases = vec![build_phase(
                    1,
                    canary.to_vec(),
                    vec![RollbackTrigger::AnyFailure],
                )];
                if !rest.is_empty() {
                    phases.push(build_phase(
                        2,
                        rest.to_vec(),
                        vec![RollbackTrigger::FailureRateAbove(25.0)],
                    ));
                }
                phases
            }
        };

        Ok(self.assemble(targets, &ordered, None, sync_policy, phases, 1.0))
    }

    /// Target scores by descending priority, ties by cluster id.
    fn ordered_targets(&self, targets: &[ClusterId]) -> Result<Vec<&'a PriorityScore>, PlanningError> {
        if targets.is_empty() {
            return Err(PlanningError::EmptyTarget);
        }

        let mut seen = HashSet::new();
        let mut ordered = Vec::with_capacity(targets.len());

        for cluster_id in targets {
            if !seen.insert(cluster_id) {
                return Err(PlanningError::DuplicateTarget(cluster_id.clone()));
            }
            match self.ranking.get(cluster_id) {
                None => return Err(PlanningError::UnscoredCluster(cluster_id.clone())),
                Some(score) => ordered.push(score),
            }
        }

        ordered.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then_with(|| a.cluster_id.cmp(&b.cluster_id))
        });

        Ok(ordered)
    }

    fn assemble(
        &self,
        targets: &[ClusterId],
        ordered: &[&PriorityScore],
        strategy: Option<ExecutionStrategy>,
        sync_policy: SyncPolicy,
        mut phases: Vec<Phase>,
        success_multiplier: f64,
    ) -> ExecutionPlan {
        for phase in phases.iter_mut() {
            phase.depends_on = phase.number.checked_sub(1).filter(|n| *n > 0);
        }

        let cluster_estimates: Vec<ClusterEstimate> = ordered
            .iter()
            .map(|score| ClusterEstimate {
                cluster_id: score.cluster_id.clone(),
                duration_secs: estimate_cluster_duration(score),
            })
            .collect();

        let estimated_total_duration_secs = if sync_policy == SyncPolicy::Parallel {
            cluster_estimates
                .iter()
                .map(|estimate| estimate.duration_secs)
                .fold(0.0, f64::max)
        } else {
            phases.iter().map(|phase| phase.estimated_duration_secs).sum()
        };

        let average_confidence = ordered
            .iter()
            .map(|score| score.confidence_level)
            .sum::<f64>()
            / ordered.len() as f64;
        let success_probability = (average_confidence * success_multiplier).min(MAX_SUCCESS_PROBABILITY);

        let plan = ExecutionPlan {
            id: Uuid::new_v4(),
            target_clusters: targets.to_vec(),
            strategy,
            sync_policy,
            phases,
            cluster_estimates,
            estimated_total_duration_secs,
            success_probability,
            created_at: Utc::now(),
            status: PlanStatus::Initiated,
        };

        info!(
            plan_id = %plan.id,
            num_phases = plan.phases.len(),
            estimated_total_duration_secs,
            success_probability,
            "execution plan generated"
        );

        plan
    }
}

/// Phases for `ordered` under the strategy, numbered from 1.
fn strategy_phases(strategy: ExecutionStrategy, ordered: &[&PriorityScore]) -> Vec<Phase> {
    match strategy {
        ExecutionStrategy::Conservative => ordered
            .iter()
            .enumerate()
            .map(|(index, score)| {
                build_phase(index + 1, vec![*score], vec![RollbackTrigger::AnyFailure])
            })
            .collect(),
        ExecutionStrategy::Balanced => balanced_phases(ordered),
        ExecutionStrategy::Aggressive => vec![build_phase(
            1,
            ordered.to_vec(),
            vec![RollbackTrigger::FailureRateAbove(50.0)],
        )],
        ExecutionStrategy::Emergency => {
            let split = (ordered.len() + 1) / 2;
            let (first, rest) = ordered.split_at(split);
            let mut phases = vec![build_phase(
                1,
                first.to_vec(),
                vec![RollbackTrigger::FailureRateAbove(50.0)],
            )];
            if !rest.is_empty() {
                phases.push(build_phase(
                    2,
                    rest.to_vec(),
                    vec![RollbackTrigger::FailureRateAbove(25.0)],
                ));
            }
            phases
        }
    }
}

/// Low and very low risk clusters share the first phase, medium risk ones the
/// next, and every high or critical cluster runs alone. Rollback gets stricter
/// as the risk tier rises.
fn balanced_phases(ordered: &[&PriorityScore]) -> Vec<Phase> {
    let (low, rest): (Vec<&PriorityScore>, Vec<&PriorityScore>) = ordered
        .iter()
        .copied()
        .partition(|score| matches!(score.risk_level, RiskLevel::VeryLow | RiskLevel::Low));
    let (medium, high): (Vec<&PriorityScore>, Vec<&PriorityScore>) = rest
        .into_iter()
        .partition(|score| score.risk_level == RiskLevel::Medium);

    let mut phases = Vec::new();

    if !low.is_empty() {
        phases.push(build_phase(
            phases.len() + 1,
            low,
            vec![RollbackTrigger::FailureRateAbove(25.0)],
        ));
    }
    if !medium.is_empty() {
        phases.push(build_phase(
            phases.len() + 1,
            medium,
            vec![RollbackTrigger::FailureRateAbove(10.0)],
        ));
    }
    for score in high {
        phases.push(build_phase(
            phases.len() + 1,
            vec![score],
            vec![RollbackTrigger::AnyFailure],
        ));
    }

    phases
}

fn build_phase(number: usize, members: Vec<&PriorityScore>, rollback_triggers: Vec<RollbackTrigger>) -> Phase {
    let estimated_duration_secs = members
        .iter()
        .map(|score| estimate_cluster_duration(score))
        .fold(0.0, f64::max);

    let highest_risk = members
        .iter()
        .map(|score| score.risk_level)
        .max()
        .unwrap_or(RiskLevel::VeryLow);

    let risk_assessment = format!(
        "{highest_risk} risk: {} cluster(s), up to {estimated_duration_secs:.0}s",
        members.len()
    );

    Phase {
        number,
        parallel: members.len() > 1,
        clusters: members
            .into_iter()
            .map(|score| score.cluster_id.clone())
            .collect(),
        estimated_duration_secs,
        risk_assessment,
        rollback_triggers,
        depends_on: None,
    }
}
