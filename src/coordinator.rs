use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::cluster::{Cluster, ClusterId};
use crate::cluster_selector::{
    BestClusterSelection, ClusterSelector, ResourceRequirements, SelectionConstraints,
    SelectionCriteria, SelectionError,
};
use crate::config::{AdaptiveThresholds, ThresholdsUpdate};
use crate::execution_planner::{
    failure_rate, ExecutionPlan, ExecutionPlanner, ExecutionStrategy, PlanStatus, PlanningError,
    RollbackTrigger, SyncPolicy,
};
use crate::health_scorer::PriorityScore;
use crate::priority_scheduler::PriorityScheduler;
use crate::telemetry::LiveConditions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollbackPolicy {
    pub enabled: bool,
    /// Evaluated against cumulative outcomes after every phase.
    pub triggers: Vec<RollbackTrigger>,
    /// Failure percentage across finished clusters that aborts the plan.
    /// Falls back to the scheduler's `max_failure_rate`.
    pub max_failure_threshold: Option<f64>,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            triggers: Vec::new(),
            max_failure_threshold: None,
        }
    }
}

/// How the clusters of a request are chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelection {
    Clusters(Vec<ClusterId>),
    /// The single best cluster for the requirements.
    Best {
        requirements: ResourceRequirements,
        constraints: SelectionConstraints,
    },
    /// Up to `count` clusters passing the criteria.
    Criteria {
        criteria: SelectionCriteria,
        count: usize,
        exclude: HashSet<ClusterId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemediationRequest {
    pub id: Uuid,
    pub action: RemediationAction,
    pub targets: TargetSelection,
    pub priority: RequestPriority,
    /// Shapes the phases when set. Otherwise the sync policy does.
    pub strategy: Option<ExecutionStrategy>,
    pub sync_policy: SyncPolicy,
    pub rollback: RollbackPolicy,
}

impl RemediationRequest {
    pub fn new(action: RemediationAction, targets: TargetSelection) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            targets,
            priority: RequestPriority::default(),
            strategy: None,
            sync_policy: SyncPolicy::default(),
            rollback: RollbackPolicy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackPolicy) -> Self {
        self.rollback = rollback;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    pub duration_secs: f64,
}

/// Applies a fix to a single cluster.
#[async_trait]
pub trait RemediationExecutor: Send + Sync {
    async fn execute(
        &self,
        cluster_id: &ClusterId,
        action: &RemediationAction,
    ) -> Result<ExecutionOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOutcome {
    pub cluster_id: ClusterId,
    pub phase: usize,
    pub status: OutcomeStatus,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub request_id: Uuid,
    pub plan_id: Uuid,
    pub action: String,
    pub priority: RequestPriority,
    pub clusters: Vec<ClusterId>,
    pub strategy: Option<ExecutionStrategy>,
    pub sync_policy: SyncPolicy,
    pub outcome: PlanStatus,
    pub cluster_outcomes: Vec<ClusterOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// Append-only store of finished remediations.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistorySink {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistorySink {
    async fn append(&self, record: HistoryRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RemediationError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error("clusters {clusters:?} are reserved by active plan {plan_id}")]
    PlanActivationConflict {
        plan_id: Uuid,
        clusters: Vec<ClusterId>,
    },
    #[error("plan {0} is not active")]
    PlanNotFound(Uuid),
    #[error("plan {plan_id} is {status} and cannot be executed")]
    PlanNotExecutable { plan_id: Uuid, status: PlanStatus },
    #[error("plan {plan_id} is {status} and cannot be cancelled")]
    PlanNotCancellable { plan_id: Uuid, status: PlanStatus },
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),
}

/// A registered plan that has not reached a terminal status yet.
#[derive(Debug)]
struct ActivePlan {
    request: RemediationRequest,
    plan: ExecutionPlan,
    outcomes: Vec<ClusterOutcome>,
    started_at: Option<DateTime<Utc>>,
}

/// Plans that have not reached a terminal status and the clusters they hold.
struct PlanBook {
    plans: RwLock<HashMap<Uuid, ActivePlan>>,
    /// Cluster -> plan currently holding it.
    reservations: Mutex<HashMap<ClusterId, Uuid>>,
    history: Arc<dyn HistorySink>,
}

impl PlanBook {
    /// Releases the plan's clusters, drops the plan and appends the history
    /// record.
    #[tracing::instrument(name = "PlanBook::finish", skip_all, fields(
        plan_id = %plan_id,
        %status
    ))]
    async fn finish(&self, plan_id: Uuid, status: PlanStatus) {
        self.reservations
            .lock()
            .await
            .retain(|_, owner| *owner != plan_id);

        let active = match self.plans.write().await.remove(&plan_id) {
            None => {
                warn!("finished plan is no longer active");
                return;
            }
            Some(v) => v,
        };

        let record = HistoryRecord {
            request_id: active.request.id,
            plan_id,
            action: active.request.action.name.clone(),
            priority: active.request.priority,
            clusters: active.plan.target_clusters.clone(),
            strategy: active.plan.strategy,
            sync_policy: active.plan.sync_policy,
            outcome: status,
            cluster_outcomes: active.outcomes,
            created_at: active.plan.created_at,
            started_at: active.started_at,
            finished_at: Utc::now(),
        };

        if let Err(error) = self.history.append(record).await {
            error!(?error, "unable to append remediation history");
        }

        info!("plan finished");
    }
}

/// Fails the plan if `execute` is dropped before the plan reaches a terminal
/// status, so its clusters do not stay reserved.
struct AbandonGuard {
    book: Arc<PlanBook>,
    plan_id: Uuid,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let plan_id = self.plan_id;
        warn!(%plan_id, "plan execution abandoned, failing the plan");

        let book = Arc::clone(&self.book);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    book.finish(plan_id, PlanStatus::Failed).await;
                });
            }
            Err(error) => error!(?error, %plan_id, "unable to release abandoned plan"),
        }
    }
}

/// Entry point for remediation requests and ranking queries.
pub struct RemediationCoordinator {
    scheduler: Arc<PriorityScheduler>,
    executor: Arc<dyn RemediationExecutor>,
    book: Arc<PlanBook>,
}

impl RemediationCoordinator {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        executor: Arc<dyn RemediationExecutor>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            scheduler,
            executor,
            book: Arc::new(PlanBook {
                plans: RwLock::new(HashMap::new()),
                reservations: Mutex::new(HashMap::new()),
                history,
            }),
        }
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    pub async fn get_prioritized_clusters(&self) -> Vec<PriorityScore> {
        self.scheduler.snapshot().await.scores().to_vec()
    }

    pub async fn get_live_conditions(&self) -> HashMap<ClusterId, LiveConditions> {
        self.scheduler.snapshot().await.conditions().clone()
    }

    pub async fn get_cluster_priority_score(&self, cluster_id: &str) -> Option<PriorityScore> {
        self.scheduler.snapshot().await.get(cluster_id).cloned()
    }

    /// Builds a plan without registering it.
    #[tracing::instrument(name = "RemediationCoordinator::generate_execution_plan", skip_all, fields(
        targets = ?targets,
        strategy = %strategy
    ))]
    pub async fn generate_execution_plan(
        &self,
        targets: &[ClusterId],
        strategy: &str,
    ) -> Result<ExecutionPlan, RemediationError> {
        let strategy: ExecutionStrategy = strategy.parse()?;
        let snapshot = self.scheduler.snapshot().await;
        let plan = ExecutionPlanner::new(&snapshot).plan(targets, strategy)?;
        Ok(plan)
    }

    pub async fn select_best_cluster(
        &self,
        requirements: &ResourceRequirements,
        constraints: &SelectionConstraints,
    ) -> Result<BestClusterSelection, RemediationError> {
        let snapshot = self.scheduler.snapshot().await;
        let clusters = self.scheduler.registry().all().await;
        let selection =
            ClusterSelector::new(&clusters, &snapshot).select_best(requirements, constraints)?;
        Ok(selection)
    }

    /// Up to `count` clusters passing the criteria, ordered by the criteria's
    /// load balancing strategy.
    pub async fn select_clusters(
        &self,
        criteria: &SelectionCriteria,
        count: usize,
        exclude: &HashSet<ClusterId>,
    ) -> Result<Vec<Cluster>, RemediationError> {
        let snapshot = self.scheduler.snapshot().await;
        let clusters = self.scheduler.registry().all().await;
        let selected = ClusterSelector::new(&clusters, &snapshot).select(criteria, count, exclude)?;
        Ok(selected)
    }

    pub async fn update_adaptive_thresholds(&self, update: &ThresholdsUpdate) -> AdaptiveThresholds {
        self.scheduler.update_thresholds(update).await
    }

    /// The plan, while it is active.
    pub async fn plan(&self, plan_id: Uuid) -> Option<ExecutionPlan> {
        self.book
            .plans
            .read()
            .await
            .get(&plan_id)
            .map(|active| active.plan.clone())
    }

    pub async fn active_plans(&self) -> Vec<ExecutionPlan> {
        self.book
            .plans
            .read()
            .await
            .values()
            .map(|active| active.plan.clone())
            .collect()
    }

    /// Resolves targets, plans and registers the plan, reserving its clusters.
    #[tracing::instrument(name = "RemediationCoordinator::submit", skip_all, fields(
        request_id = %request.id,
        action = %request.action.name,
        priority = ?request.priority
    ))]
    pub async fn submit(&self, request: RemediationRequest) -> Result<ExecutionPlan, RemediationError> {
        let targets: Vec<ClusterId> = match &request.targets {
            TargetSelection::Clusters(ids) => {
                for cluster_id in ids {
                    if !self.scheduler.registry().contains(cluster_id).await {
                        return Err(RemediationError::UnknownCluster(cluster_id.clone()));
                    }
                }
                ids.clone()
            }
            TargetSelection::Best {
                requirements,
                constraints,
            } => {
                let selection = self.select_best_cluster(requirements, constraints).await?;
                vec![selection.cluster.id]
            }
            TargetSelection::Criteria {
                criteria,
                count,
                exclude,
            } => self
                .select_clusters(criteria, *count, exclude)
                .await?
                .into_iter()
                .map(|cluster| cluster.id)
                .collect(),
        };

        let snapshot = self.scheduler.snapshot().await;
        let planner = ExecutionPlanner::new(&snapshot);
        let plan = match request.strategy {
            Some(strategy) => planner.plan_with_policy(&targets, strategy, request.sync_policy)?,
            None => planner.plan_for_sync_policy(&targets, request.sync_policy)?,
        };

        self.reserve(plan.id, &targets).await?;

        info!(plan_id = %plan.id, ?targets, "plan registered");

        self.book.plans.write().await.insert(
            plan.id,
            ActivePlan {
                request,
                plan: plan.clone(),
                outcomes: Vec::new(),
                started_at: None,
            },
        );

        Ok(plan)
    }

    async fn reserve(&self, plan_id: Uuid, targets: &[ClusterId]) -> Result<(), RemediationError> {
        let mut reservations = self.book.reservations.lock().await;

        let conflicts: Vec<(&ClusterId, Uuid)> = targets
            .iter()
            .filter_map(|cluster_id| reservations.get(cluster_id).map(|owner| (cluster_id, *owner)))
            .collect();

        if let Some((_, owner)) = conflicts.first() {
            return Err(RemediationError::PlanActivationConflict {
                plan_id: *owner,
                clusters: conflicts.iter().map(|(id, _)| (*id).clone()).collect(),
            });
        }

        for cluster_id in targets {
            reservations.insert(cluster_id.clone(), plan_id);
        }

        Ok(())
    }

    /// Runs the plan phase by phase until it completes, fails or is rolled back.
    #[tracing::instrument(name = "RemediationCoordinator::execute", skip_all, fields(
        plan_id = %plan_id
    ))]
    pub async fn execute(&self, plan_id: Uuid) -> Result<PlanStatus, RemediationError> {
        let (request, plan) = {
            let mut plans = self.book.plans.write().await;
            let active = plans
                .get_mut(&plan_id)
                .ok_or(RemediationError::PlanNotFound(plan_id))?;

            let status = active.plan.status();
            if status != PlanStatus::Initiated {
                return Err(RemediationError::PlanNotExecutable { plan_id, status });
            }

            active.plan.set_status(PlanStatus::InProgress);
            active.started_at = Some(Utc::now());
            (active.request.clone(), active.plan.clone())
        };

        let mut guard = AbandonGuard {
            book: Arc::clone(&self.book),
            plan_id,
            armed: true,
        };

        let max_failure_threshold = match request.rollback.max_failure_threshold {
            Some(threshold) => threshold,
            None => self.scheduler.thresholds().await.max_failure_rate,
        };

        let mut finished = 0;
        let mut failures = 0;
        let mut status = PlanStatus::Completed;

        for phase in plan.phases.iter() {
            info!(phase = phase.number, clusters = ?phase.clusters, "starting phase");

            let outcomes = join_all(phase.clusters.iter().map(|cluster_id| {
                let span = tracing::info_span!("remediate_cluster", %cluster_id, phase = phase.number);
                self.execute_on_cluster(cluster_id, &request.action, phase.number)
                    .instrument(span)
            }))
            .await;

            let phase_failures = outcomes
                .iter()
                .filter(|outcome| outcome.status == OutcomeStatus::Failure)
                .count();
            finished += outcomes.len();
            failures += phase_failures;

            if let Some(active) = self.book.plans.write().await.get_mut(&plan_id) {
                active.outcomes.extend(outcomes);
            }

            let phase_triggered = phase
                .rollback_triggers
                .iter()
                .find(|trigger| trigger.fires(phase_failures, phase.clusters.len()));
            let request_triggered = request
                .rollback
                .triggers
                .iter()
                .find(|trigger| trigger.fires(failures, finished));
            let threshold_exceeded = failure_rate(failures, finished) > max_failure_threshold;

            if phase_triggered.is_some() || request_triggered.is_some() || threshold_exceeded {
                status = if request.rollback.enabled {
                    PlanStatus::RolledBack
                } else {
                    PlanStatus::Failed
                };

                warn!(
                    phase = phase.number,
                    failures,
                    finished,
                    max_failure_threshold,
                    trigger = ?phase_triggered.or(request_triggered),
                    %status,
                    "aborting plan, remaining phases cancelled"
                );
                break;
            }
        }

        self.book.finish(plan_id, status).await;
        guard.armed = false;

        Ok(status)
    }

    /// Withdraws a plan that was submitted but not executed. The plan is
    /// recorded as failed and its clusters are released.
    #[tracing::instrument(name = "RemediationCoordinator::cancel", skip_all, fields(
        plan_id = %plan_id
    ))]
    pub async fn cancel(&self, plan_id: Uuid) -> Result<(), RemediationError> {
        {
            let mut plans = self.book.plans.write().await;
            let active = plans
                .get_mut(&plan_id)
                .ok_or(RemediationError::PlanNotFound(plan_id))?;

            let status = active.plan.status();
            if status != PlanStatus::Initiated {
                return Err(RemediationError::PlanNotCancellable { plan_id, status });
            }

            active.plan.set_status(PlanStatus::Failed);
        }

        info!("plan cancelled");
        self.book.finish(plan_id, PlanStatus::Failed).await;

        Ok(())
    }

    /// Submits and executes in one go.
    pub async fn remediate(
        &self,
        request: RemediationRequest,
    ) -> Result<(ExecutionPlan, PlanStatus), RemediationError> {
        let plan = self.submit(request).await?;
        let status = self.execute(plan.id).await?;
        Ok((plan, status))
    }

    async fn execute_on_cluster(
        &self,
        cluster_id: &ClusterId,
        action: &RemediationAction,
        phase: usize,
    ) -> ClusterOutcome {
        let outcome = match self.executor.execute(cluster_id, action).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(?error, "remediation executor failed");
                ExecutionOutcome {
                    status: OutcomeStatus::Failure,
                    duration_secs: 0.0,
                }
            }
        };

        info!(status = ?outcome.status, duration_secs = outcome.duration_secs, "cluster remediated");

        ClusterOutcome {
            cluster_id: cluster_id.clone(),
            phase,
            status: outcome.status,
            duration_secs: outcome.duration_secs,
        }
    }
}
