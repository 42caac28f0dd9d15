use std::collections::HashMap;
use std::sync::Arc;

use tokio::select;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cluster::{ClusterId, ClusterRegistry};
use crate::config::{AdaptiveThresholds, ThresholdsUpdate};
use crate::health_scorer::{HealthScorer, PriorityScore, ScoreState};
use crate::telemetry::{LiveConditions, TelemetrySampler};

pub const STALE_TELEMETRY_NOTE: &str = "stale: telemetry unavailable";

/// Immutable view of the ranking produced by one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingSnapshot {
    /// Tick that produced the snapshot. Zero before the first tick.
    pub tick: u64,
    /// Ordered by execution order.
    scores: Vec<PriorityScore>,
    conditions: HashMap<ClusterId, LiveConditions>,
}

impl RankingSnapshot {
    /// Ranks the given scores into a snapshot with no live conditions.
    pub fn from_scores(mut scores: Vec<PriorityScore>) -> Self {
        rank(&mut scores);
        Self {
            tick: 0,
            scores,
            conditions: HashMap::new(),
        }
    }

    pub fn scores(&self) -> &[PriorityScore] {
        &self.scores
    }

    pub fn get(&self, cluster_id: &str) -> Option<&PriorityScore> {
        self.scores.iter().find(|score| score.cluster_id == cluster_id)
    }

    pub fn conditions(&self) -> &HashMap<ClusterId, LiveConditions> {
        &self.conditions
    }

    pub fn conditions_for(&self, cluster_id: &str) -> Option<&LiveConditions> {
        self.conditions.get(cluster_id)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Sorts by priority score descending, breaking ties by cluster id, and assigns
/// execution orders 1..=N.
pub fn rank(scores: &mut [PriorityScore]) {
    scores.sort_by(|a, b| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });

    for (index, score) in scores.iter_mut().enumerate() {
        score.execution_order = index + 1;
    }
}

/// Owns the ranking of every known cluster and keeps it fresh.
pub struct PriorityScheduler {
    registry: Arc<ClusterRegistry>,
    sampler: TelemetrySampler,
    thresholds: RwLock<AdaptiveThresholds>,
    /// Swapped as a whole at the end of every tick.
    ranking: RwLock<Arc<RankingSnapshot>>,
    /// Serializes ticks so only one writer builds the next ranking.
    tick_lock: Mutex<()>,
}

impl PriorityScheduler {
    #[tracing::instrument(name = "PriorityScheduler::new", skip_all, fields(
        thresholds = ?thresholds
    ))]
    pub fn new(
        registry: Arc<ClusterRegistry>,
        sampler: TelemetrySampler,
        thresholds: AdaptiveThresholds,
    ) -> Self {
        Self {
            registry,
            sampler,
            thresholds: RwLock::new(thresholds),
            ranking: RwLock::new(Arc::new(RankingSnapshot::default())),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// The latest complete ranking.
    pub async fn snapshot(&self) -> Arc<RankingSnapshot> {
        Arc::clone(&*self.ranking.read().await)
    }

    pub async fn thresholds(&self) -> AdaptiveThresholds {
        self.thresholds.read().await.clone()
    }

    #[tracing::instrument(name = "PriorityScheduler::update_thresholds", skip_all, fields(
        update = ?update
    ))]
    pub async fn update_thresholds(&self, update: &ThresholdsUpdate) -> AdaptiveThresholds {
        let mut thresholds = self.thresholds.write().await;
        thresholds.apply(update);
        info!(thresholds = ?*thresholds, "adaptive thresholds updated");
        thresholds.clone()
    }

    /// Rescores every known cluster and publishes a new ranking.
    #[tracing::instrument(name = "PriorityScheduler::tick", skip_all)]
    pub async fn tick(&self) -> Arc<RankingSnapshot> {
        let _guard = self.tick_lock.lock().await;

        let cluster_ids = self.registry.ids().await;
        let samples = self.sampler.sample_all(&cluster_ids).await;

        let scorer = HealthScorer::new(self.thresholds().await);
        let previous = self.snapshot().await;
        let mut conditions = previous.conditions.clone();
        let mut scores = Vec::with_capacity(samples.len());

        for (cluster_id, sample) in samples {
            let cluster = match self.registry.get(&cluster_id).await {
                None => continue,
                Some(v) => v,
            };
            let last_score = previous.get(&cluster_id);

            match sample {
                Ok(live) => {
                    let fresh = scorer.score(&cluster, &live, cluster.is_production());
                    let score = match last_score {
                        None => fresh,
                        Some(last) => {
                            let mut rescored = PriorityScore {
                                reasoning: last.reasoning.clone(),
                                state: ScoreState::Rescored,
                                ..fresh.clone()
                            };
                            rescored.push_reasoning(fresh.reasoning);
                            rescored
                        }
                    };
                    conditions.insert(cluster_id, live);
                    scores.push(score);
                }
                Err(error) => match last_score {
                    None => {
                        warn!(%cluster_id, ?error, "cluster remains unscored");
                    }
                    Some(last) => {
                        warn!(%cluster_id, ?error, "keeping stale score");
                        let mut stale = last.clone();
                        stale.state = ScoreState::Stale;
                        stale.push_reasoning([STALE_TELEMETRY_NOTE.to_owned()]);
                        scores.push(stale);
                    }
                },
            }
        }

        rank(&mut scores);

        let snapshot = Arc::new(RankingSnapshot {
            tick: previous.tick + 1,
            scores,
            conditions,
        });

        *self.ranking.write().await = Arc::clone(&snapshot);

        info!(tick = snapshot.tick, num_scored = snapshot.len(), "ranking published");

        snapshot
    }

    /// Spawns the recurring tick loop. The first tick runs immediately.
    #[tracing::instrument(name = "PriorityScheduler::start", skip_all)]
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                select! {
                    _ = &mut shutdown_rx => {
                        info!("priority scheduler stopped");
                        return;
                    }
                    _ = self.tick() => {}
                }

                let interval = self.thresholds.read().await.tick_interval();

                select! {
                    _ = &mut shutdown_rx => {
                        info!("priority scheduler stopped");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        SchedulerHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

/// Stops the tick loop started by [`PriorityScheduler::start`].
pub struct SchedulerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl SchedulerHandle {
    #[tracing::instrument(name = "SchedulerHandle::stop", skip_all)]
    pub async fn stop(self) {
        // The loop may already be gone, in which case there is nobody to notify.
        let _ = self.shutdown_tx.send(());

        if let Err(error) = self.join_handle.await {
            error!(?error, "priority scheduler task failed");
        }
    }
}
