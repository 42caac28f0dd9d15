use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use fleet_remediation::{
    cluster::ClusterId,
    cluster_selector::{ResourceRequirements, SelectionConstraints, SelectionCriteria},
    config::Config,
    coordinator::{
        ExecutionOutcome, InMemoryHistorySink, OutcomeStatus, RemediationAction,
        RemediationCoordinator, RemediationExecutor, RemediationRequest, TargetSelection,
    },
    execution_planner::{ExecutionPlanner, ExecutionStrategy},
    fleet::FleetDefinition,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the fleet definition.
    #[arg(long, global = true, default_value = "fleet.yml")]
    fleet: String,
    /// Path to the config file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score the fleet once and print the ranking.
    Rank,
    /// Pick the best cluster for the given resource requirements.
    Select {
        #[arg(long, default_value_t = 0.0)]
        cpu: f64,
        #[arg(long, default_value_t = 0.0)]
        memory: f64,
        #[arg(long, default_value_t = 0.0)]
        storage: f64,
        /// Regions to prefer on ties.
        #[arg(long)]
        region: Vec<String>,
    },
    /// List clusters passing the criteria, ordered by a load balancing strategy.
    Pick {
        /// round-robin, least-loaded, capacity-based or geographic.
        #[arg(short, long, default_value = "least-loaded")]
        strategy: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        #[arg(long, default_value_t = 85.0)]
        max_utilization: f64,
        #[arg(long, default_value_t = 50.0)]
        min_health: f64,
        /// Regions the geographic strategy puts first.
        #[arg(long)]
        region: Vec<String>,
        #[arg(long)]
        exclude: Vec<ClusterId>,
    },
    /// Print the execution plan for a set of clusters.
    Plan {
        /// conservative, balanced, aggressive or emergency.
        #[arg(short, long)]
        strategy: String,
        /// sequential, parallel or canary.
        #[arg(long, default_value = "sequential")]
        sync_policy: String,
        clusters: Vec<ClusterId>,
    },
    /// Plan and run a remediation without touching any cluster.
    Remediate {
        #[arg(short, long)]
        action: String,
        #[arg(short, long)]
        strategy: Option<String>,
        #[arg(long, default_value = "sequential")]
        sync_policy: String,
        clusters: Vec<ClusterId>,
    },
}

/// Reports every cluster as remediated instantly.
struct DryRunExecutor;

#[async_trait]
impl RemediationExecutor for DryRunExecutor {
    async fn execute(
        &self,
        cluster_id: &ClusterId,
        action: &RemediationAction,
    ) -> Result<ExecutionOutcome> {
        info!(%cluster_id, action = %action.name, "dry run");
        Ok(ExecutionOutcome {
            status: OutcomeStatus::Success,
            duration_secs: 0.0,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(file) => Config::from_file(file).await?,
        None => Config::default(),
    };
    let fleet = FleetDefinition::from_file(&cli.fleet).await?;

    let scheduler = Arc::new(fleet.scheduler(&config));
    scheduler.tick().await;

    let history = Arc::new(InMemoryHistorySink::new());
    let coordinator =
        RemediationCoordinator::new(scheduler, Arc::new(DryRunExecutor), history.clone());

    match cli.command {
        Commands::Rank => {
            let ranking = coordinator.get_prioritized_clusters().await;
            println!("{}", serde_json::to_string_pretty(&ranking)?);
        }
        Commands::Select {
            cpu,
            memory,
            storage,
            region,
        } => {
            let requirements = ResourceRequirements {
                cpu,
                memory,
                storage,
            };
            let constraints = SelectionConstraints {
                preferred_regions: region,
                ..SelectionConstraints::default()
            };
            let selection = coordinator
                .select_best_cluster(&requirements, &constraints)
                .await?;
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
        Commands::Pick {
            strategy,
            count,
            max_utilization,
            min_health,
            region,
            exclude,
        } => {
            let criteria = SelectionCriteria {
                max_utilization,
                min_health_score: min_health,
                preferred_regions: region,
                strategy: strategy.parse()?,
            };
            let exclude: HashSet<ClusterId> = exclude.into_iter().collect();
            let selected = coordinator
                .select_clusters(&criteria, count, &exclude)
                .await?;
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        Commands::Plan {
            strategy,
            sync_policy,
            clusters,
        } => {
            let snapshot = coordinator.scheduler().snapshot().await;
            let plan = ExecutionPlanner::new(&snapshot).plan_with_policy(
                &clusters,
                strategy.parse()?,
                sync_policy.parse()?,
            )?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Remediate {
            action,
            strategy,
            sync_policy,
            clusters,
        } => {
            let mut request = RemediationRequest::new(
                RemediationAction {
                    name: action.clone(),
                    description: action,
                },
                TargetSelection::Clusters(clusters),
            )
            .with_sync_policy(sync_policy.parse()?);
            if let Some(strategy) = strategy {
                request = request.with_strategy(strategy.parse::<ExecutionStrategy>()?);
            }

            let (plan, status) = coordinator.remediate(request).await?;
            info!(plan_id = %plan.id, %status, "remediation finished");

            println!("{}", serde_json::to_string_pretty(&history.records().await)?);
        }
    }

    Ok(())
}
