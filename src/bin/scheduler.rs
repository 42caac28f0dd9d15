use clap::{Parser, Subcommand};
use fleet_remediation::{config::Config, fleet::FleetDefinition};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the priority scheduler and keep the fleet ranking fresh until ctrl-c.
    Config {
        /// Path to the config file.
        #[arg(short)]
        file: String,
        /// Path to the fleet definition.
        #[arg(long)]
        fleet: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { file, fleet } => {
            let config = Config::from_file(file).await?;
            let fleet = FleetDefinition::from_file(fleet).await?;

            info!(num_clusters = fleet.clusters.len(), "starting priority scheduler");

            let scheduler = Arc::new(fleet.scheduler(&config));
            let handle = Arc::clone(&scheduler).start();

            tokio::signal::ctrl_c().await?;

            handle.stop().await;

            let snapshot = scheduler.snapshot().await;
            println!("{}", serde_json::to_string_pretty(snapshot.scores())?);
        }
    }

    Ok(())
}
