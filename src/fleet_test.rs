use anyhow::Result;
use std::io::Write;

use tempfile::NamedTempFile;

fn fleet_file(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    write!(&mut file, "{contents}")?;
    Ok(file)
}

#[cfg(test)]
mod fleet_from_file_tests {
    use crate::cluster::{ClusterStatus, Environment, Provider};
    use crate::config::Config;
    use crate::fleet::{FleetDefinition, FleetError};
    use crate::telemetry::LiveConditions;

    use super::*;

    #[tokio::test]
    async fn reads_fleet_definition() -> Result<()> {
        let file = fleet_file(
            r#"
apiVersion: v1
clusters:
  - id: prod-us-east
    name: Production US East
    region: us-east-1
    zone: us-east-1a
    provider: aws
    environment: production
    nodeCount: 12
    podCapacity: 1200
    utilization:
      cpu: 55
      memory: 140
      storage: 30
      network: 20
    conditions:
      currentLoad: 62
      responseTimeMs: 180
      errorRate: 0.4
      throughput: 5400
      activeConnections: 900
  - id: staging-eu
    region: eu-west-1
    provider: on-premise
    environment: staging
    status: degraded
    nodeCount: 3
    podCapacity: 300
"#,
        )?;

        let fleet = FleetDefinition::from_file(file.path()).await?;
        let clusters = fleet.clusters();

        assert_eq!(2, clusters.len());
        assert_eq!("Production US East", clusters[0].name);
        assert_eq!(Provider::Aws, clusters[0].provider);
        assert_eq!(100.0, clusters[0].utilization.memory);

        assert_eq!("staging-eu", clusters[1].name);
        assert_eq!(Provider::OnPremise, clusters[1].provider);
        assert_eq!(Environment::Staging, clusters[1].environment);
        assert_eq!(ClusterStatus::Degraded, clusters[1].status);

        let conditions = fleet.conditions();
        assert_eq!(62.0, conditions[0].1.current_load);
        assert_eq!(LiveConditions::nominal(), conditions[1].1);

        let scheduler = fleet.scheduler(&Config::default());
        let snapshot = scheduler.tick().await;
        assert_eq!(2, snapshot.len());

        Ok(())
    }

    #[tokio::test]
    async fn cluster_region_is_required() -> Result<()> {
        let file = fleet_file(
            r#"
apiVersion: v1
clusters:
  - id: a
    region: us-east-1
    provider: gcp
    environment: development
    nodeCount: 1
    podCapacity: 100
  - id: b
    region: ""
    provider: gcp
    environment: development
    nodeCount: 1
    podCapacity: 100
"#,
        )?;

        let error = FleetDefinition::from_file(file.path()).await.unwrap_err();

        assert_eq!(
            FleetError::MissingField("clusters[1].region".to_owned()),
            error.downcast()?
        );

        Ok(())
    }

    #[tokio::test]
    async fn cluster_ids_must_be_unique() -> Result<()> {
        let file = fleet_file(
            r#"
apiVersion: v1
clusters:
  - id: a
    region: us-east-1
    provider: azure
    environment: production
    nodeCount: 1
    podCapacity: 100
  - id: a
    region: us-west-2
    provider: azure
    environment: production
    nodeCount: 1
    podCapacity: 100
"#,
        )?;

        let error = FleetDefinition::from_file(file.path()).await.unwrap_err();

        assert_eq!(FleetError::DuplicateCluster("a".to_owned()), error.downcast()?);

        Ok(())
    }

    #[tokio::test]
    async fn fleet_needs_at_least_one_cluster() -> Result<()> {
        let file = fleet_file("apiVersion: v1\nclusters: []\n")?;

        let error = FleetDefinition::from_file(file.path()).await.unwrap_err();

        assert_eq!(FleetError::EmptyFleet, error.downcast()?);

        Ok(())
    }
}
