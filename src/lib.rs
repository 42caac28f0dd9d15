pub mod cluster;
pub mod cluster_selector;
pub mod config;
pub mod coordinator;
pub mod execution_planner;
pub mod fleet;
pub mod health_scorer;
pub mod priority_scheduler;
pub mod telemetry;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod fleet_test;
#[cfg(test)]
mod health_scorer_test;
