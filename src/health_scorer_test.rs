#[cfg(test)]
mod score_tests {
    use crate::cluster::Environment;
    use crate::config::AdaptiveThresholds;
    use crate::health_scorer::{HealthScorer, RiskLevel, ScoreState, MAX_REASONING_ENTRIES};
    use crate::test_support::{cluster, conditions, score};

    #[test]
    fn overloaded_production_cluster_in_maintenance_is_critical() {
        let cluster = cluster("prod-1", Environment::Production);
        let mut live = conditions(97.0, 6.0, 300.0);
        live.maintenance_scheduled = true;

        let score = HealthScorer::default().score(&cluster, &live, true);

        assert_eq!(RiskLevel::Critical, score.risk_level);
        assert!(score.priority_score <= 10.0);
        assert!(score.priority_score >= 0.0);
    }

    #[test]
    fn healthy_cluster_is_clamped_to_one_hundred() {
        let cluster = cluster("dev-1", Environment::Development);

        let score = HealthScorer::default().score(&cluster, &conditions(30.0, 0.5, 100.0), false);

        assert_eq!(100.0, score.priority_score);
        assert_eq!(RiskLevel::VeryLow, score.risk_level);
        assert_eq!(98.0, score.confidence_level);
        assert_eq!(ScoreState::Scored, score.state);
        assert_eq!(0, score.execution_order);
    }

    #[test]
    fn production_baseline_is_more_conservative() {
        let scorer = HealthScorer::default();
        let live = conditions(50.0, 2.0, 300.0);

        let production = scorer.score(&cluster("a", Environment::Production), &live, true);
        let staging = scorer.score(&cluster("b", Environment::Staging), &live, false);

        assert_eq!(70.0, production.priority_score);
        assert_eq!(80.0, staging.priority_score);
    }

    #[test]
    fn same_score_is_riskier_in_production() {
        assert_eq!(RiskLevel::Medium, RiskLevel::from_score(60.0, true));
        assert_eq!(RiskLevel::Low, RiskLevel::from_score(60.0, false));
        assert_eq!(RiskLevel::Critical, RiskLevel::from_score(20.0, true));
        assert_eq!(RiskLevel::High, RiskLevel::from_score(20.0, false));
    }

    #[test]
    fn high_load_and_failure_forecast_are_penalized() {
        let scorer = HealthScorer::default();

        let loaded = scorer.score(
            &cluster("a", Environment::Production),
            &conditions(85.0, 2.0, 300.0),
            true,
        );
        assert_eq!(55.0, loaded.priority_score);
        assert_eq!(RiskLevel::Medium, loaded.risk_level);

        let mut live = conditions(50.0, 2.0, 300.0);
        live.failure_probability = 15.0;
        let forecast = scorer.score(&cluster("b", Environment::Staging), &live, false);
        assert_eq!(55.0, forecast.priority_score);
        assert_eq!(RiskLevel::Low, forecast.risk_level);
    }

    #[test]
    fn slow_responses_are_penalized() {
        let score = HealthScorer::default().score(
            &cluster("a", Environment::Staging),
            &conditions(50.0, 2.0, 1_500.0),
            false,
        );

        assert_eq!(70.0, score.priority_score);
    }

    #[test]
    fn thresholds_are_configurable() {
        let scorer = HealthScorer::new(AdaptiveThresholds {
            high_load: 60.0,
            optimal_response_time_ms: 500.0,
            ..AdaptiveThresholds::default()
        });

        let score = scorer.score(
            &cluster("a", Environment::Staging),
            &conditions(70.0, 2.0, 300.0),
            false,
        );

        // -15 for load above 60, +5 for responses under 500ms.
        assert_eq!(70.0, score.priority_score);
    }

    #[test]
    fn confidence_stays_within_bounds() {
        let scorer = HealthScorer::default();
        let mut live = conditions(99.0, 9.0, 2_000.0);
        live.failure_probability = 60.0;
        live.maintenance_scheduled = true;

        let score = scorer.score(&cluster("a", Environment::Production), &live, true);

        assert_eq!(60.0, score.confidence_level);
        assert_eq!(0.0, score.priority_score);
    }

    #[test]
    fn adaptive_factors_reflect_inputs() {
        let mut live = conditions(50.0, 2.0, 320.0);
        live.load_forecast = Some(70.0);

        let score =
            HealthScorer::default().score(&cluster("a", Environment::Staging), &live, false);

        assert_eq!(20.0, score.adaptive_factors.load_trend);
        assert_eq!(60.0, score.adaptive_factors.resource_availability);
        assert_eq!(320.0, score.adaptive_factors.network_latency);
        assert!(!score.adaptive_factors.maintenance_window);
    }

    #[test]
    fn reasoning_keeps_the_most_recent_entries() {
        let mut score = score("a", 50.0, RiskLevel::Medium);

        score.push_reasoning((1..=8).map(|i| format!("entry {i}")));

        assert_eq!(MAX_REASONING_ENTRIES, score.reasoning.len());
        assert_eq!("entry 4", score.reasoning[0]);
        assert_eq!("entry 8", score.reasoning[4]);
    }
}
