use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterId};
use crate::config::AdaptiveThresholds;
use crate::telemetry::LiveConditions;

/// Number of reasoning entries retained per cluster.
pub const MAX_REASONING_ENTRIES: usize = 5;

const PRODUCTION_BASELINE: f64 = 70.0;
const NON_PRODUCTION_BASELINE: f64 = 80.0;
const BASE_CONFIDENCE: f64 = 85.0;
const MIN_CONFIDENCE: f64 = 60.0;
const MAX_CONFIDENCE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Maps a clamped priority score to a risk level. Production clusters use
    /// stricter cut-offs, so the same score can be riskier in production.
    pub fn from_score(score: f64, is_production: bool) -> Self {
        let (very_low, low, medium, high) = if is_production {
            (80.0, 65.0, 45.0, 25.0)
        } else {
            (70.0, 55.0, 35.0, 15.0)
        };

        if score >= very_low {
            RiskLevel::VeryLow
        } else if score >= low {
            RiskLevel::Low
        } else if score >= medium {
            RiskLevel::Medium
        } else if score >= high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    /// Multiplier applied to a cluster's remediation duration estimate.
    pub fn duration_multiplier(self) -> f64 {
        match self {
            RiskLevel::Critical => 2.0,
            RiskLevel::High => 1.5,
            RiskLevel::Medium | RiskLevel::Low | RiskLevel::VeryLow => 1.0,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::VeryLow => "very-low",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Signals that feed the score and are kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFactors {
    /// Forecast load minus current load. Positive means load is rising.
    pub load_trend: f64,
    /// Headroom left on the most utilized resource, in percent.
    pub resource_availability: f64,
    /// Response time in milliseconds.
    pub network_latency: f64,
    pub maintenance_window: bool,
}

/// Where a score entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreState {
    Scored,
    /// The last refresh failed and the previous score was kept.
    Stale,
    Rescored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityScore {
    pub cluster_id: ClusterId,
    /// In [0, 100]. Higher means healthier and safer to remediate first.
    pub priority_score: f64,
    pub risk_level: RiskLevel,
    /// 1-based rank across all scored clusters. Zero until ranked.
    pub execution_order: usize,
    /// In [60, 100].
    pub confidence_level: f64,
    /// Most recent entries last.
    pub reasoning: Vec<String>,
    pub adaptive_factors: AdaptiveFactors,
    pub state: ScoreState,
    pub is_production: bool,
}

impl PriorityScore {
    /// Appends to the reasoning trail, dropping the oldest entries past the limit.
    pub fn push_reasoning(&mut self, entries: impl IntoIterator<Item = String>) {
        self.reasoning.extend(entries);
        if self.reasoning.len() > MAX_REASONING_ENTRIES {
            let excess = self.reasoning.len() - MAX_REASONING_ENTRIES;
            self.reasoning.drain(..excess);
        }
    }
}

/// Turns static cluster attributes and live conditions into a priority score.
#[derive(Debug, Clone, Default)]
pub struct HealthScorer {
    thresholds: AdaptiveThresholds,
}

impl HealthScorer {
    pub fn new(thresholds: AdaptiveThresholds) -> Self {
        Self { thresholds }
    }

    #[tracing::instrument(name = "HealthScorer::score", skip_all, fields(
        cluster_id = %cluster.id,
        is_production
    ))]
    pub fn score(
        &self,
        cluster: &Cluster,
        conditions: &LiveConditions,
        is_production: bool,
    ) -> PriorityScore {
        let mut reasoning = Vec::new();
        let mut score = if is_production {
            PRODUCTION_BASELINE
        } else {
            NON_PRODUCTION_BASELINE
        };

        let load = conditions.current_load;
        if load > self.thresholds.critical_load {
            score -= 30.0;
            reasoning.push(format!("critical load {load:.1}% (-30)"));
        } else if load > self.thresholds.high_load {
            score -= 15.0;
            reasoning.push(format!("high load {load:.1}% (-15)"));
        } else if load < 40.0 {
            score += 10.0;
            reasoning.push(format!("low load {load:.1}% (+10)"));
        }

        let error_rate = conditions.error_rate;
        if error_rate > 5.0 {
            score -= 20.0;
            reasoning.push(format!("high error rate {error_rate:.2}% (-20)"));
        } else if error_rate < 1.0 {
            score += 5.0;
            reasoning.push(format!("low error rate {error_rate:.2}% (+5)"));
        }

        let response_time = conditions.response_time_ms;
        if response_time > 1_000.0 {
            score -= 10.0;
            reasoning.push(format!("slow responses {response_time:.0}ms (-10)"));
        } else if response_time < self.thresholds.optimal_response_time_ms {
            score += 5.0;
            reasoning.push(format!("fast responses {response_time:.0}ms (+5)"));
        }

        if conditions.failure_probability > 10.0 {
            score -= 25.0;
            reasoning.push(format!(
                "predicted failure probability {:.1}% (-25)",
                conditions.failure_probability
            ));
        }

        if conditions.maintenance_scheduled {
            score -= 40.0;
            reasoning.push("maintenance scheduled (-40)".to_owned());
        }

        let score = score.clamp(0.0, 100.0);
        let risk_level = RiskLevel::from_score(score, is_production);

        let mut priority_score = PriorityScore {
            cluster_id: cluster.id.clone(),
            priority_score: score,
            risk_level,
            execution_order: 0,
            confidence_level: self.confidence(conditions),
            reasoning: Vec::new(),
            adaptive_factors: AdaptiveFactors {
                load_trend: conditions
                    .load_forecast
                    .map(|forecast| forecast - load)
                    .unwrap_or(0.0),
                resource_availability: 100.0 - cluster.utilization.max_utilization(),
                network_latency: response_time,
                maintenance_window: conditions.maintenance_scheduled,
            },
            state: ScoreState::Scored,
            is_production,
        };

        reasoning.push(format!("score {score:.1}, risk {risk_level}"));
        priority_score.push_reasoning(reasoning);

        priority_score
    }

    fn confidence(&self, conditions: &LiveConditions) -> f64 {
        let mut confidence = BASE_CONFIDENCE;

        if conditions.error_rate < 1.0 {
            confidence += 5.0;
        }
        if conditions.response_time_ms < self.thresholds.optimal_response_time_ms {
            confidence += 3.0;
        }
        if conditions.failure_probability < 5.0 {
            confidence += 5.0;
        }
        if conditions.current_load > 85.0 {
            confidence -= 10.0;
        }
        if conditions.maintenance_scheduled {
            confidence -= 15.0;
        }

        confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}
