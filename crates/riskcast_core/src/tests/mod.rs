//! Integration tests for the risk simulation engine
//!
//! Tests are organized by topic:
//! - `engine` - Reproducibility, caching, cancellation and error reporting
//! - `correlation` - Correlated sampling and marginal preservation
//! - `scenarios` - What-if scenarios, mitigation and sensitivity analysis
//! - `calibration` - Pattern fitting from historical outcomes
//! - `properties` - Property-based checks on distributions and statistics

mod correlation;

use crate::config::SimulationConfig;
use crate::model::{ImpactType, Risk, RiskDistribution, RiskId};

/// Three cost risks and one schedule risk, seeded
fn sample_config(seed: u64) -> SimulationConfig {
    SimulationConfig::new(vec![
        Risk::new(
            RiskId(1),
            "Ground conditions",
            ImpactType::Cost,
            RiskDistribution::three_point(50_000.0, 120_000.0, 250_000.0).unwrap(),
        ),
        Risk::new(
            RiskId(2),
            "Steel price",
            ImpactType::Cost,
            RiskDistribution::Normal {
                mean: 80_000.0,
                std_dev: 15_000.0,
            },
        )
        .probability(0.9),
        Risk::new(
            RiskId(3),
            "Design rework",
            ImpactType::Cost,
            RiskDistribution::pert(5_000.0, 10_000.0, 40_000.0).unwrap(),
        )
        .probability(0.3),
        Risk::new(
            RiskId(4),
            "Permit delay",
            ImpactType::Schedule,
            RiskDistribution::LogNormal {
                mu: 2.5,
                sigma: 0.4,
            },
        ),
    ])
    .seed(seed)
}
