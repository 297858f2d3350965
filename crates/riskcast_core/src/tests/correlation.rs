//! Tests for correlated sampling
//!
//! These tests verify that:
//! - Sampled risks reproduce the requested correlation matrix
//! - A pairwise 0.8 correlation holds over a long run
//! - Correlation does not distort each risk's marginal distribution
//! - Perfectly correlated risks move together exactly
//! - Dependency lists produce the expected pairwise correlation

use crate::analysis::{RunningStats, percentile};
use crate::config::SimulationConfig;
use crate::correlation::{CorrelationMatrix, empirical_correlation};
use crate::engine::MonteCarloEngine;
use crate::model::{ImpactType, Risk, RiskDistribution, RiskId, SimulationResult};

const ITERATIONS: usize = 20_000;

fn normal(id: u32, mean: f64, std_dev: f64) -> Risk {
    Risk::new(
        RiskId(id),
        format!("Risk {id}"),
        ImpactType::Cost,
        RiskDistribution::Normal { mean, std_dev },
    )
}

fn run(config: SimulationConfig) -> std::sync::Arc<SimulationResult> {
    MonteCarloEngine::new()
        .run_simulation(&config.iterations(ITERATIONS).max_retained_samples(ITERATIONS))
        .unwrap()
}

fn samples(result: &SimulationResult, id: u32) -> &[f64] {
    result.samples.risk(RiskId(id)).unwrap()
}

#[test]
fn test_empirical_correlation_matches_target() {
    let target = CorrelationMatrix::new(vec![
        vec![1.0, 0.6, -0.3],
        vec![0.6, 1.0, 0.2],
        vec![-0.3, 0.2, 1.0],
    ])
    .unwrap();
    let result = run(SimulationConfig::new(vec![
        normal(1, 100.0, 10.0),
        normal(2, 50.0, 5.0),
        normal(3, 200.0, 40.0),
    ])
    .correlation(target.clone())
    .seed(17));

    assert_eq!(result.samples.stride, 1);
    let columns = [samples(&result, 1), samples(&result, 2), samples(&result, 3)];
    let measured = CorrelationMatrix::empirical(&columns);
    for i in 0..3 {
        for j in 0..3 {
            assert!(
                (measured.get(i, j) - target.get(i, j)).abs() <= 0.03,
                "({i}, {j}): measured {} target {}",
                measured.get(i, j),
                target.get(i, j)
            );
        }
    }
}

#[test]
fn test_pairwise_correlation_over_long_run() {
    const LONG_RUN: usize = 50_000;
    let matrix = CorrelationMatrix::new(vec![vec![1.0, 0.8], vec![0.8, 1.0]]).unwrap();
    let config = SimulationConfig::new(vec![normal(1, 100.0, 10.0), normal(2, 40.0, 8.0)])
        .correlation(matrix)
        .seed(42)
        .iterations(LONG_RUN)
        .max_retained_samples(LONG_RUN);
    let result = MonteCarloEngine::new().run_simulation(&config).unwrap();

    assert_eq!(samples(&result, 1).len(), LONG_RUN);
    let r = empirical_correlation(samples(&result, 1), samples(&result, 2));
    assert!((r - 0.8).abs() < 0.05, "empirical correlation {r}");
}

#[test]
fn test_marginals_survive_correlation() {
    let uniform = Risk::new(
        RiskId(1),
        "Uniform",
        ImpactType::Cost,
        RiskDistribution::Uniform {
            min: 0.0,
            max: 100.0,
        },
    );
    let triangular = Risk::new(
        RiskId(2),
        "Triangular",
        ImpactType::Cost,
        RiskDistribution::three_point(10.0, 20.0, 60.0).unwrap(),
    );
    let matrix = CorrelationMatrix::new(vec![vec![1.0, 0.8], vec![0.8, 1.0]]).unwrap();
    let result = run(SimulationConfig::new(vec![uniform, triangular])
        .correlation(matrix)
        .seed(99));

    let u: RunningStats = samples(&result, 1).iter().copied().collect();
    assert!((u.mean - 50.0).abs() < 1.0);
    assert!((u.variance() - 10_000.0 / 12.0).abs() < 40.0);
    assert!(u.min >= 0.0 && u.max <= 100.0);

    let mut t = samples(&result, 2).to_vec();
    t.sort_by(f64::total_cmp);
    let t_mean = t.iter().sum::<f64>() / t.len() as f64;
    assert!((t_mean - 30.0).abs() < 0.5);
    assert!(t[0] >= 10.0 && t[t.len() - 1] <= 60.0);
    // Triangular median: c - sqrt((c - a)(c - b) / 2) = 60 - sqrt(1000)
    let median = 60.0 - 1_000f64.sqrt();
    assert!((percentile(&t, 0.5) - median).abs() < 0.6);

    assert!(empirical_correlation(samples(&result, 1), samples(&result, 2)) > 0.7);
}

#[test]
fn test_perfectly_correlated_risks_move_together() {
    let matrix = CorrelationMatrix::new(vec![vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
    let result = run(SimulationConfig::new(vec![normal(1, 10.0, 2.0), normal(2, 10.0, 2.0)])
        .correlation(matrix)
        .seed(5));
    assert_eq!(samples(&result, 1), samples(&result, 2));
}

#[test]
fn test_identity_matrix_matches_independent_run() {
    let risks = vec![normal(1, 10.0, 2.0), normal(2, 30.0, 6.0)];
    let independent = run(SimulationConfig::new(risks.clone()).seed(8));
    let identity = run(SimulationConfig::new(risks)
        .correlation(CorrelationMatrix::identity(2))
        .seed(8));
    assert_eq!(independent.cost, identity.cost);
    assert_ne!(independent.config_hash, identity.config_hash);
}

#[test]
fn test_dependency_list_correlation() {
    let risks = vec![
        normal(1, 10.0, 2.0),
        normal(2, 30.0, 6.0).depends_on(RiskId(1)),
        normal(3, 5.0, 1.0),
    ];
    let matrix = CorrelationMatrix::from_dependencies(&risks, 0.5);
    let result = run(SimulationConfig::new(risks).correlation(matrix).seed(21));

    let linked = empirical_correlation(samples(&result, 1), samples(&result, 2));
    let unlinked = empirical_correlation(samples(&result, 1), samples(&result, 3));
    assert!((linked - 0.5).abs() <= 0.03);
    assert!(unlinked.abs() <= 0.03);
}

#[test]
fn test_dense_dependency_graph_still_runs() {
    let risks = vec![
        normal(1, 10.0, 2.0),
        normal(2, 30.0, 6.0).depends_on(RiskId(1)),
        normal(3, 5.0, 1.0).depends_on(RiskId(1)),
        normal(4, 8.0, 1.5).depends_on(RiskId(1)),
    ];
    let matrix = CorrelationMatrix::from_dependencies(&risks, 0.9);
    assert!(matrix.validate_for(4).is_ok());
    let result = run(SimulationConfig::new(risks).correlation(matrix.clone()).seed(31));

    for spoke in 2..=4 {
        let r = empirical_correlation(samples(&result, 1), samples(&result, spoke));
        assert!((r - matrix.get(0, 1)).abs() <= 0.03, "hub-{spoke} correlation {r}");
    }
}

#[test]
fn test_correlation_widens_total_spread() {
    let risks = vec![normal(1, 100.0, 10.0), normal(2, 100.0, 10.0)];
    let matrix = CorrelationMatrix::new(vec![vec![1.0, 0.9], vec![0.9, 1.0]]).unwrap();
    let independent = run(SimulationConfig::new(risks.clone()).seed(3));
    let correlated = run(SimulationConfig::new(risks).correlation(matrix).seed(3));

    let spread = |r: &SimulationResult| r.cost.as_ref().unwrap().std_dev;
    // sqrt(200) ~ 14.1 independent, sqrt(380) ~ 19.5 correlated
    assert!((spread(&independent) - 200f64.sqrt()).abs() < 0.5);
    assert!((spread(&correlated) - 380f64.sqrt()).abs() < 0.5);
}
