//! Simulation configuration
//!
//! `SimulationConfig` is everything the engine needs for one run. It is
//! plain serde data so it can be loaded from YAML/JSON and hashed for the
//! result cache.
//!
//! ```ignore
//! use riskcast_core::{SimulationConfig, Risk, RiskDistribution, ImpactType, RiskId};
//!
//! let config = SimulationConfig::new(vec![
//!     Risk::new(RiskId(1), "Steel price", ImpactType::Cost,
//!         RiskDistribution::three_point(50_000.0, 120_000.0, 250_000.0)?),
//! ])
//! .iterations(20_000)
//! .seed(42)
//! .baseline_cost("Construction", 1_000_000.0);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::io;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationMatrix;
use crate::error::{ConfigError, SimulationError};
use crate::model::{ImpactType, Risk, RiskId};

/// Smallest iteration count the engine accepts
pub const MIN_ITERATIONS: usize = 10_000;

/// Default cap on per-iteration samples kept in a result
pub const DEFAULT_MAX_RETAINED_SAMPLES: usize = 50_000;

fn default_iterations() -> usize {
    MIN_ITERATIONS
}

fn default_max_retained() -> usize {
    DEFAULT_MAX_RETAINED_SAMPLES
}

fn default_burn_in() -> f64 {
    0.2
}

fn default_window() -> usize {
    5
}

fn default_tolerance() -> f64 {
    0.005
}

/// Running-mean stability check applied at batch boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Fraction of batches ignored before the check starts
    #[serde(default = "default_burn_in")]
    pub burn_in_fraction: f64,
    /// Number of trailing batches the relative change is measured over
    #[serde(default = "default_window")]
    pub window_batches: usize,
    /// Largest relative change of the cumulative mean still considered stable
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            burn_in_fraction: default_burn_in(),
            window_batches: default_window(),
            tolerance: default_tolerance(),
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.burn_in_fraction) {
            return Err(ConfigError::InvalidConvergence(
                "burn_in_fraction must be in [0, 1)",
            ));
        }
        if self.window_batches == 0 {
            return Err(ConfigError::InvalidConvergence(
                "window_batches must be at least 1",
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidConvergence(
                "tolerance must be positive and finite",
            ));
        }
        Ok(())
    }
}

/// Complete input for one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Risks in simulation order; correlation rows follow this order
    pub risks: Vec<Risk>,
    #[serde(default = "default_iterations")]
    pub iteration_count: usize,
    /// Fixed seed for reproducible runs; a fresh one is drawn when absent
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub correlation: Option<CorrelationMatrix>,
    /// Fixed cost items added to every iteration's cost total
    #[serde(default)]
    pub baseline_costs: BTreeMap<String, f64>,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default = "default_max_retained")]
    pub max_retained_samples: usize,
}

impl SimulationConfig {
    #[must_use]
    pub fn new(risks: Vec<Risk>) -> Self {
        Self {
            risks,
            iteration_count: MIN_ITERATIONS,
            random_seed: None,
            correlation: None,
            baseline_costs: BTreeMap::new(),
            convergence: ConvergenceConfig::default(),
            max_retained_samples: DEFAULT_MAX_RETAINED_SAMPLES,
        }
    }

    #[must_use]
    pub fn iterations(mut self, iteration_count: usize) -> Self {
        self.iteration_count = iteration_count;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn correlation(mut self, matrix: CorrelationMatrix) -> Self {
        self.correlation = Some(matrix);
        self
    }

    #[must_use]
    pub fn baseline_cost(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.baseline_costs.insert(name.into(), amount);
        self
    }

    #[must_use]
    pub fn convergence_settings(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }

    #[must_use]
    pub fn max_retained_samples(mut self, max: usize) -> Self {
        self.max_retained_samples = max;
        self
    }

    #[must_use]
    pub fn risk(&self, id: RiskId) -> Option<&Risk> {
        self.risks.iter().find(|r| r.id == id)
    }

    #[must_use]
    pub fn risk_index(&self, id: RiskId) -> Option<usize> {
        self.risks.iter().position(|r| r.id == id)
    }

    /// Whether any output of `impact` is produced (cost also counts baseline items)
    #[must_use]
    pub fn simulates(&self, impact: ImpactType) -> bool {
        self.risks.iter().any(|r| r.impact_type == impact)
            || (impact == ImpactType::Cost && !self.baseline_costs.is_empty())
    }

    #[must_use]
    pub fn baseline_cost_total(&self) -> f64 {
        self.baseline_costs.values().sum()
    }

    /// Structural and numerical validation. Nothing is simulated if this fails.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.risks.is_empty() {
            return Err(ConfigError::NoRisks.into());
        }
        if self.iteration_count < MIN_ITERATIONS {
            return Err(ConfigError::TooFewIterations {
                requested: self.iteration_count,
                minimum: MIN_ITERATIONS,
            }
            .into());
        }

        let mut seen = BTreeSet::new();
        for risk in &self.risks {
            if !seen.insert(risk.id) {
                return Err(ConfigError::DuplicateRiskId(risk.id).into());
            }
            if !(0.0..=1.0).contains(&risk.probability) {
                return Err(ConfigError::InvalidProbability {
                    risk_id: risk.id,
                    value: risk.probability,
                }
                .into());
            }
            risk.distribution()?;
        }

        for (name, amount) in &self.baseline_costs {
            if !amount.is_finite() {
                return Err(ConfigError::InvalidBaselineCost {
                    name: name.clone(),
                    value: *amount,
                }
                .into());
            }
        }

        self.convergence.validate()?;

        if let Some(matrix) = &self.correlation {
            matrix.validate_for(self.risks.len())?;
        }
        Ok(())
    }

    /// Stable 64-bit hash of the canonical JSON encoding of every field.
    ///
    /// Used as the cache key, so any change to any field yields a new key.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        // Writing into a hasher never fails and the config has only string map keys
        let _ = serde_json::to_writer(HashWriter(&mut hasher), self);
        hasher.finish()
    }
}

struct HashWriter<'a>(&'a mut FxHasher);

impl io::Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CorrelationError, MatrixProperty};
    use crate::model::RiskDistribution;

    fn risk(id: u32) -> Risk {
        Risk::new(
            RiskId(id),
            format!("risk {id}"),
            ImpactType::Cost,
            RiskDistribution::Normal {
                mean: 100.0,
                std_dev: 10.0,
            },
        )
    }

    #[test]
    fn test_rejects_empty_and_short_runs() {
        assert!(matches!(
            SimulationConfig::new(vec![]).validate(),
            Err(SimulationError::Configuration(ConfigError::NoRisks))
        ));
        assert!(matches!(
            SimulationConfig::new(vec![risk(1)]).iterations(9_999).validate(),
            Err(SimulationError::Configuration(ConfigError::TooFewIterations {
                requested: 9_999,
                minimum: MIN_ITERATIONS
            }))
        ));
        assert!(SimulationConfig::new(vec![risk(1)]).validate().is_ok());
    }

    #[test]
    fn test_rejects_duplicate_ids_and_bad_probability() {
        let config = SimulationConfig::new(vec![risk(1), risk(1)]);
        assert!(matches!(
            config.validate(),
            Err(SimulationError::Configuration(ConfigError::DuplicateRiskId(RiskId(1))))
        ));

        let config = SimulationConfig::new(vec![risk(1).probability(1.5)]);
        assert!(matches!(
            config.validate(),
            Err(SimulationError::Configuration(ConfigError::InvalidProbability { .. }))
        ));
    }

    #[test]
    fn test_rejects_correlation_of_wrong_size() {
        let config =
            SimulationConfig::new(vec![risk(1), risk(2)]).correlation(CorrelationMatrix::identity(3));
        match config.validate() {
            Err(SimulationError::Correlation(CorrelationError::InvalidCorrelationMatrix(
                MatrixProperty::DimensionMismatch { expected, actual },
            ))) => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_distribution_names_the_risk() {
        let mut bad = risk(7);
        bad.distribution_parameters.insert("std_dev".into(), -1.0);
        match SimulationConfig::new(vec![bad]).validate() {
            Err(SimulationError::Validation(err)) => {
                assert_eq!(err.risk_id, Some(RiskId(7)));
                assert_eq!(err.parameter, "std_dev");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_content_hash_tracks_every_field() {
        let base = SimulationConfig::new(vec![risk(1)]).seed(1);
        assert_eq!(base.content_hash(), base.clone().content_hash());
        assert_ne!(base.content_hash(), base.clone().seed(2).content_hash());
        assert_ne!(base.content_hash(), base.clone().iterations(20_000).content_hash());
        assert_ne!(
            base.content_hash(),
            base.clone().baseline_cost("Fees", 1.0).content_hash()
        );
        let mut tweaked = base.clone();
        tweaked.risks[0].probability = 0.99;
        assert_ne!(base.content_hash(), tweaked.content_hash());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{
            "risks": [{
                "id": 1, "name": "Permit", "category": "regulatory",
                "impact_type": "schedule", "distribution_type": "uniform",
                "distribution_parameters": {"min": 5.0, "max": 30.0}
            }]
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.iteration_count, MIN_ITERATIONS);
        assert_eq!(config.convergence, ConvergenceConfig::default());
        assert_eq!(config.max_retained_samples, DEFAULT_MAX_RETAINED_SAMPLES);
        assert!(config.validate().is_ok());
        assert!(config.simulates(ImpactType::Schedule));
        assert!(!config.simulates(ImpactType::Cost));
    }
}
