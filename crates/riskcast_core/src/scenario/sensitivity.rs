//! One-at-a-time sensitivity sweeps (tornado analysis).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{ParameterDelta, ScenarioGenerator};
use crate::config::SimulationConfig;
use crate::engine::MonteCarloEngine;
use crate::error::{ConfigError, Result};
use crate::model::{ImpactType, RiskId};

/// What a sensitivity factor varies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorTarget {
    /// Multiplier on the risk's impact distribution
    ImpactScale { risk_id: RiskId },
    /// Occurrence probability
    Probability { risk_id: RiskId },
    /// One named distribution parameter
    Parameter { risk_id: RiskId, name: String },
    /// A fixed baseline cost item
    BaselineCost { name: String },
}

/// Sweep definition for one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityFactor {
    pub label: String,
    pub target: FactorTarget,
    pub min_value: f64,
    pub max_value: f64,
    /// Number of points in the sweep
    pub step_count: usize,
}

impl SensitivityFactor {
    #[must_use]
    pub fn impact_scale(risk_id: RiskId, min: f64, max: f64, steps: usize) -> Self {
        Self {
            label: format!("Impact scale (risk {risk_id})"),
            target: FactorTarget::ImpactScale { risk_id },
            min_value: min,
            max_value: max,
            step_count: steps,
        }
    }

    #[must_use]
    pub fn probability(risk_id: RiskId, min: f64, max: f64, steps: usize) -> Self {
        Self {
            label: format!("Probability (risk {risk_id})"),
            target: FactorTarget::Probability { risk_id },
            min_value: min,
            max_value: max,
            step_count: steps,
        }
    }

    /// Evenly spaced sweep values from `min_value` to `max_value`
    #[must_use]
    pub fn sweep_values(&self) -> Vec<f64> {
        if self.step_count <= 1 {
            return vec![self.min_value];
        }
        let step_size = (self.max_value - self.min_value) / (self.step_count - 1) as f64;
        (0..self.step_count)
            .map(|i| self.min_value + step_size * i as f64)
            .collect()
    }

    /// Risk whose own value the factor moves, if any
    #[must_use]
    pub fn risk_id(&self) -> Option<RiskId> {
        match &self.target {
            FactorTarget::ImpactScale { risk_id }
            | FactorTarget::Probability { risk_id }
            | FactorTarget::Parameter { risk_id, .. } => Some(*risk_id),
            FactorTarget::BaselineCost { .. } => None,
        }
    }

    /// Delta that sets this factor to `value`
    #[must_use]
    pub fn delta(&self, value: f64) -> ParameterDelta {
        match &self.target {
            FactorTarget::ImpactScale { risk_id } => ParameterDelta::ScaleImpact {
                risk_id: *risk_id,
                factor: value,
            },
            FactorTarget::Probability { risk_id } => ParameterDelta::SetProbability {
                risk_id: *risk_id,
                probability: value,
            },
            FactorTarget::Parameter { risk_id, name } => ParameterDelta::SetParameter {
                risk_id: *risk_id,
                name: name.clone(),
                value,
            },
            FactorTarget::BaselineCost { name } => ParameterDelta::SetBaselineCost {
                name: name.clone(),
                amount: value,
            },
        }
    }
}

/// One bar of the tornado chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TornadoEntry {
    pub label: String,
    pub impact: ImpactType,
    pub values: Vec<f64>,
    /// Expected `impact` at each sweep value
    pub means: Vec<f64>,
    pub low: f64,
    pub high: f64,
    /// `high - low`
    pub swing: f64,
    /// `impact` of the unmodified base: the simulated mean, or every risk at
    /// its baseline for a baseline sweep
    pub base_mean: f64,
    /// 1-based rank by swing
    pub rank: usize,
}

/// Expected `impact` of `config` with every risk held at its
/// `baseline_impact`, except `target`, which contributes its expected value
/// `probability * mean`.
fn baseline_outcome(
    config: &SimulationConfig,
    impact: ImpactType,
    target: Option<RiskId>,
) -> Result<f64> {
    let mut total = match impact {
        ImpactType::Cost => config.baseline_cost_total(),
        ImpactType::Schedule => 0.0,
    };
    for risk in config.risks.iter().filter(|r| r.impact_type == impact) {
        total += if Some(risk.id) == target {
            risk.probability * risk.distribution()?.mean()
        } else {
            risk.baseline_impact
        };
    }
    Ok(total)
}

fn tornado_entry(
    factor: &SensitivityFactor,
    impact: ImpactType,
    values: Vec<f64>,
    means: Vec<f64>,
    base_mean: f64,
) -> TornadoEntry {
    let low = means.iter().copied().fold(f64::INFINITY, f64::min);
    let high = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    TornadoEntry {
        label: factor.label.clone(),
        impact,
        values,
        means,
        low,
        high,
        swing: high - low,
        base_mean,
        rank: 0,
    }
}

fn rank_by_swing(mut entries: Vec<TornadoEntry>) -> Vec<TornadoEntry> {
    entries.sort_by(|a, b| b.swing.partial_cmp(&a.swing).unwrap_or(Ordering::Equal));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

/// Configs for every sweep point of `factor`, applied to `base` and validated
fn sweep_configs(
    base: &SimulationConfig,
    factor: &SensitivityFactor,
) -> Result<(Vec<f64>, Vec<SimulationConfig>)> {
    if factor.step_count == 0 {
        return Err(ConfigError::Scenario(format!(
            "sensitivity factor '{}' has no steps",
            factor.label
        ))
        .into());
    }
    let values = factor.sweep_values();
    let configs = values
        .iter()
        .map(|&value| {
            let mut config = base.clone();
            factor.delta(value).apply(&mut config)?;
            config.validate()?;
            Ok(config)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((values, configs))
}

impl ScenarioGenerator {
    /// Sweep each factor with all others held at base and rank by swing.
    ///
    /// All sweep points are simulated on the base seed, so differences
    /// reflect the factor rather than sampling noise.
    pub fn sensitivity(
        &self,
        engine: &MonteCarloEngine,
        factors: &[SensitivityFactor],
        impact: ImpactType,
    ) -> Result<Vec<TornadoEntry>> {
        let base = self.seeded_base();
        let mut configs = vec![base.clone()];
        let mut sweeps = Vec::with_capacity(factors.len());

        for factor in factors {
            let (values, sweep) = sweep_configs(&base, factor)?;
            sweeps.push((configs.len(), values));
            configs.extend(sweep);
        }

        tracing::debug!(
            factors = factors.len(),
            runs = configs.len(),
            "running sensitivity sweep"
        );
        let runs = engine
            .run_many(&configs)
            .into_iter()
            .map(|run| run.map(|r| r.expected_value(impact)))
            .collect::<Result<Vec<f64>>>()?;

        let base_mean = runs[0];
        let entries = factors
            .iter()
            .zip(sweeps)
            .map(|(factor, (start, values))| {
                let means = runs[start..start + values.len()].to_vec();
                tornado_entry(factor, impact, values, means, base_mean)
            })
            .collect();
        Ok(rank_by_swing(entries))
    }

    /// Deterministic one-at-a-time sweep without simulation.
    ///
    /// Every risk is held at its `baseline_impact` except the one a factor
    /// targets, which contributes `probability * mean` at each sweep point.
    /// `base_mean` is the outcome with every risk at baseline.
    pub fn baseline_sensitivity(
        &self,
        factors: &[SensitivityFactor],
        impact: ImpactType,
    ) -> Result<Vec<TornadoEntry>> {
        let base_mean = baseline_outcome(self.base(), impact, None)?;
        let mut entries = Vec::with_capacity(factors.len());
        for factor in factors {
            let (values, configs) = sweep_configs(self.base(), factor)?;
            let means = configs
                .iter()
                .map(|config| baseline_outcome(config, impact, factor.risk_id()))
                .collect::<Result<Vec<_>>>()?;
            entries.push(tornado_entry(factor, impact, values, means, base_mean));
        }
        tracing::debug!(factors = factors.len(), base_mean, "baseline sensitivity sweep");
        Ok(rank_by_swing(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_values_inclusive() {
        let factor = SensitivityFactor::impact_scale(RiskId(1), 0.5, 1.5, 5);
        assert_eq!(factor.sweep_values(), vec![0.5, 0.75, 1.0, 1.25, 1.5]);

        let single = SensitivityFactor::probability(RiskId(1), 0.3, 0.9, 1);
        assert_eq!(single.sweep_values(), vec![0.3]);
    }

    #[test]
    fn test_baseline_sweep_holds_other_risks() {
        use crate::model::{Risk, RiskDistribution};
        let config = SimulationConfig::new(vec![
            Risk::new(
                RiskId(1),
                "Ground",
                ImpactType::Cost,
                RiskDistribution::three_point(10.0, 20.0, 60.0).unwrap(),
            )
            .baseline(100.0),
            Risk::new(
                RiskId(2),
                "Steel",
                ImpactType::Cost,
                RiskDistribution::Normal {
                    mean: 500.0,
                    std_dev: 50.0,
                },
            )
            .probability(0.5)
            .baseline(400.0),
            Risk::new(
                RiskId(3),
                "Permits",
                ImpactType::Schedule,
                RiskDistribution::Uniform { min: 1.0, max: 9.0 },
            ),
        ]);
        let generator = ScenarioGenerator::new(config);
        let factors = vec![
            SensitivityFactor::impact_scale(RiskId(1), 0.5, 1.5, 3),
            SensitivityFactor::probability(RiskId(2), 0.0, 1.0, 3),
        ];

        let entries = generator
            .baseline_sensitivity(&factors, ImpactType::Cost)
            .unwrap();
        assert_eq!(entries[0].label, "Probability (risk #2)");
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].base_mean, 500.0);
        // Steel swept through p * 500, ground held at 100
        for (got, want) in entries[0].means.iter().zip([100.0, 350.0, 600.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        // Ground swept through 0.5..1.5 of its mean 30, steel held at 400
        for (got, want) in entries[1].means.iter().zip([415.0, 430.0, 445.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        assert!((entries[1].swing - 30.0).abs() < 1e-9);

        // A sweep starting at zero impact is a valid point
        let from_zero = generator
            .baseline_sensitivity(
                &[SensitivityFactor::impact_scale(RiskId(1), 0.0, 1.0, 2)],
                ImpactType::Cost,
            )
            .unwrap();
        assert_eq!(from_zero[0].means, vec![400.0, 430.0]);
    }

    #[test]
    fn test_factor_risk_id() {
        assert_eq!(
            SensitivityFactor::probability(RiskId(4), 0.0, 1.0, 2).risk_id(),
            Some(RiskId(4))
        );
        let factor = SensitivityFactor {
            label: "Fees".into(),
            target: FactorTarget::BaselineCost { name: "Fees".into() },
            min_value: 0.0,
            max_value: 1.0,
            step_count: 2,
        };
        assert_eq!(factor.risk_id(), None);
    }

    #[test]
    fn test_delta_targets() {
        let factor = SensitivityFactor {
            label: "Contingency".into(),
            target: FactorTarget::BaselineCost {
                name: "Contingency".into(),
            },
            min_value: 0.0,
            max_value: 10.0,
            step_count: 2,
        };
        assert_eq!(
            factor.delta(10.0),
            ParameterDelta::SetBaselineCost {
                name: "Contingency".into(),
                amount: 10.0
            }
        );
    }
}
