//! What-if scenarios built from a shared base configuration.
//!
//! A scenario is a deep copy of the base config with a list of
//! [`ParameterDelta`]s applied. The base is held behind an `Arc` and never
//! modified, so scenarios are isolated from it and from each other.
//!
//! - `mitigation`: cost/benefit of mitigation strategies
//! - `sensitivity`: one-at-a-time sweeps ranked as a tornado chart

mod mitigation;
mod sensitivity;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::{ComparisonReport, SignificanceTest, compare_results};
use crate::config::SimulationConfig;
use crate::engine::MonteCarloEngine;
use crate::error::{ConfigError, Result};
use crate::model::{ImpactType, RiskId, SimulationResult};

pub use mitigation::{MitigationAnalysis, MitigationMode, MitigationStrategy};
pub use sensitivity::{FactorTarget, SensitivityFactor, TornadoEntry};

/// One modification applied to a copy of the base config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterDelta {
    /// Multiply a risk's impact by `factor` (>= 0). Zero removes the risk's
    /// impact by setting its probability to 0.
    ScaleImpact { risk_id: RiskId, factor: f64 },
    /// Add `amount` to a risk's impact
    ShiftImpact { risk_id: RiskId, amount: f64 },
    /// Replace one named distribution parameter
    SetParameter {
        risk_id: RiskId,
        name: String,
        value: f64,
    },
    SetProbability { risk_id: RiskId, probability: f64 },
    /// Drop a risk (and its correlation row/column)
    RemoveRisk { risk_id: RiskId },
    SetBaselineCost { name: String, amount: f64 },
    SetSeed { seed: u64 },
    SetIterations { iteration_count: usize },
}

impl ParameterDelta {
    /// Apply to `config` in place. Validation of the whole config is left to
    /// the caller.
    pub fn apply(&self, config: &mut SimulationConfig) -> Result<()> {
        match self {
            ParameterDelta::ScaleImpact { risk_id, factor } if *factor == 0.0 => {
                let risk = risk_mut(config, *risk_id)?;
                risk.probability = 0.0;
                risk.baseline_impact = 0.0;
            }
            ParameterDelta::ScaleImpact { risk_id, factor } => {
                let risk = risk_mut(config, *risk_id)?;
                let scaled = risk.distribution()?.scaled(*factor).map_err(|e| e.for_risk(*risk_id))?;
                risk.set_distribution(&scaled);
                risk.baseline_impact *= factor;
            }
            ParameterDelta::ShiftImpact { risk_id, amount } => {
                let risk = risk_mut(config, *risk_id)?;
                let shifted = risk.distribution()?.shifted(*amount).map_err(|e| e.for_risk(*risk_id))?;
                risk.set_distribution(&shifted);
                risk.baseline_impact += amount;
            }
            ParameterDelta::SetParameter {
                risk_id,
                name,
                value,
            } => {
                let risk = risk_mut(config, *risk_id)?;
                let updated = risk
                    .distribution()?
                    .with_parameter(name, *value)
                    .map_err(|e| e.for_risk(*risk_id))?;
                risk.set_distribution(&updated);
            }
            ParameterDelta::SetProbability {
                risk_id,
                probability,
            } => {
                risk_mut(config, *risk_id)?.probability = *probability;
            }
            ParameterDelta::RemoveRisk { risk_id } => {
                let index = config
                    .risk_index(*risk_id)
                    .ok_or(ConfigError::UnknownRisk(*risk_id))?;
                config.risks.remove(index);
                for risk in &mut config.risks {
                    risk.correlation_dependencies.retain(|id| id != risk_id);
                }
                config.correlation = config.correlation.as_ref().map(|m| m.without(index));
            }
            ParameterDelta::SetBaselineCost { name, amount } => {
                config.baseline_costs.insert(name.clone(), *amount);
            }
            ParameterDelta::SetSeed { seed } => config.random_seed = Some(*seed),
            ParameterDelta::SetIterations { iteration_count } => {
                config.iteration_count = *iteration_count;
            }
        }
        Ok(())
    }
}

fn risk_mut(config: &mut SimulationConfig, id: RiskId) -> Result<&mut crate::model::Risk> {
    config
        .risks
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| ConfigError::UnknownRisk(id).into())
}

/// A named, validated variant of the base config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub config: SimulationConfig,
    pub deltas: Vec<ParameterDelta>,
}

/// Builds and runs isolated variants of a base config
#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    base: Arc<SimulationConfig>,
    /// Currency value of one unit of schedule impact, used to price
    /// schedule reductions in mitigation analysis
    delay_cost_per_day: f64,
}

impl ScenarioGenerator {
    #[must_use]
    pub fn new(base: SimulationConfig) -> Self {
        Self::from_arc(Arc::new(base))
    }

    #[must_use]
    pub fn from_arc(base: Arc<SimulationConfig>) -> Self {
        Self {
            base,
            delay_cost_per_day: 0.0,
        }
    }

    #[must_use]
    pub fn with_delay_cost(mut self, per_day: f64) -> Self {
        self.delay_cost_per_day = per_day;
        self
    }

    #[must_use]
    pub fn base(&self) -> &SimulationConfig {
        &self.base
    }

    /// Copy of the base with a seed fixed, so variants share random numbers
    /// with it. An unseeded base is pinned to its own content hash.
    fn seeded_base(&self) -> SimulationConfig {
        let mut config = (*self.base).clone();
        if config.random_seed.is_none() {
            config.random_seed = Some(self.base.content_hash());
        }
        config
    }

    /// Deep copy of the base with `deltas` applied in order, then validated
    pub fn scenario(&self, name: impl Into<String>, deltas: Vec<ParameterDelta>) -> Result<Scenario> {
        let mut config = (*self.base).clone();
        for delta in &deltas {
            delta.apply(&mut config)?;
        }
        config.validate()?;
        Ok(Scenario {
            name: name.into(),
            config,
            deltas,
        })
    }

    /// Run every scenario; results are in input order
    #[must_use]
    pub fn run_scenarios(
        &self,
        engine: &MonteCarloEngine,
        scenarios: &[Scenario],
    ) -> Vec<Result<Arc<SimulationResult>>> {
        let configs: Vec<SimulationConfig> = scenarios.iter().map(|s| s.config.clone()).collect();
        tracing::debug!(count = configs.len(), "running scenarios");
        engine.run_many(&configs)
    }

    /// Run the base and `scenario` and test whether `impact` differs
    pub fn compare_with_base(
        &self,
        engine: &MonteCarloEngine,
        scenario: &Scenario,
        impact: ImpactType,
        test: SignificanceTest,
        alpha: f64,
    ) -> Result<Option<ComparisonReport>> {
        let mut runs = engine
            .run_many(&[(*self.base).clone(), scenario.config.clone()])
            .into_iter();
        let (Some(base), Some(variant)) = (runs.next(), runs.next()) else {
            return Ok(None);
        };
        let (base, variant) = (base?, variant?);
        Ok(compare_results(&base, &variant, impact, test, alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationMatrix;
    use crate::error::SimulationError;
    use crate::model::{Risk, RiskDistribution};

    fn base() -> SimulationConfig {
        let m = CorrelationMatrix::new(vec![
            vec![1.0, 0.5, 0.2],
            vec![0.5, 1.0, 0.1],
            vec![0.2, 0.1, 1.0],
        ])
        .unwrap();
        SimulationConfig::new(vec![
            Risk::new(
                RiskId(1),
                "Steel",
                ImpactType::Cost,
                RiskDistribution::three_point(10.0, 20.0, 30.0).unwrap(),
            ),
            Risk::new(
                RiskId(2),
                "Labour",
                ImpactType::Cost,
                RiskDistribution::Normal {
                    mean: 50.0,
                    std_dev: 5.0,
                },
            )
            .depends_on(RiskId(1)),
            Risk::new(
                RiskId(3),
                "Permits",
                ImpactType::Schedule,
                RiskDistribution::Uniform { min: 1.0, max: 9.0 },
            ),
        ])
        .correlation(m)
        .seed(5)
    }

    #[test]
    fn test_scenario_leaves_base_untouched() {
        let generator = ScenarioGenerator::new(base());
        let before = generator.base().clone();

        let scenario = generator
            .scenario(
                "pricier steel",
                vec![
                    ParameterDelta::ScaleImpact {
                        risk_id: RiskId(1),
                        factor: 2.0,
                    },
                    ParameterDelta::SetSeed { seed: 9 },
                ],
            )
            .unwrap();

        assert_eq!(generator.base(), &before);
        assert_eq!(
            scenario.config.risks[0].distribution().unwrap(),
            RiskDistribution::Triangular {
                optimistic: 20.0,
                most_likely: 40.0,
                pessimistic: 60.0
            }
        );
        assert_eq!(scenario.config.random_seed, Some(9));
    }

    #[test]
    fn test_sibling_scenarios_are_isolated() {
        let generator = ScenarioGenerator::new(base());
        let a = generator
            .scenario(
                "a",
                vec![ParameterDelta::SetProbability {
                    risk_id: RiskId(2),
                    probability: 0.5,
                }],
            )
            .unwrap();
        let b = generator.scenario("b", vec![]).unwrap();
        assert_eq!(a.config.risks[1].probability, 0.5);
        assert_eq!(b.config.risks[1].probability, 1.0);
    }

    #[test]
    fn test_remove_risk_shrinks_correlation() {
        let generator = ScenarioGenerator::new(base());
        let scenario = generator
            .scenario("no steel", vec![ParameterDelta::RemoveRisk { risk_id: RiskId(1) }])
            .unwrap();
        assert_eq!(scenario.config.risks.len(), 2);
        assert!(scenario.config.risks[0].correlation_dependencies.is_empty());
        let matrix = scenario.config.correlation.as_ref().unwrap();
        assert_eq!(matrix.size(), 2);
        assert_eq!(matrix.get(0, 1), 0.1);
    }

    #[test]
    fn test_invalid_deltas_are_rejected() {
        let generator = ScenarioGenerator::new(base());
        assert!(matches!(
            generator.scenario(
                "ghost",
                vec![ParameterDelta::ScaleImpact {
                    risk_id: RiskId(99),
                    factor: 2.0
                }]
            ),
            Err(SimulationError::Configuration(ConfigError::UnknownRisk(RiskId(99))))
        ));
        assert!(matches!(
            generator.scenario(
                "bad parameter",
                vec![ParameterDelta::SetParameter {
                    risk_id: RiskId(2),
                    name: "std_dev".into(),
                    value: -1.0
                }]
            ),
            Err(SimulationError::Validation(_))
        ));
        assert!(matches!(
            generator.scenario("short", vec![ParameterDelta::SetIterations { iteration_count: 10 }]),
            Err(SimulationError::Configuration(ConfigError::TooFewIterations { .. }))
        ));
    }

    #[test]
    fn test_shift_and_baseline_cost() {
        let generator = ScenarioGenerator::new(base());
        let scenario = generator
            .scenario(
                "fees",
                vec![
                    ParameterDelta::ShiftImpact {
                        risk_id: RiskId(2),
                        amount: 10.0,
                    },
                    ParameterDelta::SetBaselineCost {
                        name: "Insurance".into(),
                        amount: 100.0,
                    },
                ],
            )
            .unwrap();
        assert_eq!(scenario.config.risks[1].distribution().unwrap().mean(), 60.0);
        assert_eq!(scenario.config.baseline_costs["Insurance"], 100.0);
    }

    #[test]
    fn test_zero_scale_removes_impact() {
        let generator = ScenarioGenerator::new(base());
        let scenario = generator
            .scenario(
                "no steel impact",
                vec![ParameterDelta::ScaleImpact {
                    risk_id: RiskId(1),
                    factor: 0.0,
                }],
            )
            .unwrap();
        let steel = &scenario.config.risks[0];
        assert_eq!(steel.probability, 0.0);
        assert_eq!(steel.baseline_impact, 0.0);
        assert_eq!(steel.distribution().unwrap(), base().risks[0].distribution().unwrap());

        assert!(matches!(
            generator.scenario(
                "negative",
                vec![ParameterDelta::ScaleImpact {
                    risk_id: RiskId(1),
                    factor: -1.0
                }]
            ),
            Err(SimulationError::Validation(_))
        ));
    }

    #[test]
    fn test_delta_serde_shape() {
        let delta: ParameterDelta =
            serde_json::from_str(r#"{"type": "scale_impact", "risk_id": 3, "factor": 1.5}"#).unwrap();
        assert_eq!(
            delta,
            ParameterDelta::ScaleImpact {
                risk_id: RiskId(3),
                factor: 1.5
            }
        );
    }
}
