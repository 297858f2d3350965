//! Mitigation strategies and their cost/benefit.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ScenarioGenerator;
use crate::config::SimulationConfig;
use crate::engine::MonteCarloEngine;
use crate::error::{ConfigError, Result, ValidationError};
use crate::model::{ImpactType, Risk, RiskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationMode {
    /// Occurrence probability is multiplied by `1 - effectiveness`
    ReduceProbability,
    /// Impact distribution is scaled by `1 - effectiveness`
    ReduceImpact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationStrategy {
    pub risk_id: RiskId,
    pub name: String,
    /// Currency cost of putting the mitigation in place
    pub cost: f64,
    /// Fraction of the targeted quantity removed, in [0, 1]
    pub effectiveness: f64,
    pub mode: MitigationMode,
}

impl MitigationStrategy {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.effectiveness) {
            return Err(ConfigError::Scenario(format!(
                "mitigation '{}': effectiveness {} must be in [0, 1]",
                self.name, self.effectiveness
            )));
        }
        if !(self.cost.is_finite() && self.cost >= 0.0) {
            return Err(ConfigError::Scenario(format!(
                "mitigation '{}': cost {} must be finite and non-negative",
                self.name, self.cost
            )));
        }
        Ok(())
    }

    /// Apply the mitigation to `risk` in place
    pub fn apply(&self, risk: &mut Risk) -> std::result::Result<(), ValidationError> {
        let remaining = 1.0 - self.effectiveness;
        match self.mode {
            MitigationMode::ReduceProbability => risk.probability *= remaining,
            // A fully effective impact reduction removes the risk outright
            MitigationMode::ReduceImpact if remaining <= 0.0 => risk.probability = 0.0,
            MitigationMode::ReduceImpact => {
                let scaled = risk
                    .distribution()?
                    .scaled(remaining)
                    .map_err(|e| e.for_risk(risk.id))?;
                risk.set_distribution(&scaled);
                risk.baseline_impact *= remaining;
            }
        }
        Ok(())
    }

    /// Copy of `config` with this mitigation applied
    pub fn mitigated(&self, config: &SimulationConfig) -> Result<SimulationConfig> {
        self.validate()?;
        let mut mitigated = config.clone();
        let risk = mitigated
            .risks
            .iter_mut()
            .find(|r| r.id == self.risk_id)
            .ok_or(ConfigError::UnknownRisk(self.risk_id))?;
        self.apply(risk)?;
        Ok(mitigated)
    }
}

/// Outcome of simulating a config with and without one mitigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationAnalysis {
    pub strategy: MitigationStrategy,
    /// Impact type of the mitigated risk
    pub impact: ImpactType,
    pub unmitigated_expected: f64,
    pub mitigated_expected: f64,
    /// `unmitigated_expected - mitigated_expected`, in impact units
    pub expected_reduction: f64,
    /// Expected reduction in currency (schedule priced at the delay cost)
    pub expected_benefit: f64,
    pub mitigation_cost: f64,
    /// `expected_benefit - mitigation_cost`
    pub net_benefit: f64,
    /// `net_benefit / mitigation_cost`; `None` for free mitigations
    pub return_on_investment: Option<f64>,
}

impl ScenarioGenerator {
    /// Simulate the base with and without `strategy` on common random numbers
    pub fn evaluate_mitigation(
        &self,
        engine: &MonteCarloEngine,
        strategy: &MitigationStrategy,
    ) -> Result<MitigationAnalysis> {
        let mut ranked = self.rank_mitigations(engine, std::slice::from_ref(strategy))?;
        ranked
            .pop()
            .ok_or_else(|| ConfigError::Scenario("no mitigation evaluated".into()).into())
    }

    /// Evaluate every strategy against the same base run and sort by net
    /// benefit, best first
    pub fn rank_mitigations(
        &self,
        engine: &MonteCarloEngine,
        strategies: &[MitigationStrategy],
    ) -> Result<Vec<MitigationAnalysis>> {
        let base = self.seeded_base();
        let mut configs = Vec::with_capacity(strategies.len() + 1);
        configs.push(base.clone());
        for strategy in strategies {
            configs.push(strategy.mitigated(&base)?);
        }

        let mut runs = engine.run_many(&configs).into_iter();
        let unmitigated = runs
            .next()
            .ok_or_else(|| ConfigError::Scenario("base run missing".into()))??;

        let mut analyses = Vec::with_capacity(strategies.len());
        for (strategy, run) in strategies.iter().zip(runs) {
            let mitigated = run?;
            let impact = base
                .risk(strategy.risk_id)
                .map_or(ImpactType::Cost, |r| r.impact_type);

            let unmitigated_expected = unmitigated.expected_value(impact);
            let mitigated_expected = mitigated.expected_value(impact);
            let expected_reduction = unmitigated_expected - mitigated_expected;
            let expected_benefit = match impact {
                ImpactType::Cost => expected_reduction,
                ImpactType::Schedule => expected_reduction * self.delay_cost_per_day,
            };
            let net_benefit = expected_benefit - strategy.cost;

            tracing::debug!(
                strategy = %strategy.name,
                risk = %strategy.risk_id,
                expected_reduction,
                net_benefit,
                "mitigation evaluated"
            );

            analyses.push(MitigationAnalysis {
                strategy: strategy.clone(),
                impact,
                unmitigated_expected,
                mitigated_expected,
                expected_reduction,
                expected_benefit,
                mitigation_cost: strategy.cost,
                net_benefit,
                return_on_investment: (strategy.cost > 0.0).then(|| net_benefit / strategy.cost),
            });
        }

        analyses.sort_by(|a, b| {
            b.net_benefit
                .partial_cmp(&a.net_benefit)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.strategy.name.cmp(&b.strategy.name))
        });
        Ok(analyses)
    }
}
