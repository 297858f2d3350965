//! Simulation results
//!
//! A `SimulationResult` is created once per run and never mutated; the engine
//! hands it out behind an `Arc` so cached copies are shared, not cloned.

use serde::{Deserialize, Serialize};

use super::ids::RiskId;
use super::risk::ImpactType;
use crate::analysis::RunningStats;

/// Percentiles reported for every impact type
pub const REPORTED_PERCENTILES: [f64; 7] = [0.10, 0.25, 0.50, 0.75, 0.90, 0.95, 0.99];

/// Confidence levels reported for every impact type
pub const CONFIDENCE_LEVELS: [f64; 3] = [0.80, 0.90, 0.95];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// (percentile as 0-1, value) pairs in ascending order
    #[must_use]
    pub fn pairs(&self) -> [(f64, f64); 7] {
        let values = [
            self.p10, self.p25, self.p50, self.p75, self.p90, self.p95, self.p99,
        ];
        std::array::from_fn(|i| (REPORTED_PERCENTILES[i], values[i]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Coverage, e.g. 0.90 for a 90% interval
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

/// Summary statistics for one impact type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub impact: ImpactType,
    pub mean: f64,
    pub std_dev: f64,
    /// `std_dev / mean` (0 when the mean is 0)
    pub coefficient_of_variation: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Percentiles,
    pub confidence_intervals: Vec<ConfidenceInterval>,
}

impl ImpactSummary {
    #[must_use]
    pub fn interval(&self, level: f64) -> Option<&ConfidenceInterval> {
        self.confidence_intervals
            .iter()
            .find(|ci| (ci.level - level).abs() < 1e-9)
    }
}

/// One risk's share of the outcome variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    pub risk_id: RiskId,
    pub impact: ImpactType,
    /// cov(risk, total) / var(total); shares of one impact type sum to 1
    pub variance_share: f64,
    /// Pearson correlation between the risk's samples and the total
    pub correlation: f64,
    /// 1-based position in the ranking
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub impact: ImpactType,
    pub converged: bool,
    /// Relative change of the running mean over the trailing window
    pub relative_change: f64,
    /// Batch index at which the criterion was first met, if ever
    pub converged_at_batch: Option<usize>,
}

/// Non-fatal conditions attached to an otherwise valid result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimulationWarning {
    /// Running mean still moving more than the tolerance at the end of the run
    NotConverged {
        impact: ImpactType,
        relative_change: f64,
    },
    /// Iteration samples were thinned before being stored
    SamplesThinned { retained: usize, total: usize },
}

/// Per-iteration values kept for later analysis (possibly thinned)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationSamples {
    /// Every `stride`-th iteration was retained (0 when nothing was kept)
    pub stride: usize,
    /// Empty when the impact type was not simulated
    pub cost_totals: Vec<f64>,
    pub schedule_totals: Vec<f64>,
    /// Risk ids in config order, parallel to `per_risk`
    pub risk_ids: Vec<RiskId>,
    pub per_risk: Vec<Vec<f64>>,
}

impl IterationSamples {
    #[must_use]
    pub fn totals(&self, impact: ImpactType) -> &[f64] {
        match impact {
            ImpactType::Cost => &self.cost_totals,
            ImpactType::Schedule => &self.schedule_totals,
        }
    }

    #[must_use]
    pub fn risk(&self, risk_id: RiskId) -> Option<&[f64]> {
        self.risk_ids
            .iter()
            .position(|id| *id == risk_id)
            .map(|i| self.per_risk[i].as_slice())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cost_totals.len().max(self.schedule_totals.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partial statistics kept from a cancelled run when checkpointing was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config_hash: u64,
    /// Contiguous batches completed from the start of the run
    pub completed_batches: usize,
    pub iterations: usize,
    pub cost: RunningStats,
    pub schedule: RunningStats,
}

/// Complete output of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub config_hash: u64,
    /// Seed actually used (drawn from the OS when the config had none)
    pub seed: u64,
    pub iteration_count: usize,
    /// True when every simulated impact type converged
    pub convergence_status: bool,
    pub convergence: Vec<ConvergenceReport>,
    /// `None` when the config has no cost risks and no baseline costs
    pub cost: Option<ImpactSummary>,
    /// `None` when the config has no schedule risks
    pub schedule: Option<ImpactSummary>,
    /// Top contributors per impact type, ranked by variance share
    pub contributions: Vec<RiskContribution>,
    pub warnings: Vec<SimulationWarning>,
    pub samples: IterationSamples,
}

impl SimulationResult {
    #[must_use]
    pub fn summary(&self, impact: ImpactType) -> Option<&ImpactSummary> {
        match impact {
            ImpactType::Cost => self.cost.as_ref(),
            ImpactType::Schedule => self.schedule.as_ref(),
        }
    }

    /// Mean of `impact`, 0 when nothing of that type was simulated
    #[must_use]
    pub fn expected_value(&self, impact: ImpactType) -> f64 {
        self.summary(impact).map_or(0.0, |s| s.mean)
    }

    /// Ranked contributions for one impact type
    pub fn contributions_for(
        &self,
        impact: ImpactType,
    ) -> impl Iterator<Item = &RiskContribution> {
        self.contributions
            .iter()
            .filter(move |c| c.impact == impact)
    }

    #[must_use]
    pub fn has_convergence_warning(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, SimulationWarning::NotConverged { .. }))
    }
}
