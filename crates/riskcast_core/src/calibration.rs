//! Historical calibration and the risk-pattern library.
//!
//! Completed-project outcomes are grouped by [`PatternKey`] and the actual
//! impacts of each group are fitted with [`RiskDistribution::fit_best`]. Every
//! category also gets a category-wide pattern (project type `"*"`) fitted
//! over all of its project types, used as a fallback for project types with
//! little history.
//!
//! Recalibration is an explicit batch step: the calibrator never changes
//! while simulations that read from it are running.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use jiff::civil::Date;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{
    FitResult, ImpactType, MIN_FIT_SAMPLES, Risk, RiskCategory, RiskDistribution,
};

/// Project type of the category-wide fallback pattern
pub const CATEGORY_WIDE: &str = "*";

/// A completed risk: what was forecast and what actually happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalOutcome {
    pub category: RiskCategory,
    pub project_type: String,
    pub impact_type: ImpactType,
    pub forecast: f64,
    pub actual: f64,
    pub completed_on: Date,
}

/// Pattern library key.
///
/// Serializes as `"category/project_type/impact"` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PatternKey {
    pub category: RiskCategory,
    pub project_type: String,
    pub impact_type: ImpactType,
}

impl PatternKey {
    #[must_use]
    pub fn new(category: RiskCategory, project_type: impl Into<String>, impact_type: ImpactType) -> Self {
        Self {
            category,
            project_type: project_type.into(),
            impact_type,
        }
    }

    #[must_use]
    pub fn category_wide(&self) -> Self {
        Self::new(self.category, CATEGORY_WIDE, self.impact_type)
    }

    #[must_use]
    pub fn is_category_wide(&self) -> bool {
        self.project_type == CATEGORY_WIDE
    }

    fn of(outcome: &HistoricalOutcome) -> Self {
        Self::new(outcome.category, outcome.project_type.clone(), outcome.impact_type)
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.category.label(),
            self.project_type,
            self.impact_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePatternKeyError(String);

impl fmt::Display for ParsePatternKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pattern key '{}'", self.0)
    }
}

impl std::error::Error for ParsePatternKeyError {}

impl FromStr for PatternKey {
    type Err = ParsePatternKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePatternKeyError(s.to_string());
        let (category, rest) = s.split_once('/').ok_or_else(err)?;
        let (project_type, impact) = rest.rsplit_once('/').ok_or_else(err)?;
        Ok(Self::new(
            RiskCategory::from_label(category).ok_or_else(err)?,
            project_type,
            ImpactType::from_label(impact).ok_or_else(err)?,
        ))
    }
}

impl From<PatternKey> for String {
    fn from(key: PatternKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PatternKey {
    type Error = ParsePatternKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Fitted distribution for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPattern {
    pub key: PatternKey,
    pub fit: FitResult,
    pub sample_count: usize,
    pub updated_on: Date,
}

/// Forecast accuracy of one recalibration batch for one key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyPoint {
    /// Latest completion date in the batch
    pub as_of: Date,
    pub sample_count: usize,
    /// Mean absolute percentage error as a fraction; `None` when every
    /// actual in the batch was zero
    pub mape: Option<f64>,
    /// Mean of `(forecast - actual) / |actual|`; positive means over-forecast
    pub bias: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGroup {
    pub key: PatternKey,
    pub sample_count: usize,
    pub reason: String,
}

/// What a recalibration pass changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationReport {
    pub outcomes: usize,
    pub updated: Vec<PatternKey>,
    pub skipped: Vec<SkippedGroup>,
}

/// Pattern library plus the outcome history it was fitted from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalCalibrator {
    patterns: BTreeMap<PatternKey, RiskPattern>,
    accuracy: BTreeMap<PatternKey, Vec<AccuracyPoint>>,
    outcomes: Vec<HistoricalOutcome>,
}

impl HistoricalCalibrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of outcomes and refit every pattern they touch.
    ///
    /// Fits use the full stored history for each key. Groups with fewer than
    /// `MIN_FIT_SAMPLES` outcomes keep their previous pattern (if any) and are
    /// reported as skipped.
    pub fn recalibrate(
        &mut self,
        outcomes: &[HistoricalOutcome],
    ) -> Result<RecalibrationReport, ValidationError> {
        for outcome in outcomes {
            for (parameter, value) in [("forecast", outcome.forecast), ("actual", outcome.actual)] {
                if !value.is_finite() {
                    return Err(ValidationError::new(None, parameter, Some(value), "must be finite"));
                }
            }
        }

        let mut batches: BTreeMap<PatternKey, Vec<&HistoricalOutcome>> = BTreeMap::new();
        for outcome in outcomes {
            batches.entry(PatternKey::of(outcome)).or_default().push(outcome);
        }
        for (key, batch) in &batches {
            if let Some(point) = accuracy_point(batch) {
                self.accuracy.entry(key.clone()).or_default().push(point);
            }
        }

        self.outcomes.extend_from_slice(outcomes);

        let mut touched: Vec<PatternKey> = batches.keys().cloned().collect();
        touched.extend(batches.keys().map(PatternKey::category_wide));
        touched.sort();
        touched.dedup();

        let mut report = RecalibrationReport {
            outcomes: outcomes.len(),
            ..RecalibrationReport::default()
        };

        for key in touched {
            let history: Vec<&HistoricalOutcome> = self
                .outcomes
                .iter()
                .filter(|o| {
                    o.category == key.category
                        && o.impact_type == key.impact_type
                        && (key.is_category_wide() || o.project_type == key.project_type)
                })
                .collect();

            if history.len() < MIN_FIT_SAMPLES {
                report.skipped.push(SkippedGroup {
                    key,
                    sample_count: history.len(),
                    reason: format!("fewer than {MIN_FIT_SAMPLES} outcomes"),
                });
                continue;
            }

            let Some(updated_on) = history.iter().map(|o| o.completed_on).max() else {
                continue;
            };
            let actuals: Vec<f64> = history.iter().map(|o| o.actual).collect();
            match RiskDistribution::fit_best(&actuals) {
                Ok(fit) => {
                    tracing::debug!(
                        %key,
                        family = fit.family.label(),
                        ks = fit.ks_statistic,
                        samples = actuals.len(),
                        "pattern updated"
                    );
                    self.patterns.insert(
                        key.clone(),
                        RiskPattern {
                            key: key.clone(),
                            fit,
                            sample_count: actuals.len(),
                            updated_on,
                        },
                    );
                    report.updated.push(key);
                }
                Err(err) => {
                    tracing::debug!(%key, %err, "pattern fit failed");
                    report.skipped.push(SkippedGroup {
                        key,
                        sample_count: actuals.len(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Pattern for a project type, falling back to the category-wide pattern
    #[must_use]
    pub fn pattern(
        &self,
        category: RiskCategory,
        project_type: &str,
        impact_type: ImpactType,
    ) -> Option<&RiskPattern> {
        let key = PatternKey::new(category, project_type, impact_type);
        self.patterns
            .get(&key)
            .or_else(|| self.patterns.get(&key.category_wide()))
    }

    /// Fill an incomplete risk (empty parameter map) from the library.
    ///
    /// Returns `true` when the risk was filled. Complete risks are left alone.
    pub fn complete_risk(&self, risk: &mut Risk, project_type: &str) -> bool {
        if risk.is_complete() {
            return false;
        }
        let Some(pattern) = self.pattern(risk.category, project_type, risk.impact_type) else {
            return false;
        };
        let distribution = pattern.fit.distribution;
        risk.set_distribution(&distribution);
        if risk.baseline_impact == 0.0 {
            risk.baseline_impact = distribution.mean();
        }
        true
    }

    #[must_use]
    pub fn accuracy_history(&self, key: &PatternKey) -> &[AccuracyPoint] {
        self.accuracy.get(key).map_or(&[], Vec::as_slice)
    }

    /// Sample-weighted MAPE over every recorded batch
    #[must_use]
    pub fn overall_mape(&self) -> Option<f64> {
        let (weighted, count) = self
            .accuracy
            .values()
            .flatten()
            .filter_map(|p| p.mape.map(|m| (m * p.sample_count as f64, p.sample_count)))
            .fold((0.0, 0usize), |(w, c), (m, n)| (w + m, c + n));
        (count > 0).then(|| weighted / count as f64)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &RiskPattern> {
        self.patterns.values()
    }

    #[must_use]
    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }
}

fn accuracy_point(batch: &[&HistoricalOutcome]) -> Option<AccuracyPoint> {
    let as_of = batch.iter().map(|o| o.completed_on).max()?;
    let errors: Vec<f64> = batch
        .iter()
        .filter(|o| o.actual != 0.0)
        .map(|o| (o.forecast - o.actual) / o.actual.abs())
        .collect();
    let n = errors.len() as f64;
    let (mape, bias) = if errors.is_empty() {
        (None, None)
    } else {
        (
            Some(errors.iter().map(|e| e.abs()).sum::<f64>() / n),
            Some(errors.iter().sum::<f64>() / n),
        )
    };
    Some(AccuracyPoint {
        as_of,
        sample_count: batch.len(),
        mape,
        bias,
    })
}
