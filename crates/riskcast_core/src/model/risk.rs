//! Risk register entries
//!
//! A `Risk` is what the external risk register hands us. Its distribution is
//! stored the way the register stores it (a family tag plus a map of named
//! parameters) and converted into a typed `RiskDistribution` on demand.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::distribution::{DistributionType, RiskDistribution};
use super::ids::RiskId;
use crate::error::{RegisterError, ValidationError};

/// What a risk's impact is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    /// Currency units
    Cost,
    /// Days of delay
    Schedule,
}

impl ImpactType {
    pub const ALL: [ImpactType; 2] = [ImpactType::Cost, ImpactType::Schedule];

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "cost" => Some(ImpactType::Cost),
            "schedule" => Some(ImpactType::Schedule),
            _ => None,
        }
    }
}

impl fmt::Display for ImpactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactType::Cost => write!(f, "cost"),
            ImpactType::Schedule => write!(f, "schedule"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Technical,
    Schedule,
    Cost,
    Resource,
    External,
    Regulatory,
    Organizational,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 7] = [
        RiskCategory::Technical,
        RiskCategory::Schedule,
        RiskCategory::Cost,
        RiskCategory::Resource,
        RiskCategory::External,
        RiskCategory::Regulatory,
        RiskCategory::Organizational,
    ];

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            RiskCategory::Technical => "technical",
            RiskCategory::Schedule => "schedule",
            RiskCategory::Cost => "cost",
            RiskCategory::Resource => "resource",
            RiskCategory::External => "external",
            RiskCategory::Regulatory => "regulatory",
            RiskCategory::Organizational => "organizational",
        }
    }
}

fn default_probability() -> f64 {
    1.0
}

/// A single source of cost or schedule uncertainty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub id: RiskId,
    pub name: String,
    pub category: RiskCategory,
    pub impact_type: ImpactType,
    pub distribution_type: DistributionType,
    /// Named parameters for `distribution_type`. Empty means the entry is
    /// incomplete and needs defaults from the pattern library.
    #[serde(default)]
    pub distribution_parameters: BTreeMap<String, f64>,
    /// Deterministic point estimate of the impact; the value the risk is
    /// held at in [`baseline_sensitivity`](crate::scenario::ScenarioGenerator::baseline_sensitivity)
    #[serde(default)]
    pub baseline_impact: f64,
    #[serde(default)]
    pub correlation_dependencies: Vec<RiskId>,
    /// Probability the risk materialises in a given iteration
    #[serde(default = "default_probability")]
    pub probability: f64,
}

impl Risk {
    /// Create a risk with the given distribution. The baseline impact
    /// defaults to the distribution mean.
    #[must_use]
    pub fn new(
        id: RiskId,
        name: impl Into<String>,
        impact_type: ImpactType,
        distribution: RiskDistribution,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category: match impact_type {
                ImpactType::Cost => RiskCategory::Cost,
                ImpactType::Schedule => RiskCategory::Schedule,
            },
            impact_type,
            distribution_type: distribution.distribution_type(),
            distribution_parameters: distribution.parameters(),
            baseline_impact: distribution.mean(),
            correlation_dependencies: Vec::new(),
            probability: 1.0,
        }
    }

    #[must_use]
    pub fn category(mut self, category: RiskCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn baseline(mut self, baseline_impact: f64) -> Self {
        self.baseline_impact = baseline_impact;
        self
    }

    #[must_use]
    pub fn probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, other: RiskId) -> Self {
        if !self.correlation_dependencies.contains(&other) {
            self.correlation_dependencies.push(other);
        }
        self
    }

    /// Typed, validated distribution for this risk
    pub fn distribution(&self) -> Result<RiskDistribution, ValidationError> {
        RiskDistribution::from_parameters(
            Some(self.id),
            self.distribution_type,
            &self.distribution_parameters,
        )
    }

    /// Replace the distribution (type and parameters together)
    pub fn set_distribution(&mut self, distribution: &RiskDistribution) {
        self.distribution_type = distribution.distribution_type();
        self.distribution_parameters = distribution.parameters();
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.distribution_parameters.is_empty()
    }

    /// Expected impact including the occurrence probability
    pub fn expected_impact(&self) -> Result<f64, ValidationError> {
        Ok(self.distribution()?.mean() * self.probability)
    }
}

/// Read-only source of risks for a project.
///
/// The core never writes back to the register.
pub trait RiskRegister {
    fn risks(&self, project: &str) -> Result<Vec<Risk>, RegisterError>;
}

/// Register backed by an in-memory map of project name to risks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryRegister {
    pub projects: BTreeMap<String, Vec<Risk>>,
}

impl InMemoryRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, project: impl Into<String>, risks: Vec<Risk>) {
        self.projects.insert(project.into(), risks);
    }
}

impl RiskRegister for InMemoryRegister {
    fn risks(&self, project: &str) -> Result<Vec<Risk>, RegisterError> {
        self.projects
            .get(project)
            .cloned()
            .ok_or_else(|| RegisterError::ProjectNotFound(project.to_string()))
    }
}
