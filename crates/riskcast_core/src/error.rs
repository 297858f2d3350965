use std::fmt;

use crate::model::{ImpactType, RiskId};

/// Malformed distribution parameters on a single risk
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Risk the parameters belong to (`None` for standalone distributions)
    pub risk_id: Option<RiskId>,
    pub parameter: &'static str,
    /// Offending value, if there was one to report
    pub value: Option<f64>,
    pub reason: &'static str,
}

impl ValidationError {
    #[must_use]
    pub fn new(
        risk_id: Option<RiskId>,
        parameter: &'static str,
        value: Option<f64>,
        reason: &'static str,
    ) -> Self {
        Self {
            risk_id,
            parameter,
            value,
            reason,
        }
    }

    /// Attach a risk id to an error produced without one
    #[must_use]
    pub fn for_risk(mut self, risk_id: RiskId) -> Self {
        self.risk_id = Some(risk_id);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.risk_id {
            Some(id) => write!(f, "risk {id}: parameter '{}'", self.parameter)?,
            None => write!(f, "parameter '{}'", self.parameter)?,
        }
        if let Some(value) = self.value {
            write!(f, " = {value}")?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// The property of a correlation matrix that failed validation
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixProperty {
    NotSquare { rows: usize, row: usize, len: usize },
    DimensionMismatch { expected: usize, actual: usize },
    Asymmetric { row: usize, col: usize },
    NonUnitDiagonal { index: usize, value: f64 },
    OutOfRange { row: usize, col: usize, value: f64 },
    NotFinite { row: usize, col: usize },
    NotPositiveSemiDefinite { pivot: usize, value: f64 },
}

impl fmt::Display for MatrixProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixProperty::NotSquare { rows, row, len } => {
                write!(f, "not square: row {row} has {len} entries, expected {rows}")
            }
            MatrixProperty::DimensionMismatch { expected, actual } => {
                write!(f, "dimension {actual} does not match {expected} risks")
            }
            MatrixProperty::Asymmetric { row, col } => {
                write!(f, "not symmetric at ({row}, {col})")
            }
            MatrixProperty::NonUnitDiagonal { index, value } => {
                write!(f, "diagonal entry {index} is {value}, expected 1")
            }
            MatrixProperty::OutOfRange { row, col, value } => {
                write!(f, "entry ({row}, {col}) = {value} outside [-1, 1]")
            }
            MatrixProperty::NotFinite { row, col } => {
                write!(f, "entry ({row}, {col}) is not finite")
            }
            MatrixProperty::NotPositiveSemiDefinite { pivot, value } => {
                write!(
                    f,
                    "not positive semi-definite (Cholesky pivot {pivot} = {value})"
                )
            }
        }
    }
}

/// Errors related to correlation structure
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationError {
    InvalidCorrelationMatrix(MatrixProperty),
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::InvalidCorrelationMatrix(property) => {
                write!(f, "invalid correlation matrix: {property}")
            }
        }
    }
}

impl std::error::Error for CorrelationError {}

impl From<MatrixProperty> for CorrelationError {
    fn from(property: MatrixProperty) -> Self {
        CorrelationError::InvalidCorrelationMatrix(property)
    }
}

/// Structural problems with a `SimulationConfig`
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoRisks,
    TooFewIterations { requested: usize, minimum: usize },
    DuplicateRiskId(RiskId),
    UnknownRisk(RiskId),
    InvalidProbability { risk_id: RiskId, value: f64 },
    InvalidBaselineCost { name: String, value: f64 },
    InvalidConvergence(&'static str),
    Scenario(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoRisks => write!(f, "configuration contains no risks"),
            ConfigError::TooFewIterations { requested, minimum } => write!(
                f,
                "iteration count {requested} is below the minimum of {minimum}"
            ),
            ConfigError::DuplicateRiskId(id) => write!(f, "risk {id} appears more than once"),
            ConfigError::UnknownRisk(id) => write!(f, "risk {id} is not part of the configuration"),
            ConfigError::InvalidProbability { risk_id, value } => write!(
                f,
                "risk {risk_id}: probability {value} must be in [0, 1]"
            ),
            ConfigError::InvalidBaselineCost { name, value } => {
                write!(f, "baseline cost '{name}' = {value} is not finite")
            }
            ConfigError::InvalidConvergence(reason) => {
                write!(f, "invalid convergence settings: {reason}")
            }
            ConfigError::Scenario(msg) => write!(f, "scenario error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A non-finite value produced mid-run
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalError {
    /// Zero-based global iteration index
    pub iteration: usize,
    /// Offending risk, `None` when an aggregate total overflowed
    pub risk_id: Option<RiskId>,
    pub impact: ImpactType,
    pub value: f64,
}

impl fmt::Display for NumericalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.risk_id {
            Some(id) => write!(
                f,
                "non-finite sample {} for risk {id} at iteration {}",
                self.value, self.iteration
            ),
            None => write!(
                f,
                "non-finite {} total {} at iteration {}",
                self.impact, self.value, self.iteration
            ),
        }
    }
}

impl std::error::Error for NumericalError {}

/// Top-level error returned by the engine and everything layered on it
#[derive(Debug, Clone)]
pub enum SimulationError {
    Validation(ValidationError),
    Correlation(CorrelationError),
    Configuration(ConfigError),
    Numerical(NumericalError),
    /// The run was cancelled at a batch boundary
    Cancelled {
        checkpoint: Option<Box<crate::model::Checkpoint>>,
    },
}

impl SimulationError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SimulationError::Cancelled { .. })
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Validation(e) => write!(f, "validation error: {e}"),
            SimulationError::Correlation(e) => write!(f, "{e}"),
            SimulationError::Configuration(e) => write!(f, "configuration error: {e}"),
            SimulationError::Numerical(e) => write!(f, "numerical error: {e}"),
            SimulationError::Cancelled { checkpoint } => match checkpoint {
                Some(cp) => write!(
                    f,
                    "simulation cancelled after {} iterations (checkpoint kept)",
                    cp.iterations
                ),
                None => write!(f, "simulation cancelled"),
            },
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Validation(e) => Some(e),
            SimulationError::Correlation(e) => Some(e),
            SimulationError::Configuration(e) => Some(e),
            SimulationError::Numerical(e) => Some(e),
            SimulationError::Cancelled { .. } => None,
        }
    }
}

impl From<ValidationError> for SimulationError {
    fn from(err: ValidationError) -> Self {
        SimulationError::Validation(err)
    }
}

impl From<CorrelationError> for SimulationError {
    fn from(err: CorrelationError) -> Self {
        SimulationError::Correlation(err)
    }
}

impl From<ConfigError> for SimulationError {
    fn from(err: ConfigError) -> Self {
        SimulationError::Configuration(err)
    }
}

impl From<NumericalError> for SimulationError {
    fn from(err: NumericalError) -> Self {
        SimulationError::Numerical(err)
    }
}

/// Errors surfaced by a `RiskRegister` implementation
#[derive(Debug, Clone)]
pub enum RegisterError {
    ProjectNotFound(String),
    Unavailable(String),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::ProjectNotFound(project) => {
                write!(f, "project '{project}' not found in risk register")
            }
            RegisterError::Unavailable(msg) => write!(f, "risk register unavailable: {msg}"),
        }
    }
}

impl std::error::Error for RegisterError {}

pub type Result<T> = std::result::Result<T, SimulationError>;
