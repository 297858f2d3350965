mod distribution;
mod ids;
mod results;
mod risk;

pub use distribution::{
    DistributionType, FitResult, MIN_FIT_SAMPLES, RiskDistribution, kolmogorov_p_value,
    standard_normal_cdf, standard_normal_quantile,
};
pub use ids::RiskId;
pub use results::{
    CONFIDENCE_LEVELS, Checkpoint, ConfidenceInterval, ConvergenceReport, ImpactSummary,
    IterationSamples, Percentiles, REPORTED_PERCENTILES, RiskContribution, SimulationResult,
    SimulationWarning,
};
pub use risk::{ImpactType, InMemoryRegister, Risk, RiskCategory, RiskRegister};
