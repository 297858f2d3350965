//! Monte Carlo risk simulation library
//!
//! This crate estimates project cost and schedule outcomes from a register of
//! uncertain risks. It supports:
//! - Normal, triangular, uniform, beta (PERT) and lognormal impact distributions
//! - Correlated sampling through a Gaussian copula (Cholesky factor)
//! - Seeded, batch-parallel runs that reproduce bit-for-bit on any thread count
//! - Percentiles, confidence intervals, convergence checks and variance shares
//! - What-if scenarios, mitigation cost/benefit and tornado sensitivity sweeps
//! - Distribution fitting from historical outcomes with forecast-accuracy tracking
//!
//! # Example
//!
//! ```ignore
//! use riskcast_core::{ImpactType, MonteCarloEngine, Risk, RiskDistribution, RiskId, SimulationConfig};
//!
//! let config = SimulationConfig::new(vec![
//!     Risk::new(
//!         RiskId(1),
//!         "Ground conditions",
//!         ImpactType::Cost,
//!         RiskDistribution::three_point(50_000.0, 120_000.0, 250_000.0)?,
//!     ),
//! ])
//! .iterations(10_000)
//! .seed(42);
//!
//! let result = MonteCarloEngine::new().run_simulation(&config)?;
//! println!("P90 cost: {}", result.cost.as_ref().unwrap().percentiles.p90);
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core modules
// ============================================================================

pub mod analysis;
pub mod cache;
pub mod calibration;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod scenario;

// ============================================================================
// Type definition modules
// ============================================================================

pub mod config;
pub mod model;

// ============================================================================
// Test modules
// ============================================================================

#[cfg(test)]
mod tests;

// ============================================================================
// Public re-exports for convenience
// ============================================================================

pub use cache::SimulationCache;
pub use calibration::{HistoricalCalibrator, HistoricalOutcome, PatternKey};
pub use config::{ConvergenceConfig, SimulationConfig};
pub use correlation::CorrelationMatrix;
pub use engine::{MonteCarloEngine, RunControl};
pub use error::{Result, SimulationError};
pub use model::{
    DistributionType, ImpactType, Risk, RiskCategory, RiskDistribution, RiskId, RiskRegister,
    SimulationResult,
};
pub use scenario::{ParameterDelta, Scenario, ScenarioGenerator};
