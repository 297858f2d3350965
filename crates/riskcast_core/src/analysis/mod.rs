//! Statistical post-processing of simulation samples.
//!
//! - `stats`: running moments, percentiles, confidence intervals, summaries
//! - `contribution`: variance-share ranking of risks
//! - `compare`: significance tests between two results

mod compare;
mod contribution;
mod stats;

pub use compare::{
    ComparisonReport, DEFAULT_ALPHA, SignificanceTest, TestOutcome, compare_results,
    compare_samples, mann_whitney_u, welch_t_test,
};
pub use contribution::{TOP_CONTRIBUTORS, rank_contributions};
pub use stats::{
    RunningStats, confidence_interval, covariance, mean, pearson, percentile, percentiles,
    skewness, summarize, summarize_sorted,
};
