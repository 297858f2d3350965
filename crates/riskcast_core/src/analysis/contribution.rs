//! Risk contribution ranking.
//!
//! Each risk's contribution is its share of the outcome variance,
//! `cov(X_i, T) / var(T)`. Because `T` is the sum of the risk samples (plus
//! constants), the shares of one impact type sum to 1, and correlated risks
//! split their joint variance between them instead of both claiming it.

use std::cmp::Ordering;

use super::stats::{covariance, pearson};
use crate::model::{ImpactType, RiskContribution, RiskId};

/// Number of contributors reported per impact type
pub const TOP_CONTRIBUTORS: usize = 10;

/// Rank `risks` (id, per-iteration samples) by variance share of `totals`.
///
/// Ties are broken by risk id so rankings are stable across runs.
#[must_use]
pub fn rank_contributions(
    impact: ImpactType,
    risks: &[(RiskId, &[f64])],
    totals: &[f64],
    limit: usize,
) -> Vec<RiskContribution> {
    let total_variance = covariance(totals, totals);

    let mut ranked: Vec<RiskContribution> = risks
        .iter()
        .map(|(risk_id, samples)| RiskContribution {
            risk_id: *risk_id,
            impact,
            variance_share: if total_variance > 0.0 {
                covariance(samples, totals) / total_variance
            } else {
                0.0
            },
            correlation: pearson(samples, totals),
            rank: 0,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.variance_share
            .abs()
            .partial_cmp(&a.variance_share.abs())
            .unwrap_or(Ordering::Equal)
            .then(a.risk_id.cmp(&b.risk_id))
    });
    ranked.truncate(limit);
    for (i, contribution) in ranked.iter_mut().enumerate() {
        contribution.rank = i + 1;
    }
    ranked
}
