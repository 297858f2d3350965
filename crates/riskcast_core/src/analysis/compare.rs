//! Significance testing between two simulation results.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::stats::{RunningStats, skewness};
use crate::model::{ImpactType, SimulationResult, standard_normal_cdf};

/// Significance level used when the caller has no preference
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Samples with |skewness| above this are compared with Mann-Whitney under `Auto`
const SKEW_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceTest {
    /// Welch's unequal-variance t-test
    Welch,
    /// Mann-Whitney U with tie-corrected normal approximation
    MannWhitney,
    /// Mann-Whitney when either sample is strongly skewed, Welch otherwise
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
    /// Cohen's d for Welch, rank-biserial correlation for Mann-Whitney.
    /// Positive when `b` tends to be larger than `a`.
    pub effect_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub impact: ImpactType,
    /// Test actually applied (never `Auto`)
    pub test: SignificanceTest,
    pub mean_a: f64,
    pub mean_b: f64,
    /// `mean_b - mean_a`
    pub mean_difference: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub alpha: f64,
    pub significant: bool,
}

/// Compare the retained samples of `impact` in two results.
///
/// Returns `None` when either result has fewer than two samples for `impact`.
#[must_use]
pub fn compare_results(
    a: &SimulationResult,
    b: &SimulationResult,
    impact: ImpactType,
    test: SignificanceTest,
    alpha: f64,
) -> Option<ComparisonReport> {
    compare_samples(
        a.samples.totals(impact),
        b.samples.totals(impact),
        impact,
        test,
        alpha,
    )
}

#[must_use]
pub fn compare_samples(
    a: &[f64],
    b: &[f64],
    impact: ImpactType,
    test: SignificanceTest,
    alpha: f64,
) -> Option<ComparisonReport> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let test = match test {
        SignificanceTest::Auto => {
            if skewness(a).abs() > SKEW_THRESHOLD || skewness(b).abs() > SKEW_THRESHOLD {
                SignificanceTest::MannWhitney
            } else {
                SignificanceTest::Welch
            }
        }
        explicit => explicit,
    };

    let outcome = match test {
        SignificanceTest::MannWhitney => mann_whitney_u(a, b),
        _ => welch_t_test(a, b),
    };

    let mean_a = a.iter().sum::<f64>() / a.len() as f64;
    let mean_b = b.iter().sum::<f64>() / b.len() as f64;

    Some(ComparisonReport {
        impact,
        test,
        mean_a,
        mean_b,
        mean_difference: mean_b - mean_a,
        statistic: outcome.statistic,
        p_value: outcome.p_value,
        effect_size: outcome.effect_size,
        alpha,
        significant: outcome.p_value < alpha,
    })
}

/// Two-sided Welch t-test of `mean(b) - mean(a)`
#[must_use]
pub fn welch_t_test(a: &[f64], b: &[f64]) -> TestOutcome {
    let sa: RunningStats = a.iter().copied().collect();
    let sb: RunningStats = b.iter().copied().collect();
    let (na, nb) = (sa.count as f64, sb.count as f64);
    let (va, vb) = (sa.variance(), sb.variance());
    let diff = sb.mean - sa.mean;

    let pooled_sd = (((na - 1.0) * va + (nb - 1.0) * vb) / (na + nb - 2.0)).sqrt();
    let effect_size = if pooled_sd > 0.0 { diff / pooled_sd } else { 0.0 };

    let se2 = va / na + vb / nb;
    if se2 == 0.0 {
        // Both samples constant
        let p_value = if diff == 0.0 { 1.0 } else { 0.0 };
        let statistic = if diff == 0.0 {
            0.0
        } else {
            diff.signum() * f64::INFINITY
        };
        return TestOutcome {
            statistic,
            p_value,
            effect_size,
        };
    }

    let t = diff / se2.sqrt();
    let df = se2 * se2
        / ((va / na).powi(2) / (na - 1.0) + (vb / nb).powi(2) / (nb - 1.0));
    let p_value = StudentsT::new(0.0, 1.0, df)
        .map(|dist| 2.0 * (1.0 - dist.cdf(t.abs())))
        .unwrap_or(f64::NAN)
        .clamp(0.0, 1.0);

    TestOutcome {
        statistic: t,
        p_value,
        effect_size,
    }
}

/// Two-sided Mann-Whitney U test. The statistic is `U_a`, the number of
/// (a, b) pairs with `a > b` (ties count one half).
#[must_use]
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> TestOutcome {
    let (na, nb) = (a.len(), b.len());
    let n = na + nb;

    let mut pooled: Vec<(f64, bool)> = a
        .iter()
        .map(|&x| (x, true))
        .chain(b.iter().map(|&x| (x, false)))
        .collect();
    pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

    // Average ranks over tie groups
    let mut rank_sum_a = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        let t = (j - i) as f64;
        let avg_rank = (i + j + 1) as f64 / 2.0;
        rank_sum_a += avg_rank * pooled[i..j].iter().filter(|(_, in_a)| *in_a).count() as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let (na_f, nb_f, n_f) = (na as f64, nb as f64, n as f64);
    let u_a = rank_sum_a - na_f * (na_f + 1.0) / 2.0;
    let mu = na_f * nb_f / 2.0;
    let sigma = (na_f * nb_f / 12.0 * ((n_f + 1.0) - tie_term / (n_f * (n_f - 1.0)))).sqrt();

    let effect_size = 1.0 - 2.0 * u_a / (na_f * nb_f);

    if sigma == 0.0 {
        return TestOutcome {
            statistic: u_a,
            p_value: 1.0,
            effect_size,
        };
    }

    // Continuity correction toward the mean
    let deviation = (u_a - mu).abs() - 0.5;
    let z = deviation.max(0.0) / sigma;
    let p_value = (2.0 * (1.0 - standard_normal_cdf(z))).clamp(0.0, 1.0);

    TestOutcome {
        statistic: u_a,
        p_value,
        effect_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize, offset: f64, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + amplitude * ((i as f64) * 0.618_033_988_7).fract())
            .collect()
    }

    #[test]
    fn test_welch_detects_shifted_mean() {
        let a = wave(500, 100.0, 20.0);
        let b = wave(500, 110.0, 20.0);
        let outcome = welch_t_test(&a, &b);
        assert!(outcome.statistic > 0.0);
        assert!(outcome.p_value < 1e-6);
        assert!(outcome.effect_size > 1.0);
    }

    #[test]
    fn test_welch_same_samples_not_significant() {
        let a = wave(500, 100.0, 20.0);
        let outcome = welch_t_test(&a, &a);
        assert!(outcome.statistic.abs() < 1e-12);
        assert!((outcome.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_welch_constant_samples() {
        let outcome = welch_t_test(&[5.0; 10], &[5.0; 10]);
        assert_eq!(outcome.p_value, 1.0);
        let outcome = welch_t_test(&[5.0; 10], &[6.0; 10]);
        assert_eq!(outcome.p_value, 0.0);
    }

    #[test]
    fn test_mann_whitney_known_u() {
        // Every b exceeds every a: U_a = 0, rank-biserial = 1
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 11.0, 12.0, 13.0];
        let outcome = mann_whitney_u(&a, &b);
        assert_eq!(outcome.statistic, 0.0);
        assert!((outcome.effect_size - 1.0).abs() < 1e-12);
        assert!(outcome.p_value < 0.05);
    }

    #[test]
    fn test_mann_whitney_ties_count_half() {
        let outcome = mann_whitney_u(&[1.0, 2.0], &[2.0, 3.0]);
        // pairs with a > b: none; ties: (2, 2) -> 0.5
        assert!((outcome.statistic - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auto_picks_mann_whitney_for_skewed_samples() {
        let skewed: Vec<f64> = (1..=400).map(|i| (f64::from(i) / 40.0).exp()).collect();
        let symmetric = wave(400, 0.0, 1.0);

        let report =
            compare_samples(&skewed, &skewed, ImpactType::Cost, SignificanceTest::Auto, DEFAULT_ALPHA)
                .unwrap();
        assert_eq!(report.test, SignificanceTest::MannWhitney);
        assert!(!report.significant);

        let report = compare_samples(
            &symmetric,
            &symmetric,
            ImpactType::Cost,
            SignificanceTest::Auto,
            DEFAULT_ALPHA,
        )
        .unwrap();
        assert_eq!(report.test, SignificanceTest::Welch);
    }

    #[test]
    fn test_compare_requires_two_samples() {
        assert!(
            compare_samples(&[1.0], &[1.0, 2.0], ImpactType::Cost, SignificanceTest::Welch, 0.05)
                .is_none()
        );
    }
}
