//! Probability distributions for risk impacts.
//!
//! `RiskDistribution` is a tagged enum over the supported families. Every
//! variant supports the same capability set:
//! - `validate` - distribution-specific parameter bounds
//! - `sample` / `from_standard_normal` - deterministic given the RNG state
//! - `fit` / `fit_best` - estimate parameters from historical outcomes
//!
//! The engine never calls `sample` directly: it draws standard normals,
//! correlates them, and maps each one through `from_standard_normal` so the
//! marginals stay intact under correlation.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta as BetaCdf, ContinuousCDF};
use statrs::function::erf::{erfc, erfc_inv};

use crate::error::ValidationError;
use crate::model::RiskId;

/// Minimum number of observations accepted by `fit`
pub const MIN_FIT_SAMPLES: usize = 5;

/// Shape weight used by PERT three-point estimates
const PERT_LAMBDA: f64 = 4.0;

/// Candidate modes evaluated per refinement pass of the triangular fit
const TRIANGULAR_GRID: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionType {
    Normal,
    Triangular,
    Uniform,
    Beta,
    LogNormal,
}

impl DistributionType {
    /// All families, in tie-break order for `fit_best`
    pub const ALL: [DistributionType; 5] = [
        DistributionType::Normal,
        DistributionType::Triangular,
        DistributionType::Uniform,
        DistributionType::LogNormal,
        DistributionType::Beta,
    ];

    /// Names of the parameters this family reads from a parameter map
    #[must_use]
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            DistributionType::Normal => &["mean", "std_dev"],
            DistributionType::Triangular => &["optimistic", "most_likely", "pessimistic"],
            DistributionType::Uniform => &["min", "max"],
            DistributionType::Beta => &["alpha", "beta", "min", "max"],
            DistributionType::LogNormal => &["mu", "sigma"],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DistributionType::Normal => "normal",
            DistributionType::Triangular => "triangular",
            DistributionType::Uniform => "uniform",
            DistributionType::Beta => "beta",
            DistributionType::LogNormal => "lognormal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskDistribution {
    Normal {
        mean: f64,
        std_dev: f64,
    },
    /// Three-point estimate
    Triangular {
        optimistic: f64,
        most_likely: f64,
        pessimistic: f64,
    },
    Uniform {
        min: f64,
        max: f64,
    },
    /// Beta(`alpha`, `beta`) rescaled onto [`min`, `max`]
    Beta {
        alpha: f64,
        beta: f64,
        min: f64,
        max: f64,
    },
    /// `mu`/`sigma` are the parameters of the underlying normal
    LogNormal {
        mu: f64,
        sigma: f64,
    },
}

/// Outcome of fitting candidate families to historical samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub family: DistributionType,
    pub distribution: RiskDistribution,
    /// Kolmogorov-Smirnov statistic (max CDF distance)
    pub ks_statistic: f64,
    /// Asymptotic Kolmogorov p-value for `ks_statistic`
    pub p_value: f64,
}

impl RiskDistribution {
    #[must_use]
    pub fn distribution_type(&self) -> DistributionType {
        match self {
            RiskDistribution::Normal { .. } => DistributionType::Normal,
            RiskDistribution::Triangular { .. } => DistributionType::Triangular,
            RiskDistribution::Uniform { .. } => DistributionType::Uniform,
            RiskDistribution::Beta { .. } => DistributionType::Beta,
            RiskDistribution::LogNormal { .. } => DistributionType::LogNormal,
        }
    }

    /// Build a distribution from a named parameter map and validate it.
    pub fn from_parameters(
        risk_id: Option<RiskId>,
        distribution_type: DistributionType,
        params: &BTreeMap<String, f64>,
    ) -> Result<Self, ValidationError> {
        let get = |name: &'static str| -> Result<f64, ValidationError> {
            params
                .get(name)
                .copied()
                .ok_or_else(|| ValidationError::new(risk_id, name, None, "missing parameter"))
        };

        let dist = match distribution_type {
            DistributionType::Normal => RiskDistribution::Normal {
                mean: get("mean")?,
                std_dev: get("std_dev")?,
            },
            DistributionType::Triangular => RiskDistribution::Triangular {
                optimistic: get("optimistic")?,
                most_likely: get("most_likely")?,
                pessimistic: get("pessimistic")?,
            },
            DistributionType::Uniform => RiskDistribution::Uniform {
                min: get("min")?,
                max: get("max")?,
            },
            DistributionType::Beta => RiskDistribution::Beta {
                alpha: get("alpha")?,
                beta: get("beta")?,
                min: get("min")?,
                max: get("max")?,
            },
            DistributionType::LogNormal => RiskDistribution::LogNormal {
                mu: get("mu")?,
                sigma: get("sigma")?,
            },
        };

        dist.validate().map_err(|e| match risk_id {
            Some(id) => e.for_risk(id),
            None => e,
        })?;
        Ok(dist)
    }

    /// Named parameters in the family's canonical order
    #[must_use]
    pub fn named_parameters(&self) -> Vec<(&'static str, f64)> {
        match *self {
            RiskDistribution::Normal { mean, std_dev } => {
                vec![("mean", mean), ("std_dev", std_dev)]
            }
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => vec![
                ("optimistic", optimistic),
                ("most_likely", most_likely),
                ("pessimistic", pessimistic),
            ],
            RiskDistribution::Uniform { min, max } => vec![("min", min), ("max", max)],
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => vec![("alpha", alpha), ("beta", beta), ("min", min), ("max", max)],
            RiskDistribution::LogNormal { mu, sigma } => vec![("mu", mu), ("sigma", sigma)],
        }
    }

    /// Parameter map suitable for `Risk::distribution_parameters`
    #[must_use]
    pub fn parameters(&self) -> BTreeMap<String, f64> {
        self.named_parameters()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Check distribution-specific parameter bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in self.named_parameters() {
            if !value.is_finite() {
                return Err(ValidationError::new(
                    None,
                    name,
                    Some(value),
                    "must be finite",
                ));
            }
        }

        match *self {
            RiskDistribution::Normal { std_dev, .. } => {
                positive("std_dev", std_dev)?;
            }
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => {
                if optimistic > most_likely {
                    return Err(ValidationError::new(
                        None,
                        "most_likely",
                        Some(most_likely),
                        "must not be below optimistic",
                    ));
                }
                if most_likely > pessimistic {
                    return Err(ValidationError::new(
                        None,
                        "pessimistic",
                        Some(pessimistic),
                        "must not be below most_likely",
                    ));
                }
                if optimistic >= pessimistic {
                    return Err(ValidationError::new(
                        None,
                        "pessimistic",
                        Some(pessimistic),
                        "must be greater than optimistic",
                    ));
                }
            }
            RiskDistribution::Uniform { min, max } => ordered_range(min, max)?,
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => {
                positive("alpha", alpha)?;
                positive("beta", beta)?;
                ordered_range(min, max)?;
            }
            RiskDistribution::LogNormal { sigma, .. } => {
                positive("sigma", sigma)?;
            }
        }
        Ok(())
    }

    /// Convert a three-point estimate into a triangular distribution.
    pub fn three_point(
        optimistic: f64,
        most_likely: f64,
        pessimistic: f64,
    ) -> Result<Self, ValidationError> {
        let dist = RiskDistribution::Triangular {
            optimistic,
            most_likely,
            pessimistic,
        };
        dist.validate()?;
        Ok(dist)
    }

    /// Convert a three-point estimate into a PERT (scaled beta) distribution.
    pub fn pert(
        optimistic: f64,
        most_likely: f64,
        pessimistic: f64,
    ) -> Result<Self, ValidationError> {
        Self::three_point(optimistic, most_likely, pessimistic)?;
        let range = pessimistic - optimistic;
        let dist = RiskDistribution::Beta {
            alpha: 1.0 + PERT_LAMBDA * (most_likely - optimistic) / range,
            beta: 1.0 + PERT_LAMBDA * (pessimistic - most_likely) / range,
            min: optimistic,
            max: pessimistic,
        };
        dist.validate()?;
        Ok(dist)
    }

    /// Draw one value using `rand_distr` samplers.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, ValidationError> {
        match *self {
            RiskDistribution::Normal { mean, std_dev } => rand_distr::Normal::new(mean, std_dev)
                .map(|d| d.sample(rng))
                .map_err(|_| invalid("std_dev", std_dev, "must be non-negative and finite")),
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => rand_distr::Triangular::new(optimistic, pessimistic, most_likely)
                .map(|d| d.sample(rng))
                .map_err(|_| invalid("most_likely", most_likely, "must lie within the range")),
            RiskDistribution::Uniform { min, max } => rand::distr::Uniform::new(min, max)
                .map(|d| d.sample(rng))
                .map_err(|_| invalid("max", max, "must be greater than min")),
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => rand_distr::Beta::new(alpha, beta)
                .map(|d| min + (max - min) * d.sample(rng))
                .map_err(|_| invalid("alpha", alpha, "shape parameters must be positive")),
            RiskDistribution::LogNormal { mu, sigma } => rand_distr::LogNormal::new(mu, sigma)
                .map(|d| d.sample(rng))
                .map_err(|_| invalid("sigma", sigma, "must be positive and finite")),
        }
    }

    /// Map a standard-normal draw onto this marginal (Gaussian copula transform).
    ///
    /// Rank-preserving: a larger `z` never produces a smaller value.
    #[must_use]
    pub fn from_standard_normal(&self, z: f64) -> f64 {
        match *self {
            RiskDistribution::Normal { mean, std_dev } => mean + std_dev * z,
            RiskDistribution::LogNormal { mu, sigma } => (mu + sigma * z).exp(),
            _ => self.inverse_cdf(standard_normal_cdf(z)),
        }
    }

    /// Quantile function. `u` is clamped to [0, 1].
    #[must_use]
    pub fn inverse_cdf(&self, u: f64) -> f64 {
        let u = u.clamp(0.0, 1.0);
        match *self {
            RiskDistribution::Normal { mean, std_dev } => {
                mean + std_dev * standard_normal_quantile(u)
            }
            RiskDistribution::Triangular {
                optimistic: a,
                most_likely: c,
                pessimistic: b,
            } => {
                let split = (c - a) / (b - a);
                if u < split {
                    a + (u * (b - a) * (c - a)).sqrt()
                } else {
                    b - ((1.0 - u) * (b - a) * (b - c)).sqrt()
                }
            }
            RiskDistribution::Uniform { min, max } => min + u * (max - min),
            // NaN on invalid shapes is caught by the engine's finiteness check
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => BetaCdf::new(alpha, beta)
                .map_or(f64::NAN, |d| min + (max - min) * d.inverse_cdf(u)),
            RiskDistribution::LogNormal { mu, sigma } => {
                (mu + sigma * standard_normal_quantile(u)).exp()
            }
        }
    }

    #[must_use]
    pub fn cdf(&self, x: f64) -> f64 {
        match *self {
            RiskDistribution::Normal { mean, std_dev } => {
                standard_normal_cdf((x - mean) / std_dev)
            }
            RiskDistribution::Triangular {
                optimistic: a,
                most_likely: c,
                pessimistic: b,
            } => {
                if x <= a {
                    0.0
                } else if x >= b {
                    1.0
                } else if x <= c {
                    (x - a) * (x - a) / ((b - a) * (c - a))
                } else {
                    1.0 - (b - x) * (b - x) / ((b - a) * (b - c))
                }
            }
            RiskDistribution::Uniform { min, max } => ((x - min) / (max - min)).clamp(0.0, 1.0),
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => {
                let y = ((x - min) / (max - min)).clamp(0.0, 1.0);
                BetaCdf::new(alpha, beta).map_or(f64::NAN, |d| d.cdf(y))
            }
            RiskDistribution::LogNormal { mu, sigma } => {
                if x <= 0.0 {
                    0.0
                } else {
                    standard_normal_cdf((x.ln() - mu) / sigma)
                }
            }
        }
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        match *self {
            RiskDistribution::Normal { mean, .. } => mean,
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => (optimistic + most_likely + pessimistic) / 3.0,
            RiskDistribution::Uniform { min, max } => (min + max) / 2.0,
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => min + (max - min) * alpha / (alpha + beta),
            RiskDistribution::LogNormal { mu, sigma } => (mu + sigma * sigma / 2.0).exp(),
        }
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        match *self {
            RiskDistribution::Normal { std_dev, .. } => std_dev * std_dev,
            RiskDistribution::Triangular {
                optimistic: a,
                most_likely: c,
                pessimistic: b,
            } => (a * a + b * b + c * c - a * b - a * c - b * c) / 18.0,
            RiskDistribution::Uniform { min, max } => (max - min).powi(2) / 12.0,
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => {
                let s = alpha + beta;
                (max - min).powi(2) * alpha * beta / (s * s * (s + 1.0))
            }
            RiskDistribution::LogNormal { mu, sigma } => {
                let s2 = sigma * sigma;
                (s2.exp() - 1.0) * (2.0 * mu + s2).exp()
            }
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Distribution of `factor * X` for a positive `factor`.
    pub fn scaled(&self, factor: f64) -> Result<Self, ValidationError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(invalid("factor", factor, "scale factor must be positive"));
        }
        let scaled = match *self {
            RiskDistribution::Normal { mean, std_dev } => RiskDistribution::Normal {
                mean: mean * factor,
                std_dev: std_dev * factor,
            },
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => RiskDistribution::Triangular {
                optimistic: optimistic * factor,
                most_likely: most_likely * factor,
                pessimistic: pessimistic * factor,
            },
            RiskDistribution::Uniform { min, max } => RiskDistribution::Uniform {
                min: min * factor,
                max: max * factor,
            },
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => RiskDistribution::Beta {
                alpha,
                beta,
                min: min * factor,
                max: max * factor,
            },
            RiskDistribution::LogNormal { mu, sigma } => RiskDistribution::LogNormal {
                mu: mu + factor.ln(),
                sigma,
            },
        };
        scaled.validate()?;
        Ok(scaled)
    }

    /// Distribution of `X + amount`. Not defined for lognormal.
    pub fn shifted(&self, amount: f64) -> Result<Self, ValidationError> {
        if !amount.is_finite() {
            return Err(invalid("amount", amount, "shift must be finite"));
        }
        let shifted = match *self {
            RiskDistribution::Normal { mean, std_dev } => RiskDistribution::Normal {
                mean: mean + amount,
                std_dev,
            },
            RiskDistribution::Triangular {
                optimistic,
                most_likely,
                pessimistic,
            } => RiskDistribution::Triangular {
                optimistic: optimistic + amount,
                most_likely: most_likely + amount,
                pessimistic: pessimistic + amount,
            },
            RiskDistribution::Uniform { min, max } => RiskDistribution::Uniform {
                min: min + amount,
                max: max + amount,
            },
            RiskDistribution::Beta {
                alpha,
                beta,
                min,
                max,
            } => RiskDistribution::Beta {
                alpha,
                beta,
                min: min + amount,
                max: max + amount,
            },
            RiskDistribution::LogNormal { .. } => {
                return Err(invalid(
                    "amount",
                    amount,
                    "lognormal impacts cannot be shifted",
                ));
            }
        };
        shifted.validate()?;
        Ok(shifted)
    }

    /// Replace a single named parameter, re-validating the result.
    pub fn with_parameter(&self, name: &str, value: f64) -> Result<Self, ValidationError> {
        let mut params = self.parameters();
        match params.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                return Err(ValidationError::new(
                    None,
                    "parameter",
                    Some(value),
                    "unknown parameter for this distribution family",
                ));
            }
        }
        Self::from_parameters(None, self.distribution_type(), &params)
    }

    // =========================================================================
    // Fitting
    // =========================================================================

    /// Estimate parameters of `family` from historical samples.
    ///
    /// Normal and lognormal use closed-form maximum likelihood. Uniform uses
    /// the sample extremes widened by one sample spacing. Triangular widens the
    /// extremes slightly and maximises the likelihood over the mode with a
    /// refined grid. Beta is moment-matched on the widened support.
    pub fn fit(family: DistributionType, samples: &[f64]) -> Result<Self, ValidationError> {
        check_samples(samples)?;
        let n = samples.len() as f64;
        let (min, max) = extremes(samples);
        let range = max - min;

        let dist = match family {
            DistributionType::Normal => {
                let (mean, variance) = mean_variance(samples);
                RiskDistribution::Normal {
                    mean,
                    std_dev: variance.sqrt(),
                }
            }
            DistributionType::LogNormal => {
                if min <= 0.0 {
                    return Err(invalid(
                        "samples",
                        min,
                        "lognormal requires strictly positive samples",
                    ));
                }
                let logs: Vec<f64> = samples.iter().map(|x| x.ln()).collect();
                let (mu, variance) = mean_variance(&logs);
                RiskDistribution::LogNormal {
                    mu,
                    sigma: variance.sqrt(),
                }
            }
            DistributionType::Uniform => {
                let spacing = range / (n - 1.0);
                RiskDistribution::Uniform {
                    min: min - spacing,
                    max: max + spacing,
                }
            }
            DistributionType::Triangular => {
                let pad = range / n;
                let (a, b) = (min - pad, max + pad);
                RiskDistribution::Triangular {
                    optimistic: a,
                    most_likely: triangular_mode_mle(samples, a, b),
                    pessimistic: b,
                }
            }
            DistributionType::Beta => {
                let pad = range / n;
                let (lo, hi) = (min - pad, max + pad);
                let scaled: Vec<f64> = samples.iter().map(|x| (x - lo) / (hi - lo)).collect();
                let (m, v) = mean_variance(&scaled);
                let common = m * (1.0 - m) / v - 1.0;
                if !(common.is_finite() && common > 0.0) {
                    return Err(invalid(
                        "samples",
                        v,
                        "sample variance too large for a beta fit",
                    ));
                }
                RiskDistribution::Beta {
                    alpha: m * common,
                    beta: (1.0 - m) * common,
                    min: lo,
                    max: hi,
                }
            }
        };

        dist.validate()?;
        Ok(dist)
    }

    /// Fit every family and keep the one with the smallest KS statistic.
    pub fn fit_best(samples: &[f64]) -> Result<FitResult, ValidationError> {
        check_samples(samples)?;
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mut best: Option<FitResult> = None;
        for family in DistributionType::ALL {
            let Ok(distribution) = Self::fit(family, samples) else {
                continue;
            };
            let ks_statistic = distribution.ks_statistic(&sorted);
            if !ks_statistic.is_finite() {
                continue;
            }
            if best.is_none_or(|b| ks_statistic < b.ks_statistic) {
                best = Some(FitResult {
                    family,
                    distribution,
                    ks_statistic,
                    p_value: kolmogorov_p_value(ks_statistic, sorted.len()),
                });
            }
        }

        best.ok_or_else(|| invalid("samples", samples.len() as f64, "no family could be fitted"))
    }

    /// Kolmogorov-Smirnov distance between `sorted` samples and this CDF.
    #[must_use]
    pub fn ks_statistic(&self, sorted: &[f64]) -> f64 {
        let n = sorted.len() as f64;
        sorted
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let f = self.cdf(x);
                let lower = f - i as f64 / n;
                let upper = (i + 1) as f64 / n - f;
                lower.max(upper)
            })
            .fold(0.0, f64::max)
    }
}

/// Standard normal CDF
#[must_use]
#[inline]
pub fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard normal quantile
#[must_use]
#[inline]
pub fn standard_normal_quantile(u: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * u)
}

/// Asymptotic Kolmogorov distribution tail probability with the
/// Stephens small-sample correction.
#[must_use]
pub fn kolmogorov_p_value(d: f64, n: usize) -> f64 {
    let sqrt_n = (n as f64).sqrt();
    let lambda = (sqrt_n + 0.12 + 0.11 / sqrt_n) * d;
    let exponent = -2.0 * lambda * lambda;

    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0_f64;
    for j in 1..=100 {
        let j = f64::from(j);
        let term = sign * (exponent * j * j).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1e-8 * sum.abs() {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous = term.abs();
    }
    // Series did not converge: lambda is tiny, the fit is indistinguishable
    1.0
}

fn invalid(parameter: &'static str, value: f64, reason: &'static str) -> ValidationError {
    ValidationError::new(None, parameter, Some(value), reason)
}

fn positive(parameter: &'static str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be positive"))
    }
}

fn ordered_range(min: f64, max: f64) -> Result<(), ValidationError> {
    if min < max {
        Ok(())
    } else {
        Err(invalid("max", max, "must be greater than min"))
    }
}

fn check_samples(samples: &[f64]) -> Result<(), ValidationError> {
    if samples.len() < MIN_FIT_SAMPLES {
        return Err(invalid(
            "samples",
            samples.len() as f64,
            "too few samples to fit a distribution",
        ));
    }
    if let Some(bad) = samples.iter().find(|x| !x.is_finite()) {
        return Err(invalid("samples", *bad, "samples must be finite"));
    }
    let (min, max) = extremes(samples);
    if min == max {
        return Err(invalid("samples", min, "samples have no spread"));
    }
    Ok(())
}

fn extremes(samples: &[f64]) -> (f64, f64) {
    samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        })
}

/// Mean and population (MLE) variance
fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

fn triangular_log_likelihood(samples: &[f64], a: f64, b: f64, c: f64) -> f64 {
    let width = b - a;
    samples
        .iter()
        .map(|&x| {
            let density = if x < c {
                2.0 * (x - a) / (width * (c - a))
            } else if x > c {
                2.0 * (b - x) / (width * (b - c))
            } else {
                2.0 / width
            };
            density.ln()
        })
        .sum()
}

fn triangular_mode_mle(samples: &[f64], a: f64, b: f64) -> f64 {
    let mut lo = a;
    let mut hi = b;
    let mut best = (a + b) / 2.0;

    // Coarse pass over the full support, then two zoomed passes
    for _ in 0..3 {
        let step = (hi - lo) / TRIANGULAR_GRID as f64;
        let mut best_ll = f64::NEG_INFINITY;
        for k in 0..=TRIANGULAR_GRID {
            let c = lo + step * k as f64;
            let ll = triangular_log_likelihood(samples, a, b, c);
            if ll > best_ll {
                best_ll = ll;
                best = c;
            }
        }
        lo = (best - step).max(a);
        hi = (best + step).min(b);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn draw(dist: &RiskDistribution, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n).map(|_| dist.sample(&mut rng).unwrap()).collect()
    }

    #[test]
    fn test_triangular_ordering_rejected() {
        let err = RiskDistribution::three_point(100.0, 50.0, 200.0).unwrap_err();
        assert_eq!(err.parameter, "most_likely");

        let err = RiskDistribution::three_point(100.0, 250.0, 200.0).unwrap_err();
        assert_eq!(err.parameter, "pessimistic");

        assert!(RiskDistribution::three_point(10.0, 10.0, 10.0).is_err());
        assert!(RiskDistribution::three_point(10.0, 10.0, 20.0).is_ok());
    }

    #[test]
    fn test_from_parameters_reports_risk_and_parameter() {
        let params = BTreeMap::from([("mean".to_string(), 10.0)]);
        let err = RiskDistribution::from_parameters(
            Some(RiskId(7)),
            DistributionType::Normal,
            &params,
        )
        .unwrap_err();
        assert_eq!(err.risk_id, Some(RiskId(7)));
        assert_eq!(err.parameter, "std_dev");

        let params = BTreeMap::from([
            ("mean".to_string(), 10.0),
            ("std_dev".to_string(), -1.0),
        ]);
        let err = RiskDistribution::from_parameters(
            Some(RiskId(7)),
            DistributionType::Normal,
            &params,
        )
        .unwrap_err();
        assert_eq!(err.risk_id, Some(RiskId(7)));
        assert_eq!(err.value, Some(-1.0));
        assert!(err.to_string().contains("#7"));
    }

    #[test]
    fn test_parameters_roundtrip_through_map() {
        let dist = RiskDistribution::pert(10.0, 20.0, 60.0).unwrap();
        let params = dist.parameters();
        let rebuilt =
            RiskDistribution::from_parameters(None, DistributionType::Beta, &params).unwrap();
        assert_eq!(dist, rebuilt);
    }

    #[test]
    fn test_inverse_cdf_inverts_cdf() {
        let dists = [
            RiskDistribution::Normal {
                mean: 5.0,
                std_dev: 2.0,
            },
            RiskDistribution::three_point(1.0, 3.0, 10.0).unwrap(),
            RiskDistribution::Uniform { min: -1.0, max: 4.0 },
            RiskDistribution::pert(1.0, 3.0, 10.0).unwrap(),
            RiskDistribution::LogNormal { mu: 1.0, sigma: 0.5 },
        ];
        for dist in dists {
            for u in [0.05, 0.25, 0.5, 0.75, 0.95] {
                let x = dist.inverse_cdf(u);
                assert!(
                    (dist.cdf(x) - u).abs() < 1e-4,
                    "{dist:?}: cdf(inverse_cdf({u})) = {}",
                    dist.cdf(x)
                );
            }
        }
    }

    #[test]
    fn test_from_standard_normal_is_monotone() {
        let dist = RiskDistribution::three_point(50.0, 120.0, 250.0).unwrap();
        let mut previous = f64::NEG_INFINITY;
        for i in -40..=40 {
            let v = dist.from_standard_normal(f64::from(i) / 10.0);
            assert!(v >= previous);
            assert!((50.0..=250.0).contains(&v));
            previous = v;
        }
    }

    #[test]
    fn test_sample_moments_match_analytic() {
        let dist = RiskDistribution::pert(100.0, 150.0, 300.0).unwrap();
        let samples = draw(&dist, 50_000, 11);
        let (mean, variance) = mean_variance(&samples);
        assert!((mean - dist.mean()).abs() < 0.01 * dist.mean());
        assert!((variance.sqrt() - dist.std_dev()).abs() < 0.03 * dist.std_dev());
    }

    #[test]
    fn test_scaled_and_shifted() {
        let dist = RiskDistribution::three_point(10.0, 20.0, 40.0).unwrap();
        let half = dist.scaled(0.5).unwrap();
        assert!((half.mean() - dist.mean() * 0.5).abs() < 1e-9);

        let shifted = dist.shifted(-5.0).unwrap();
        assert!((shifted.mean() - (dist.mean() - 5.0)).abs() < 1e-9);

        let lognormal = RiskDistribution::LogNormal { mu: 0.0, sigma: 1.0 };
        assert!((lognormal.scaled(2.0).unwrap().mean() - 2.0 * lognormal.mean()).abs() < 1e-9);
        assert!(lognormal.shifted(1.0).is_err());
        assert!(dist.scaled(0.0).is_err());
    }

    #[test]
    fn test_fit_normal_recovers_parameters() {
        let dist = RiskDistribution::Normal {
            mean: 1_000.0,
            std_dev: 150.0,
        };
        let samples = draw(&dist, 20_000, 3);
        let RiskDistribution::Normal { mean, std_dev } =
            RiskDistribution::fit(DistributionType::Normal, &samples).unwrap()
        else {
            panic!("expected normal");
        };
        assert!((mean - 1_000.0).abs() < 5.0);
        assert!((std_dev - 150.0).abs() < 5.0);
    }

    #[test]
    fn test_three_point_estimate_survives_refit() {
        let estimate = RiskDistribution::three_point(50.0, 120.0, 250.0).unwrap();
        let samples = draw(&estimate, 50_000, 11);
        let RiskDistribution::Triangular {
            optimistic,
            most_likely,
            pessimistic,
        } = RiskDistribution::fit(DistributionType::Triangular, &samples).unwrap()
        else {
            panic!("expected triangular");
        };
        assert!((optimistic - 50.0).abs() / 50.0 < 0.01, "optimistic {optimistic}");
        assert!((most_likely - 120.0).abs() / 120.0 < 0.01, "most likely {most_likely}");
        assert!((pessimistic - 250.0).abs() / 250.0 < 0.01, "pessimistic {pessimistic}");
    }

    #[test]
    fn test_fit_best_picks_lognormal_for_skewed_data() {
        let dist = RiskDistribution::LogNormal {
            mu: 10.0,
            sigma: 0.8,
        };
        let samples = draw(&dist, 5_000, 5);
        let fit = RiskDistribution::fit_best(&samples).unwrap();
        assert_eq!(fit.family, DistributionType::LogNormal);
        assert!(fit.ks_statistic < 0.03);
        assert!(fit.p_value > 0.001);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(RiskDistribution::fit(DistributionType::Normal, &[1.0, 2.0]).is_err());
        assert!(RiskDistribution::fit(DistributionType::Normal, &[1.0; 10]).is_err());
        assert!(
            RiskDistribution::fit(DistributionType::Normal, &[1.0, 2.0, f64::NAN, 3.0, 4.0])
                .is_err()
        );
        assert!(
            RiskDistribution::fit(DistributionType::LogNormal, &[-1.0, 2.0, 3.0, 4.0, 5.0])
                .is_err()
        );
    }

    #[test]
    fn test_kolmogorov_p_value_bounds() {
        assert!((kolmogorov_p_value(0.0, 100) - 1.0).abs() < 1e-12);
        assert!(kolmogorov_p_value(0.5, 100) < 1e-6);
        let mid = kolmogorov_p_value(0.05, 500);
        assert!(mid > 0.0 && mid < 1.0);
    }
}
