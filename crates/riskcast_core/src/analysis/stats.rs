//! Descriptive statistics over iteration samples.

use serde::{Deserialize, Serialize};

use crate::model::{
    CONFIDENCE_LEVELS, ConfidenceInterval, ImpactSummary, ImpactType, Percentiles,
    REPORTED_PERCENTILES,
};

/// Single-pass mean/variance accumulator (Welford).
///
/// `merge` is the pairwise combination from Chan et al., so per-batch
/// accumulators can be reduced in any grouping and produce the same count,
/// mean and variance up to floating point rounding.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, x: f64) {
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Combine two accumulators as if every value had been pushed into one
    #[must_use]
    pub fn merge(&self, other: &RunningStats) -> RunningStats {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let na = self.count as f64;
        let nb = other.count as f64;
        let n = na + nb;
        let delta = other.mean - self.mean;
        RunningStats {
            count: self.count + other.count,
            mean: self.mean + delta * nb / n,
            m2: self.m2 + other.m2 + delta * delta * na * nb / n,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Sample variance (n - 1 denominator)
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RunningStats::new();
        for x in iter {
            stats.push(x);
        }
        stats
    }
}

/// Percentile by linear interpolation between order statistics.
///
/// `sorted` must be ascending; `p` is in [0, 1]. Uses `h = (n - 1) p`.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

#[must_use]
pub fn percentiles(sorted: &[f64]) -> Percentiles {
    let [p10, p25, p50, p75, p90, p95, p99] = REPORTED_PERCENTILES.map(|p| percentile(sorted, p));
    Percentiles {
        p10,
        p25,
        p50,
        p75,
        p90,
        p95,
        p99,
    }
}

/// Percentile-method interval with equal tails around the median
#[must_use]
pub fn confidence_interval(sorted: &[f64], level: f64) -> ConfidenceInterval {
    let tail = (1.0 - level) / 2.0;
    ConfidenceInterval {
        level,
        lower: percentile(sorted, tail),
        upper: percentile(sorted, 1.0 - tail),
    }
}

/// Summary from pre-accumulated moments and the sorted sample array
#[must_use]
pub fn summarize_sorted(impact: ImpactType, stats: &RunningStats, sorted: &[f64]) -> ImpactSummary {
    let std_dev = stats.std_dev();
    ImpactSummary {
        impact,
        mean: stats.mean,
        std_dev,
        coefficient_of_variation: if stats.mean == 0.0 {
            0.0
        } else {
            std_dev / stats.mean
        },
        min: stats.min,
        max: stats.max,
        percentiles: percentiles(sorted),
        confidence_intervals: CONFIDENCE_LEVELS
            .iter()
            .map(|&level| confidence_interval(sorted, level))
            .collect(),
    }
}

/// Summary of an unsorted sample array. `None` when `values` is empty.
#[must_use]
pub fn summarize(impact: ImpactType, values: &[f64]) -> Option<ImpactSummary> {
    if values.is_empty() {
        return None;
    }
    let stats: RunningStats = values.iter().copied().collect();
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(summarize_sorted(impact, &stats, &sorted))
}

#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population covariance of two equally long series
#[must_use]
pub fn covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let (mx, my) = (mean(&x[..n]), mean(&y[..n]));
    x.iter()
        .zip(y)
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / n as f64
}

/// Pearson correlation; 0 when either series is constant
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let (x, y) = (&x[..n], &y[..n]);
    let cov = covariance(x, y);
    let sx = covariance(x, x).sqrt();
    let sy = covariance(y, y).sqrt();
    if sx == 0.0 || sy == 0.0 {
        0.0
    } else {
        cov / (sx * sy)
    }
}

/// Sample skewness (g1); 0 for constant or tiny samples
#[must_use]
pub fn skewness(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let m = mean(values);
    let n = values.len() as f64;
    let m2 = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|x| (x - m).powi(3)).sum::<f64>() / n;
    if m2 == 0.0 { 0.0 } else { m3 / m2.powf(1.5) }
}
