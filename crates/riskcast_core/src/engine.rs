//! Monte Carlo engine
//!
//! Iterations are split into fixed-size batches. Batch `b` draws from its own
//! `SmallRng` seeded with `splitmix64(seed ^ b * φ)`, so a batch produces the
//! same numbers no matter which worker runs it or in which order. Batch
//! statistics are merged in batch order, which makes a seeded run bit-for-bit
//! reproducible serially, on any rayon pool size, and across cache misses.
//!
//! Every iteration draws one standard normal and one uniform per risk. The
//! normals are mixed through the Cholesky factor when a correlation matrix is
//! present and mapped onto each marginal; the uniform decides occurrence.
//! The draw count per iteration is therefore independent of parameters,
//! which keeps variants run with the same seed on common random numbers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rustc_hash::FxHashMap;

use crate::analysis::{RunningStats, TOP_CONTRIBUTORS, rank_contributions, summarize_sorted};
use crate::cache::SimulationCache;
use crate::config::{ConvergenceConfig, SimulationConfig};
use crate::correlation::CholeskyFactor;
use crate::error::{NumericalError, Result, SimulationError};
use crate::model::{
    Checkpoint, ConvergenceReport, ImpactType, IterationSamples, RiskDistribution, RiskId,
    SimulationResult, SimulationWarning,
};

/// Iterations per batch; independent of the worker count
pub const BATCH_SIZE: usize = 1_000;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64 finaliser
#[must_use]
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// RNG seed for batch `batch` of a run seeded with `seed`
#[must_use]
pub fn batch_seed(seed: u64, batch: usize) -> u64 {
    splitmix64(seed ^ (batch as u64).wrapping_mul(GOLDEN_GAMMA))
}

/// Cancellation flag and progress counter shared with a running simulation.
///
/// Cloning shares the underlying atomics. Both are checked and updated at
/// batch boundaries only.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    checkpointing: bool,
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the statistics of completed batches when the run is cancelled
    #[must_use]
    pub fn with_checkpointing(mut self) -> Self {
        self.checkpointing = true;
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Iterations completed so far
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    fn advance(&self, iterations: usize) {
        self.completed.fetch_add(iterations, Ordering::Relaxed);
    }
}

/// Runs simulations, optionally through a shared result cache
#[derive(Debug, Clone, Default)]
pub struct MonteCarloEngine {
    cache: Option<Arc<SimulationCache>>,
}

impl MonteCarloEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache(cache: Arc<SimulationCache>) -> Self {
        Self { cache: Some(cache) }
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<SimulationCache>> {
        self.cache.as_ref()
    }

    pub fn run_simulation(&self, config: &SimulationConfig) -> Result<Arc<SimulationResult>> {
        self.run_with_control(config, &RunControl::new())
    }

    /// Validate and run `config`, honouring cancellation requests in `control`.
    pub fn run_with_control(
        &self,
        config: &SimulationConfig,
        control: &RunControl,
    ) -> Result<Arc<SimulationResult>> {
        config.validate()?;
        let config_hash = config.content_hash();

        match &self.cache {
            Some(cache) => cache.get_or_run(config_hash, || {
                simulate(config, config_hash, control).map(Arc::new)
            }),
            None => simulate(config, config_hash, control).map(Arc::new),
        }
    }

    /// Run several configs in parallel. Configs with equal content hashes are
    /// simulated once and share the result.
    pub fn run_many(&self, configs: &[SimulationConfig]) -> Vec<Result<Arc<SimulationResult>>> {
        let mut unique: Vec<usize> = Vec::new();
        let mut by_hash: FxHashMap<u64, usize> = FxHashMap::default();
        let slots: Vec<usize> = configs
            .iter()
            .enumerate()
            .map(|(i, config)| {
                *by_hash.entry(config.content_hash()).or_insert_with(|| {
                    unique.push(i);
                    unique.len() - 1
                })
            })
            .collect();

        let outcomes = for_each_index(unique.len(), |u| self.run_simulation(&configs[unique[u]]));
        slots.into_iter().map(|s| outcomes[s].clone()).collect()
    }
}

#[cfg(feature = "parallel")]
fn for_each_index<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::iter::{IntoParallelIterator, ParallelIterator};
    (0..count).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
fn for_each_index<T, F>(count: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T,
{
    (0..count).map(f).collect()
}

struct PreparedRisk {
    id: RiskId,
    impact: ImpactType,
    distribution: RiskDistribution,
    probability: f64,
}

/// Validated, pre-converted view of a config
struct Plan {
    risks: Vec<PreparedRisk>,
    factor: Option<CholeskyFactor>,
    baseline_cost: f64,
    iteration_count: usize,
    num_batches: usize,
    /// Retain every `stride`-th iteration; `None` keeps nothing
    stride: Option<usize>,
}

impl Plan {
    fn new(config: &SimulationConfig) -> Result<Self> {
        let risks = config
            .risks
            .iter()
            .map(|risk| {
                Ok(PreparedRisk {
                    id: risk.id,
                    impact: risk.impact_type,
                    distribution: risk.distribution()?,
                    probability: risk.probability,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let factor = match &config.correlation {
            Some(matrix) if !matrix.is_identity() => Some(matrix.cholesky()?),
            _ => None,
        };

        let iteration_count = config.iteration_count;
        let stride = match config.max_retained_samples {
            0 => None,
            max => Some(iteration_count.div_ceil(max).max(1)),
        };

        Ok(Self {
            risks,
            factor,
            baseline_cost: config.baseline_cost_total(),
            iteration_count,
            num_batches: iteration_count.div_ceil(BATCH_SIZE),
            stride,
        })
    }

    fn batch_range(&self, batch: usize) -> std::ops::Range<usize> {
        let start = batch * BATCH_SIZE;
        start..(start + BATCH_SIZE).min(self.iteration_count)
    }
}

struct BatchOutput {
    cost: RunningStats,
    schedule: RunningStats,
    cost_totals: Vec<f64>,
    schedule_totals: Vec<f64>,
    retained_cost: Vec<f64>,
    retained_schedule: Vec<f64>,
    retained_risks: Vec<Vec<f64>>,
}

enum BatchOutcome {
    Done(Box<BatchOutput>),
    Failed(NumericalError),
    Cancelled,
    /// Not run because an earlier batch already failed
    Skipped,
}

fn run_batch(plan: &Plan, seed: u64, batch: usize) -> std::result::Result<BatchOutput, NumericalError> {
    let range = plan.batch_range(batch);
    let n = plan.risks.len();
    let mut rng = SmallRng::seed_from_u64(batch_seed(seed, batch));

    let mut z = vec![0.0; n];
    let mut u = vec![0.0; n];
    let mut mixed = vec![0.0; n];

    let mut out = BatchOutput {
        cost: RunningStats::new(),
        schedule: RunningStats::new(),
        cost_totals: Vec::with_capacity(range.len()),
        schedule_totals: Vec::with_capacity(range.len()),
        retained_cost: Vec::new(),
        retained_schedule: Vec::new(),
        retained_risks: vec![Vec::new(); n],
    };

    for iteration in range {
        for i in 0..n {
            z[i] = rng.sample(StandardNormal);
            u[i] = rng.random::<f64>();
        }
        let normals: &[f64] = match &plan.factor {
            Some(factor) => {
                factor.correlate(&z, &mut mixed);
                &mixed
            }
            None => &z,
        };

        let retain = plan.stride.is_some_and(|s| iteration % s == 0);
        let mut cost = plan.baseline_cost;
        let mut schedule = 0.0;

        for (i, risk) in plan.risks.iter().enumerate() {
            let value = if u[i] < risk.probability {
                risk.distribution.from_standard_normal(normals[i])
            } else {
                0.0
            };
            if !value.is_finite() {
                return Err(NumericalError {
                    iteration,
                    risk_id: Some(risk.id),
                    impact: risk.impact,
                    value,
                });
            }
            match risk.impact {
                ImpactType::Cost => cost += value,
                ImpactType::Schedule => schedule += value,
            }
            if retain {
                out.retained_risks[i].push(value);
            }
        }

        for (impact, total) in [(ImpactType::Cost, cost), (ImpactType::Schedule, schedule)] {
            if !total.is_finite() {
                return Err(NumericalError {
                    iteration,
                    risk_id: None,
                    impact,
                    value: total,
                });
            }
        }

        out.cost.push(cost);
        out.schedule.push(schedule);
        out.cost_totals.push(cost);
        out.schedule_totals.push(schedule);
        if retain {
            out.retained_cost.push(cost);
            out.retained_schedule.push(schedule);
        }
    }

    Ok(out)
}

fn simulate(
    config: &SimulationConfig,
    config_hash: u64,
    control: &RunControl,
) -> Result<SimulationResult> {
    let plan = Plan::new(config)?;
    let seed = config.random_seed.unwrap_or_else(rand::random);

    tracing::debug!(
        risks = plan.risks.len(),
        iterations = plan.iteration_count,
        batches = plan.num_batches,
        seed,
        correlated = plan.factor.is_some(),
        "starting simulation"
    );

    // Lowest failing batch so far; later batches are skipped, earlier ones still run
    let first_failure = AtomicUsize::new(usize::MAX);

    let outcomes = for_each_index(plan.num_batches, |batch| {
        if control.is_cancelled() {
            return BatchOutcome::Cancelled;
        }
        if batch > first_failure.load(Ordering::Relaxed) {
            return BatchOutcome::Skipped;
        }
        match run_batch(&plan, seed, batch) {
            Ok(output) => {
                control.advance(plan.batch_range(batch).len());
                BatchOutcome::Done(Box::new(output))
            }
            Err(err) => {
                first_failure.fetch_min(batch, Ordering::Relaxed);
                BatchOutcome::Failed(err)
            }
        }
    });

    let mut batches = Vec::with_capacity(plan.num_batches);
    for outcome in outcomes {
        match outcome {
            BatchOutcome::Done(output) => batches.push(*output),
            BatchOutcome::Failed(err) => {
                tracing::debug!(%err, "simulation aborted");
                return Err(err.into());
            }
            BatchOutcome::Cancelled => {
                return Err(cancelled(config_hash, &batches, control));
            }
            // Only batches after a failure are skipped, and the failure is
            // returned above before any of them is reached
            BatchOutcome::Skipped => {
                unreachable!("batch {} skipped without an earlier failure", batches.len())
            }
        }
    }

    Ok(assemble(config, config_hash, seed, &plan, batches))
}

fn cancelled(config_hash: u64, completed: &[BatchOutput], control: &RunControl) -> SimulationError {
    let checkpoint = control.checkpointing.then(|| {
        let (cost, schedule) = completed.iter().fold(
            (RunningStats::new(), RunningStats::new()),
            |(cost, schedule), batch| (cost.merge(&batch.cost), schedule.merge(&batch.schedule)),
        );
        Box::new(Checkpoint {
            config_hash,
            completed_batches: completed.len(),
            iterations: cost.count as usize,
            cost,
            schedule,
        })
    });
    tracing::debug!(completed_batches = completed.len(), "simulation cancelled");
    SimulationError::Cancelled { checkpoint }
}

fn assemble(
    config: &SimulationConfig,
    config_hash: u64,
    seed: u64,
    plan: &Plan,
    batches: Vec<BatchOutput>,
) -> SimulationResult {
    let n = plan.risks.len();
    let mut cost_stats = RunningStats::new();
    let mut schedule_stats = RunningStats::new();
    let mut cost_batches = Vec::with_capacity(batches.len());
    let mut schedule_batches = Vec::with_capacity(batches.len());
    let mut cost_all = Vec::with_capacity(plan.iteration_count);
    let mut schedule_all = Vec::with_capacity(plan.iteration_count);
    let mut samples = IterationSamples {
        stride: plan.stride.unwrap_or(0),
        risk_ids: plan.risks.iter().map(|r| r.id).collect(),
        per_risk: vec![Vec::new(); n],
        ..IterationSamples::default()
    };

    for batch in batches {
        cost_stats = cost_stats.merge(&batch.cost);
        schedule_stats = schedule_stats.merge(&batch.schedule);
        cost_batches.push(batch.cost);
        schedule_batches.push(batch.schedule);
        cost_all.extend(batch.cost_totals);
        schedule_all.extend(batch.schedule_totals);
        samples.cost_totals.extend(batch.retained_cost);
        samples.schedule_totals.extend(batch.retained_schedule);
        for (dst, src) in samples.per_risk.iter_mut().zip(batch.retained_risks) {
            dst.extend(src);
        }
    }

    let mut result = SimulationResult {
        config_hash,
        seed,
        iteration_count: plan.iteration_count,
        convergence_status: true,
        convergence: Vec::new(),
        cost: None,
        schedule: None,
        contributions: Vec::new(),
        warnings: Vec::new(),
        samples: IterationSamples::default(),
    };

    for impact in ImpactType::ALL {
        if !config.simulates(impact) {
            match impact {
                ImpactType::Cost => samples.cost_totals.clear(),
                ImpactType::Schedule => samples.schedule_totals.clear(),
            }
            continue;
        }

        let (stats, per_batch, all) = match impact {
            ImpactType::Cost => (&cost_stats, &cost_batches, &mut cost_all),
            ImpactType::Schedule => (&schedule_stats, &schedule_batches, &mut schedule_all),
        };
        all.sort_by(f64::total_cmp);
        let summary = summarize_sorted(impact, stats, all);

        let report = assess_convergence(impact, per_batch, &config.convergence);
        if !report.converged {
            tracing::warn!(
                %impact,
                relative_change = report.relative_change,
                tolerance = config.convergence.tolerance,
                "simulation did not converge"
            );
            result.warnings.push(SimulationWarning::NotConverged {
                impact,
                relative_change: report.relative_change,
            });
        }
        result.convergence_status &= report.converged;
        result.convergence.push(report);

        let risks: Vec<(RiskId, &[f64])> = plan
            .risks
            .iter()
            .zip(&samples.per_risk)
            .filter(|(risk, _)| risk.impact == impact)
            .map(|(risk, values)| (risk.id, values.as_slice()))
            .collect();
        result.contributions.extend(rank_contributions(
            impact,
            &risks,
            samples.totals(impact),
            TOP_CONTRIBUTORS,
        ));

        match impact {
            ImpactType::Cost => result.cost = Some(summary),
            ImpactType::Schedule => result.schedule = Some(summary),
        }
    }

    if samples.stride != 1 {
        result.warnings.push(SimulationWarning::SamplesThinned {
            retained: samples.len(),
            total: plan.iteration_count,
        });
    }
    result.samples = samples;

    tracing::debug!(
        seed,
        converged = result.convergence_status,
        cost_mean = result.expected_value(ImpactType::Cost),
        schedule_mean = result.expected_value(ImpactType::Schedule),
        "simulation finished"
    );
    result
}

/// Relative change of the cumulative mean across the trailing window of
/// batches, evaluated after the burn-in.
fn assess_convergence(
    impact: ImpactType,
    per_batch: &[RunningStats],
    settings: &ConvergenceConfig,
) -> ConvergenceReport {
    let mut cumulative = RunningStats::new();
    let means: Vec<f64> = per_batch
        .iter()
        .map(|batch| {
            cumulative = cumulative.merge(batch);
            cumulative.mean
        })
        .collect();

    let n = means.len();
    let window = settings.window_batches.min(n.saturating_sub(1)).max(1);
    let burn_in = (settings.burn_in_fraction * n as f64).floor() as usize;
    let first_check = burn_in.max(window);

    let relative = |b: usize| {
        let delta = (means[b] - means[b - window]).abs();
        if delta == 0.0 {
            0.0
        } else {
            delta / means[b].abs().max(f64::MIN_POSITIVE)
        }
    };

    if first_check >= n {
        return ConvergenceReport {
            impact,
            converged: false,
            relative_change: 0.0,
            converged_at_batch: None,
        };
    }

    let relative_change = relative(n - 1);
    ConvergenceReport {
        impact,
        converged: relative_change < settings.tolerance,
        relative_change,
        converged_at_batch: (first_check..n).find(|&b| relative(b) < settings.tolerance),
    }
}
