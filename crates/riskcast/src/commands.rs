//! Subcommand implementations. Each returns the text to print.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{WrapErr, eyre};
use riskcast_core::analysis::compare_results;
use riskcast_core::calibration::{CATEGORY_WIDE, HistoricalOutcome};
use riskcast_core::config::SimulationConfig;
use riskcast_core::correlation::CorrelationMatrix;
use riskcast_core::engine::{MonteCarloEngine, RunControl};
use riskcast_core::model::{ImpactType, RiskRegister, SimulationResult};
use riskcast_core::scenario::{
    MitigationStrategy, ParameterDelta, ScenarioGenerator, SensitivityFactor,
};
use serde::{Deserialize, Serialize};

use crate::cli::{
    CalibrateArgs, CompareArgs, ConfigArgs, MitigateArgs, RunArgs, ScenariosArgs, SensitivityArgs,
};
use crate::report;
use crate::storage::{self, FileRegister};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// One entry of a scenarios file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub deltas: Vec<ParameterDelta>,
}

#[derive(Debug, Serialize)]
struct ScenarioOutput<'a> {
    name: &'a str,
    result: &'a SimulationResult,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> color_eyre::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Load a config and apply register, library and override options
pub fn load_config(args: &ConfigArgs) -> color_eyre::Result<SimulationConfig> {
    let mut config: SimulationConfig = storage::load(&args.config)?;

    if let (Some(register), Some(project)) = (&args.register, &args.project) {
        config.risks = FileRegister::new(register)
            .risks(project)
            .wrap_err_with(|| format!("reading project '{project}' from the register"))?;
        tracing::info!(project = %project, risks = config.risks.len(), "risks loaded from register");
    }

    if let Some(coefficient) = args.dependency_correlation {
        if config.correlation.is_none() {
            config.correlation = Some(CorrelationMatrix::from_dependencies(
                &config.risks,
                coefficient,
            ));
        }
    }

    if let Some(path) = &args.library {
        let library = storage::load_library(path)?;
        let project_type = args.project_type.as_deref().unwrap_or(CATEGORY_WIDE);
        for risk in config.risks.iter_mut().filter(|r| !r.is_complete()) {
            if library.complete_risk(risk, project_type) {
                tracing::info!(risk = %risk.id, name = %risk.name, "filled from pattern library");
            } else {
                tracing::warn!(risk = %risk.id, name = %risk.name, "no pattern for incomplete risk");
            }
        }
    }

    if let Some(seed) = args.seed {
        config.random_seed = Some(seed);
    }
    if let Some(iterations) = args.iterations {
        config.iteration_count = iterations;
    }
    Ok(config)
}

/// Run on a worker thread while reporting progress from this one
fn run_with_progress(
    engine: &MonteCarloEngine,
    config: &SimulationConfig,
) -> color_eyre::Result<Arc<SimulationResult>> {
    let control = RunControl::new();
    let total = config.iteration_count;

    let result = std::thread::scope(|scope| {
        let worker = scope.spawn(|| engine.run_with_control(config, &control));
        while !worker.is_finished() {
            std::thread::sleep(PROGRESS_INTERVAL);
            tracing::debug!(completed = control.completed(), total, "simulation progress");
        }
        worker.join()
    });

    match result {
        Ok(run) => Ok(run?),
        Err(_) => Err(eyre!("simulation worker panicked")),
    }
}

pub fn run(args: &RunArgs) -> color_eyre::Result<String> {
    let config = load_config(&args.source)?;
    let result = run_with_progress(&MonteCarloEngine::new(), &config)?;
    tracing::info!(
        seed = result.seed,
        cost_mean = result.expected_value(ImpactType::Cost),
        schedule_mean = result.expected_value(ImpactType::Schedule),
        "run complete"
    );
    if args.json {
        return to_json(&*result);
    }
    Ok(report::format_result(&config, &result))
}

pub fn compare(args: &CompareArgs) -> color_eyre::Result<String> {
    let a: SimulationConfig = storage::load(&args.a)?;
    let b: SimulationConfig = storage::load(&args.b)?;
    let impact = ImpactType::from(args.impact);

    let mut runs = MonteCarloEngine::new().run_many(&[a, b]).into_iter();
    let (Some(a), Some(b)) = (runs.next(), runs.next()) else {
        return Err(eyre!("expected two simulation results"));
    };
    let (a, b) = (a?, b?);

    let report = compare_results(&a, &b, impact, args.test.into(), args.alpha)
        .ok_or_else(|| eyre!("both configs need at least two {impact} samples to compare"))?;
    if args.json {
        return to_json(&report);
    }
    Ok(report::format_comparison(&report))
}

pub fn scenarios(args: &ScenariosArgs) -> color_eyre::Result<String> {
    let generator = ScenarioGenerator::new(load_config(&args.source)?);
    let specs: Vec<ScenarioSpec> = storage::load(&args.scenarios)?;
    let scenarios = specs
        .into_iter()
        .map(|entry| {
            generator
                .scenario(entry.name.clone(), entry.deltas)
                .wrap_err_with(|| format!("building scenario '{}'", entry.name))
        })
        .collect::<color_eyre::Result<Vec<_>>>()?;

    let engine = MonteCarloEngine::new();
    let results = generator
        .run_scenarios(&engine, &scenarios)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    if args.json {
        let output: Vec<ScenarioOutput<'_>> = scenarios
            .iter()
            .zip(&results)
            .map(|(s, r)| ScenarioOutput {
                name: &s.name,
                result: r,
            })
            .collect();
        return to_json(&output);
    }

    let mut out = String::new();
    for (scenario, result) in scenarios.iter().zip(&results) {
        out.push_str(&format!("== {} ==\n", scenario.name));
        out.push_str(&report::format_result(&scenario.config, result));
    }
    Ok(out)
}

pub fn sensitivity(args: &SensitivityArgs) -> color_eyre::Result<String> {
    let generator = ScenarioGenerator::new(load_config(&args.source)?);
    let factors: Vec<SensitivityFactor> = storage::load(&args.factors)?;
    let tornado = if args.baseline {
        generator.baseline_sensitivity(&factors, args.impact.into())?
    } else {
        generator.sensitivity(&MonteCarloEngine::new(), &factors, args.impact.into())?
    };
    if args.json {
        return to_json(&tornado);
    }
    Ok(report::format_tornado(&tornado))
}

pub fn mitigate(args: &MitigateArgs) -> color_eyre::Result<String> {
    let generator =
        ScenarioGenerator::new(load_config(&args.source)?).with_delay_cost(args.delay_cost);
    let strategies: Vec<MitigationStrategy> = storage::load(&args.strategies)?;
    let ranked = generator.rank_mitigations(&MonteCarloEngine::new(), &strategies)?;
    if args.json {
        return to_json(&ranked);
    }
    Ok(report::format_mitigations(&ranked))
}

pub fn calibrate(args: &CalibrateArgs) -> color_eyre::Result<String> {
    let outcomes: Vec<HistoricalOutcome> = storage::load(&args.history)?;
    let mut library = storage::load_library(&args.library)?;
    let report = library.recalibrate(&outcomes)?;
    storage::save_library(&args.library, &library)?;
    tracing::info!(
        outcomes = report.outcomes,
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        "library recalibrated"
    );
    if args.json {
        return to_json(&report);
    }
    Ok(report::format_recalibration(&report, &library))
}
