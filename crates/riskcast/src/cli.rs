use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use riskcast_core::analysis::{DEFAULT_ALPHA, SignificanceTest};
use riskcast_core::model::ImpactType;

#[derive(Parser, Debug)]
#[command(name = "riskcast")]
#[command(about = "Monte Carlo cost and schedule risk simulation")]
pub struct Cli {
    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Directory for riskcast.log (default: platform data directory)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long, global = true, conflicts_with = "log_dir")]
    pub log_stderr: bool,

    /// Worker threads for simulation (default: one per core)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one simulation and print its summary
    Run(RunArgs),
    /// Run two configs and test whether their outcomes differ
    Compare(CompareArgs),
    /// Run named what-if variants of a base config
    Scenarios(ScenariosArgs),
    /// One-at-a-time sensitivity sweep (tornado ranking)
    Sensitivity(SensitivityArgs),
    /// Rank mitigation strategies by net benefit
    Mitigate(MitigateArgs),
    /// Fold completed-project outcomes into the pattern library
    Calibrate(CalibrateArgs),
}

/// Where a simulation config comes from and what to override
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Simulation config (YAML, or JSON by extension)
    pub config: PathBuf,

    /// Risk register file; replaces the config's risks with the project's
    #[arg(long, requires = "project")]
    pub register: Option<PathBuf>,

    /// Project to read from the register
    #[arg(long, requires = "register")]
    pub project: Option<String>,

    /// Correlation applied between risks linked by dependencies, when the
    /// config has no matrix
    #[arg(long)]
    pub dependency_correlation: Option<f64>,

    /// Pattern library used to fill risks without parameters
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Project type for pattern lookups (default: category-wide)
    #[arg(long)]
    pub project_type: Option<String>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the iteration count
    #[arg(long)]
    pub iterations: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    pub a: PathBuf,
    pub b: PathBuf,

    #[arg(long, value_enum, default_value_t = ImpactArg::Cost)]
    pub impact: ImpactArg,

    #[arg(long, value_enum, default_value_t = TestArg::Auto)]
    pub test: TestArg,

    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: f64,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ScenariosArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// List of `{ name, deltas }` entries
    pub scenarios: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SensitivityArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// List of sensitivity factors
    pub factors: PathBuf,

    #[arg(long, value_enum, default_value_t = ImpactArg::Cost)]
    pub impact: ImpactArg,

    /// Hold other risks at their baseline impact instead of simulating
    #[arg(long)]
    pub baseline: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MitigateArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// List of mitigation strategies
    pub strategies: PathBuf,

    /// Currency value of one day of schedule delay
    #[arg(long, default_value_t = 0.0)]
    pub delay_cost: f64,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// List of historical outcomes
    pub history: PathBuf,

    /// Pattern library (JSON); created if missing
    #[arg(long)]
    pub library: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactArg {
    Cost,
    Schedule,
}

impl From<ImpactArg> for ImpactType {
    fn from(arg: ImpactArg) -> Self {
        match arg {
            ImpactArg::Cost => ImpactType::Cost,
            ImpactArg::Schedule => ImpactType::Schedule,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestArg {
    Welch,
    MannWhitney,
    Auto,
}

impl From<TestArg> for SignificanceTest {
    fn from(arg: TestArg) -> Self {
        match arg {
            TestArg::Welch => SignificanceTest::Welch,
            TestArg::MannWhitney => SignificanceTest::MannWhitney,
            TestArg::Auto => SignificanceTest::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "riskcast",
            "--threads",
            "2",
            "run",
            "project.yaml",
            "--seed",
            "7",
            "--register",
            "register.yaml",
            "--project",
            "bridge",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.source.seed, Some(7));
        assert_eq!(args.source.project.as_deref(), Some("bridge"));
        assert!(args.json);
    }

    #[test]
    fn test_register_requires_project() {
        assert!(
            Cli::try_parse_from(["riskcast", "run", "p.yaml", "--register", "r.yaml"]).is_err()
        );
    }

    #[test]
    fn test_compare_defaults() {
        let cli = Cli::try_parse_from(["riskcast", "compare", "a.yaml", "b.yaml"]).unwrap();
        let Command::Compare(args) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.impact, ImpactArg::Cost);
        assert_eq!(args.test, TestArg::Auto);
        assert_eq!(args.alpha, DEFAULT_ALPHA);
    }
}
