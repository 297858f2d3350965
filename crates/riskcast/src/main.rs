use std::path::PathBuf;

use clap::Parser;
use riskcast::cli::{Cli, Command};
use riskcast::{commands, init_logging};

fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("riskcast")
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_dir = (!cli.log_stderr).then(|| cli.log_dir.clone().unwrap_or_else(default_log_dir));
    init_logging(log_dir.as_deref(), &cli.log_level)?;

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let output = match &cli.command {
        Command::Run(args) => commands::run(args),
        Command::Compare(args) => commands::compare(args),
        Command::Scenarios(args) => commands::scenarios(args),
        Command::Sensitivity(args) => commands::sensitivity(args),
        Command::Mitigate(args) => commands::mitigate(args),
        Command::Calibrate(args) => commands::calibrate(args),
    }?;

    println!("{output}");
    tracing::info!("riskcast finished");
    Ok(())
}
