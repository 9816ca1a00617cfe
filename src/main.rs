use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cohort::manager::Manager;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Directory holding config.toml and the generated outputs.
    #[arg(long)]
    model_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Simulate every arm with base-case parameter values.
    Run,

    /// Run a batch of probabilistic sensitivity analysis samples.
    Psa {
        #[arg(long)]
        n_samples: usize,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Summarize all stored PSA batches.
    Analyze,

    /// Remove generated outputs.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.model_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Run => mgr.run_base_case()?,
        Command::Psa { n_samples, seed } => mgr.run_psa(n_samples, seed)?,
        Command::Analyze => mgr.analyze_psa()?,
        Command::Clean => mgr.clean()?,
    }

    Ok(())
}
