//! Conformance suite runner.
//!
//! Runs every catalogue scenario, or a chosen subset, each on a fresh
//! simulated network, then logs coverage of the engine surface.
//!
//! # Usage
//!
//! ```bash
//! # Whole suite, replayable
//! duet-runner --seed 42
//!
//! # Two scenarios with a config file and verbose logs
//! duet-runner --config duet.toml --only connect --only file_transfer --log-level debug
//! ```
//!
//! Exits non-zero only when an engine breaks a contract or an unknown
//! scenario is requested. Network timeouts are logged as inconclusive.

mod settings;
mod suite;

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use duet_harness::CoverageLog;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

/// Two-peer conformance suite
#[derive(Parser, Debug)]
#[command(name = "duet-runner")]
#[command(about = "Run the two-peer conformance suite against the simulated network")]
#[command(version)]
struct Args {
    /// TOML file with harness keys and an optional [sim] table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for a replayable run, overriding the config
    #[arg(short, long)]
    seed: Option<u64>,

    /// Run only these scenarios (repeatable)
    #[arg(long)]
    only: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let settings = Settings::load(args.config.as_deref())?.with_seed(args.seed);
    match settings.harness.seed {
        Some(seed) => tracing::info!(seed, "seeded run"),
        None => tracing::info!("unseeded run"),
    }

    let (names, unknown) = suite::select(&args.only);
    for name in &unknown {
        tracing::error!(scenario = %name, "no such scenario");
    }

    let log = CoverageLog::new();
    let mut summary = suite::run(&settings, &names, &log);
    summary.unknown.extend(unknown);

    tracing::info!(
        passed = summary.passed(),
        failed = summary.failures(),
        total = summary.verdicts.len(),
        "suite finished"
    );

    Ok(if summary.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
