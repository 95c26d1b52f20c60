use std::path::PathBuf;

use clap::Parser;

/// Solar surplus diverter, run against a modelled site.
#[derive(Debug, Parser)]
#[command(name = "surplus-divert", version, about)]
pub struct Cli {
    /// Load configuration from a TOML file
    #[arg(long, value_name = "PATH", conflicts_with = "preset")]
    pub config: Option<PathBuf>,

    /// Use a built-in preset (default, sunny, night_timer)
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Override the number of ticks to run
    #[arg(long)]
    pub ticks: Option<usize>,

    /// Override the simulation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Export per-tick results to CSV
    #[arg(long, value_name = "PATH")]
    pub telemetry_out: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}
