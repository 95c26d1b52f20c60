//! Dry-run entry point: CLI wiring, logging and the control loop against a
//! modelled site.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use surplus_divert::config::Config;
use surplus_divert::io::export::export_csv;
use surplus_divert::runner::Controller;
use surplus_divert::sim::SimulatedSite;

use cli::Cli;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(path) = &cli.config {
        Config::from_toml_file(path)?
    } else {
        Config::from_preset(cli.preset.as_deref().unwrap_or("default"))?
    };

    if let Some(seed) = cli.seed {
        config.simulation.seed = seed;
    }
    if let Some(ticks) = cli.ticks {
        config.simulation.ticks = ticks;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        bail!("{} invalid configuration value(s)", errors.len());
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let site = SimulatedSite::new(&config);
    let mut controller = Controller::new(&config, Box::new(site.clone()))?;

    let mut source = site.clone();
    let mut sink = site.clone();
    let summary = controller.run(&mut source, &mut sink, config.simulation.ticks, |_| {});
    let shutdown = controller.shutdown(&mut sink);

    for record in controller.records() {
        println!(
            "{}  gen {:>6.0} W  house {:>5.0} W  surplus {:>6.0} -> {:>6.0} W  cmds {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.generation_watts,
            record.house_watts,
            record.surplus_start_watts,
            record.surplus_end_watts,
            record.commands,
        );
    }
    info!(
        completed = summary.completed,
        aborted = summary.aborted,
        commands = summary.commands,
        shutdown = shutdown.len(),
        soc_pct = site.car_soc_pct(),
        "run finished"
    );

    if let Some(path) = &cli.telemetry_out {
        export_csv(controller.records(), path)
            .with_context(|| format!("failed to write CSV to {}", path.display()))?;
        eprintln!("Telemetry written to {}", path.display());
    }
    Ok(())
}
