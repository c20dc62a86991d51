//! vgl - drive the background force-directed layout scheduler from the
//! command line.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod sample;

use commands::run::RunArgs;
use config::ConfigArgs;

/// Lay out synthetic multi-component graphs on a background worker.
#[derive(Parser, Debug)]
#[command(
    name = "vgl",
    author,
    version,
    about = "vgl: background force-directed graph layout",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a graph, lay it out and print a JSON report.
    Run(RunArgs),

    /// Show the effective layout settings.
    Settings {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(cli: &Cli) {
    // RUST_LOG wins over -v / -q
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Run(args) => {
            let report = commands::run::execute(args)?;
            if !cli.quiet {
                commands::run::print_summary(&report);
            }
            write_json(&report, args.output.as_deref())?;
        }

        Commands::Settings { config, json } => {
            let report = commands::settings::execute(config)?;
            if *json {
                write_json(&report, None)?;
            } else {
                commands::settings::print_table(&report);
            }
        }
    }

    Ok(())
}
