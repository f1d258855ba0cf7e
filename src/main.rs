//! Strata CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::Language;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Incremental call-graph analysis and module clustering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the cached analysis up to date and print a summary
    Analyze {
        /// Bundle exported by the analysis client
        #[arg(short, long)]
        bundle: PathBuf,

        /// Language to analyse (defaults to the first configured one)
        #[arg(short, long)]
        language: Option<Language>,

        /// Write the cluster result to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cluster the call graph of a bundle file
    Cluster {
        bundle: PathBuf,

        #[arg(long)]
        target: Option<usize>,

        #[arg(long)]
        min_size: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Compare two cluster result files
    Compare { old: PathBuf, new: PathBuf },
    /// Show cache metadata
    Status,
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "strata={log_level},strata_core={log_level},strata_incremental={log_level}"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Strata v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Repository root: {}", cli.root.display());

    match cli.command {
        Commands::Analyze {
            bundle,
            language,
            output,
        } => commands::analyze(cli.root, bundle, language, output),
        Commands::Cluster {
            bundle,
            target,
            min_size,
            seed,
        } => commands::cluster(cli.root, bundle, target, min_size, seed),
        Commands::Compare { old, new } => commands::compare(cli.root, old, new),
        Commands::Status => commands::status(cli.root),
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("Strata v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
