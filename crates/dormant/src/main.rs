//! Dormant - operator CLI for the stateful session cache.
//!
//! Main entry point for the `dormant` binary.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;

use dormant_config::{DormantConfig, LoadOptions, ResolvedLogging, StoreKind, StoreSection};

mod commands;

use commands::{config, simulate, store};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Dormant - stateful session cache with passivation
#[derive(Parser)]
#[command(name = "dormant")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file layered over the user and project configs
    #[arg(long, global = true, env = "DORMANT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Context store backend: memory, file or sqlite
    #[arg(long, global = true)]
    pub store: Option<StoreKind>,

    /// Store directory (file) or database file (sqlite)
    #[arg(long, global = true)]
    pub store_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive a concurrent workload through the cache
    Simulate(simulate::SimulateArgs),

    /// Inspect and purge passivated sessions
    Store(store::StoreArgs),

    /// Configuration inspection
    Config(config::ConfigArgs),
}

impl Cli {
    /// Global flags as the highest-precedence config layer.
    fn overrides(&self) -> DormantConfig {
        let store = (self.store.is_some() || self.store_path.is_some()).then(|| StoreSection {
            backend: self.store,
            path: self.store_path.clone(),
        });

        DormantConfig {
            store,
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = dormant_config::load_config_with_options(&LoadOptions {
        explicit: cli.config.clone(),
        ..Default::default()
    })
    .context("failed to load configuration")?;

    let mut layer = loaded.config;
    layer.merge(cli.overrides());
    let resolved = layer.resolve().context("invalid configuration")?;

    let _guard = init_tracing(&resolved.logging, cli.verbose)?;
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    // Create context for commands
    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        layer,
        sources: loaded.sources,
        warnings: loaded.warnings,
        config: resolved,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Simulate(args) => simulate::run(args, &ctx).await,
        Commands::Store(args) => store::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Console (human-readable, stderr) plus optional rotating JSON file.
fn init_tracing(logging: &ResolvedLogging, verbose: bool) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = format!("dormant={level},dormant_cache={level},dormant_config={level},warn");
    let console_filter =
        EnvFilter::try_new(&filter).with_context(|| format!("invalid log level '{level}'"))?;

    let (file_layer, guard) = match &logging.file {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "dormant.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(
                    "dormant=trace,dormant_cache=trace,dormant_config=trace,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
