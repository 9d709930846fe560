//! CLI command definitions for varpipe.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::{Settings, TARGET_WORKFLOW, UPSTREAM_WORKFLOW};
use crate::dao::{MemoryStore, MetadataStore};
use crate::executor::{BatchScheduler, SpoolScheduler};
use crate::extract::{
    find_by_suffix, parse_flagstat, parse_interval_summary, parse_sample_summary, ATTR_MEAN,
    ATTR_TOTAL_COVERAGE, ATTR_TOTAL_COVERAGE_COUNT,
};
use crate::scheduler::Dispatcher;

/// Default directory the spool scheduler writes job descriptions into.
const DEFAULT_SPOOL_DIR: &str = "./spool";

/// Variant-calling pipeline orchestrator.
#[derive(Parser)]
#[command(name = "varpipe")]
#[command(about = "Builds, dispatches and post-processes variant-calling pipeline runs")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the dispatch service: poll for enqueued run attempts, build job
    /// graphs and submit them for execution.
    Serve(ServeArgs),

    /// Parse a flagstat report and print the derived attributes.
    Flagstat(FlagstatArgs),

    /// Parse depth-of-coverage reports in a directory and print the derived
    /// attributes.
    Coverage(CoverageArgs),
}

/// Arguments for `varpipe serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Poll period in minutes.
    #[arg(long)]
    pub period: Option<u64>,

    /// Worker pool core size.
    #[arg(long)]
    pub core_pool_size: Option<usize>,

    /// Worker pool maximum size.
    #[arg(long)]
    pub max_pool_size: Option<usize>,

    /// Directory job descriptions are spooled into.
    #[arg(long, default_value = DEFAULT_SPOOL_DIR)]
    pub spool_dir: PathBuf,
}

/// Arguments for `varpipe flagstat`.
#[derive(Parser, Debug)]
pub struct FlagstatArgs {
    /// Flagstat report to parse.
    pub file: PathBuf,
}

/// Arguments for `varpipe coverage`.
#[derive(Parser, Debug)]
pub struct CoverageArgs {
    /// Directory containing `*.coverage.sample_summary` and
    /// `*.coverage.sample_interval_summary`.
    pub dir: PathBuf,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and executes the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Executes an already-parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await?,
        Commands::Flagstat(args) => run_flagstat_command(args).await?,
        Commands::Coverage(args) => run_coverage_command(args).await?,
    }
    Ok(())
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let mut settings = Settings::from_env().context("invalid configuration")?;
    if let Some(period) = args.period {
        settings.period_minutes = period;
    }
    if let Some(core) = args.core_pool_size {
        settings.core_pool_size = core;
    }
    if let Some(max) = args.max_pool_size {
        settings.max_pool_size = max;
    }
    settings.validate().context("invalid configuration")?;

    let store = Arc::new(MemoryStore::new());
    store
        .register_workflow(TARGET_WORKFLOW, env!("CARGO_PKG_VERSION"))
        .await;
    store
        .register_workflow(UPSTREAM_WORKFLOW, env!("CARGO_PKG_VERSION"))
        .await;

    let scheduler = Arc::new(SpoolScheduler::new(&args.spool_dir));
    let dispatcher = Arc::new(Dispatcher::new(
        store as Arc<dyn MetadataStore>,
        scheduler as Arc<dyn BatchScheduler>,
        settings,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    handle.await.context("dispatcher task panicked")?;
    Ok(())
}

async fn run_flagstat_command(args: FlagstatArgs) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("could not read {}", args.file.display()))?;
    let attributes: BTreeMap<String, String> = parse_flagstat(&text).into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&attributes)?);
    Ok(())
}

async fn run_coverage_command(args: CoverageArgs) -> anyhow::Result<()> {
    let mut attributes = BTreeMap::new();

    if let Some(path) = find_by_suffix(&args.dir, ".coverage.sample_summary").await {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("could not read {}", path.display()))?;
        if let Some((total_coverage, mean)) = parse_sample_summary(&text) {
            attributes.insert(ATTR_TOTAL_COVERAGE.to_string(), total_coverage);
            attributes.insert(ATTR_MEAN.to_string(), mean);
        }
    }

    if let Some(path) = find_by_suffix(&args.dir, ".coverage.sample_interval_summary").await {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("could not read {}", path.display()))?;
        attributes.insert(
            ATTR_TOTAL_COVERAGE_COUNT.to_string(),
            parse_interval_summary(&text).to_string(),
        );
    }

    println!("{}", serde_json::to_string_pretty(&attributes)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::parse_from(["varpipe", "serve", "--period", "1", "--max-pool-size", "8"]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.period, Some(1));
                assert_eq!(args.max_pool_size, Some(8));
                assert_eq!(args.spool_dir, PathBuf::from(DEFAULT_SPOOL_DIR));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_cli_parses_flagstat() {
        let cli = Cli::parse_from(["varpipe", "flagstat", "/tmp/sample.flagstat"]);
        match cli.command {
            Commands::Flagstat(args) => {
                assert_eq!(args.file, PathBuf::from("/tmp/sample.flagstat"));
            }
            _ => panic!("expected flagstat"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::parse_from(["varpipe", "coverage", "/tmp", "--log-level", "debug"]);
        assert_eq!(cli.log_level, "debug");
    }
}
