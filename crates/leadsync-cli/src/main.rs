use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadsync_sync::{pipeline_from_env, SyncPipeline};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadsync")]
#[command(about = "Reconcile intake channel leads into the canonical lead store")]
struct Cli {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass and write its reports
    Sync,
    /// Run passes on SYNC_CRON until interrupted
    Schedule,
    /// Apply lead store migrations
    Migrate,
    /// Classify stored leads still marked unclassified
    Classify {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Summarize recent runs from the reports directory
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

fn shutdown_on_ctrl_c(pipeline: Arc<SyncPipeline>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current row and stopping");
            pipeline.request_shutdown();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = Arc::new(pipeline_from_env().await?);
            shutdown_on_ctrl_c(Arc::clone(&pipeline));
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} sources={} inserted={} already_present={} pending={} reports={}",
                summary.run_id,
                summary.enabled_sources,
                summary.counts.inserted,
                summary.counts.already_present,
                summary.counts.pending(),
                summary.reports_dir
            );
        }
        Commands::Schedule => {
            let pipeline = Arc::new(pipeline_from_env().await?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!("scheduler disabled; set LEADSYNC_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().sync_cron, "scheduler running");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
            pipeline.request_shutdown();
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            leadsync_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Classify { limit } => {
            let pipeline = pipeline_from_env().await?;
            let report = pipeline.engine().enrich_unclassified(limit).await?;
            println!(
                "classification complete: candidates={} classified={} failed={}",
                report.candidates, report.classified, report.failed
            );
        }
        Commands::Report { runs, workspace } => {
            let workspace = workspace.or_else(|| std::env::var("LEADSYNC_WORKSPACE").ok().map(PathBuf::from));
            println!("{}", leadsync_sync::report_markdown(runs, workspace)?);
        }
    }

    Ok(())
}
