use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobpilot_sync::{build_sink, maybe_build_scheduler, HarvestPipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobpilot")]
#[command(about = "Harvest job postings into a daily archive and sync them to Notion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every enabled source, archive, export and push (default).
    Harvest,
    /// Print the dashboard markdown computed from the full archive.
    Dashboard,
    /// Rewrite today's report artifacts from the archive.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Push archived jobs to the configured target.
    Push {
        /// Push into an in-memory store instead of the configured target.
        #[arg(long)]
        dry_run: bool,
        /// Push the full archive rather than today's jobs.
        #[arg(long)]
        all: bool,
    },
    /// Run harvests on the configured cron schedule until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command.unwrap_or(Commands::Harvest)).await {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Harvest => {
            let summary = jobpilot_sync::run_harvest_once_from_env().await?;
            let pushed = summary
                .pushed
                .as_ref()
                .map(|p| format!("created={} updated={} failed={}", p.created, p.updated, p.failed))
                .unwrap_or_else(|| "skipped".to_string());
            println!(
                "harvest complete: run_id={} sources={} failed_sources={} normalized={} rejected={} invalid={} added={} refreshed={} history={} push={} reports={}",
                summary.run_id,
                summary.sources,
                summary.failed_sources.len(),
                summary.normalized,
                summary.rejected,
                summary.invalid,
                summary.added,
                summary.refreshed,
                summary.history,
                pushed,
                summary.reports_dir.display()
            );
        }
        Commands::Dashboard => {
            let pipeline = HarvestPipeline::with_sink(SyncConfig::local_from_env()?, None)?;
            println!("{}", pipeline.dashboard(Utc::now()).await?);
        }
        Commands::Export { out } => {
            let pipeline = HarvestPipeline::with_sink(SyncConfig::local_from_env()?, None)?;
            let paths = pipeline.export(out.as_deref(), Utc::now()).await?;
            println!("export complete: {}", paths.dir.display());
        }
        Commands::Push { dry_run, all } => {
            let config = if dry_run {
                SyncConfig::local_from_env()?
            } else {
                SyncConfig::from_env()?
            };
            let sink = build_sink(&config, dry_run)?;
            let pipeline = HarvestPipeline::with_sink(config, sink)?;
            match pipeline.push(all, Utc::now()).await? {
                Some(report) => println!(
                    "push complete: created={} updated={} failed={}",
                    report.created, report.updated, report.failed
                ),
                None => println!("push skipped: target is none"),
            }
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env()?;
            config.scheduler_enabled = true;
            let cron = config.sync_cron.clone();
            let pipeline = Arc::new(HarvestPipeline::new(config)?);
            let mut sched = maybe_build_scheduler(pipeline)
                .await?
                .context("scheduler was not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }
    Ok(())
}
