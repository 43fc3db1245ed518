pub mod config;
pub mod dashboard;
pub mod enrich;
pub mod export;
pub mod merge;
pub mod normalize;
pub mod sink;
pub mod tagging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use jobpilot_adapters::vibe::{VibeDirectory, VibeScraper};
use jobpilot_adapters::{adapter_for_source, collect_all, load_source_registry, AdapterContext};
use jobpilot_core::Job;
use jobpilot_notion::{PortfolioContent, PortfolioJob};
use jobpilot_storage::{ArchiveStore, HttpFetcher};
use serde::Serialize;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use config::{ConfigError, DashboardLinks, NotionSettings, PushTarget, SyncConfig};
pub use dashboard::{compute_dashboard, render_dashboard_markdown, summary_lines, DashboardStats};
pub use enrich::{EnrichReport, VibeEnricher};
pub use export::{export_reports, ExportPaths};
pub use merge::{merge, merge_with_stats, MergeStats};
pub use normalize::{AliasTable, NormalizeError, Normalizer};
pub use sink::{build_sink, FileSink, JobSink, NotionSink, PushReport};
pub use tagging::{load_rules, tag, KeywordRule, Tagger};

pub const CRATE_NAME: &str = "jobpilot-sync";

#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub run_id: Uuid,
    pub harvested_at: DateTime<Utc>,
    pub sources: usize,
    pub failed_sources: Vec<String>,
    pub raw_records: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub invalid: usize,
    pub added: usize,
    pub refreshed: usize,
    pub enriched: EnrichReport,
    pub archived: usize,
    pub history: usize,
    pub reports_dir: PathBuf,
    pub pushed: Option<PushReport>,
}

pub struct HarvestPipeline {
    config: SyncConfig,
    archive: ArchiveStore,
    http: HttpFetcher,
    sink: Option<Box<dyn JobSink>>,
}

impl HarvestPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let sink = build_sink(&config, false)?;
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: SyncConfig, sink: Option<Box<dyn JobSink>>) -> Result<Self> {
        let archive = ArchiveStore::new(config.archive_dir.clone());
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self {
            config,
            archive,
            http,
            sink,
        })
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub async fn run_once(&self) -> Result<HarvestSummary> {
        self.run_at(Utc::now()).await
    }

    /// One harvest with `now` as the harvest time: fetch, normalize, merge into the day
    /// file, enrich, archive, export, then push.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<HarvestSummary> {
        let ctx = AdapterContext::new(now);
        let run_id = ctx.run_id;
        info!(%run_id, "harvest started");

        let registry = load_source_registry(self.config.sources_path())?;
        let mut adapters = Vec::new();
        for source in registry.sources.iter().filter(|s| s.enabled) {
            match adapter_for_source(source, &self.config.workspace_root) {
                Some(adapter) => adapters.push(adapter),
                None => warn!(source_id = %source.source_id, "source is missing required settings; skipped"),
            }
        }

        let harvest = collect_all(&adapters, &self.http, &ctx, self.config.failure_policy)
            .await
            .context("collecting sources")?;

        let normalizer = self.normalizer()?;
        let mut incoming = Vec::with_capacity(harvest.records.len());
        let (mut rejected, mut invalid) = (0usize, 0usize);
        for raw in &harvest.records {
            match normalizer.normalize(raw, now) {
                Ok(Some(job)) => incoming.push(job),
                Ok(None) => {
                    rejected += 1;
                    warn!(%run_id, title = %normalizer.describe(raw), "record lacks id, title or company; skipped");
                }
                Err(err) => {
                    invalid += 1;
                    warn!(%run_id, title = %normalizer.describe(raw), error = %err, "record failed to normalize; skipped");
                }
            }
        }

        let today = now.date_naive();
        let existing = self.archive.read_day(today).await?;
        let (mut merged, merge_stats) = merge_with_stats(&existing, &incoming, now);

        let enricher = VibeEnricher::new(
            VibeDirectory::load(self.config.vibes_path())?,
            self.config.vibe_scrape_limit,
        );
        let scraper = VibeScraper::new(&self.http, run_id);
        let enriched = enricher.enrich(&mut merged, Some(&scraper)).await;

        self.archive.write_day(today, &merged).await?;
        let history = self
            .archive
            .read_all()
            .await
            .context("reading archive history")?;

        let stats = compute_dashboard(&history, now);
        let markdown = render_dashboard_markdown(&stats, &self.config.links);
        let exports = export_reports(
            &self.config.reports_dir(),
            today,
            &merged,
            &history,
            &markdown,
            now,
        )
        .await?;

        let pushed = self
            .push_to_sink(&merged, &portfolio_content(&stats, &merged, today))
            .await?;

        let summary = HarvestSummary {
            run_id,
            harvested_at: now,
            sources: adapters.len(),
            failed_sources: harvest.failed_sources,
            raw_records: harvest.records.len(),
            normalized: incoming.len(),
            rejected,
            invalid,
            added: merge_stats.added,
            refreshed: merge_stats.refreshed,
            enriched,
            archived: merged.len(),
            history: history.len(),
            reports_dir: exports.dir,
            pushed,
        };
        info!(
            %run_id,
            normalized = summary.normalized,
            added = summary.added,
            refreshed = summary.refreshed,
            history = summary.history,
            "harvest finished"
        );
        Ok(summary)
    }

    /// Markdown summary over the full archive.
    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<String> {
        let history = self.archive.read_all().await?;
        let stats = compute_dashboard(&history, now);
        Ok(render_dashboard_markdown(&stats, &self.config.links))
    }

    /// Re-export the archived day set for `now` without harvesting.
    pub async fn export(&self, out: Option<&Path>, now: DateTime<Utc>) -> Result<ExportPaths> {
        let today = now.date_naive();
        let day = self.archive.read_day(today).await?;
        let history = self.archive.read_all().await?;
        let stats = compute_dashboard(&history, now);
        let markdown = render_dashboard_markdown(&stats, &self.config.links);
        let root = out
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.reports_dir());
        export_reports(&root, today, &day, &history, &markdown, now).await
    }

    /// Push today's archived jobs, or the whole archive with `all`.
    pub async fn push(&self, all: bool, now: DateTime<Utc>) -> Result<Option<PushReport>> {
        let today = now.date_naive();
        let day = self.archive.read_day(today).await?;
        let history = self.archive.read_all().await?;
        let stats = compute_dashboard(&history, now);
        let jobs = if all { &history } else { &day };
        self.push_to_sink(jobs, &portfolio_content(&stats, &day, today))
            .await
    }

    async fn push_to_sink(
        &self,
        jobs: &[Job],
        content: &PortfolioContent,
    ) -> Result<Option<PushReport>> {
        let Some(sink) = &self.sink else {
            info!("push target is none; nothing pushed");
            return Ok(None);
        };
        let report = sink
            .push_jobs(jobs)
            .await
            .with_context(|| format!("pushing to {}", sink.name()))?;
        info!(
            sink = sink.name(),
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "push finished"
        );
        if let Err(err) = sink.publish_summary(content).await {
            warn!(sink = sink.name(), error = %format!("{err:#}"), "summary publish failed");
        }
        Ok(Some(report))
    }

    fn normalizer(&self) -> Result<Normalizer> {
        let rules = load_rules(self.config.keywords_path())?;
        Ok(Normalizer::new(AliasTable::default(), Tagger::new(&rules)?))
    }
}

/// Dashboard summary plus the jobs first seen on `today`.
pub fn portfolio_content(stats: &DashboardStats, day_jobs: &[Job], today: NaiveDate) -> PortfolioContent {
    PortfolioContent {
        summary_lines: summary_lines(stats),
        today: day_jobs
            .iter()
            .filter(|job| job.first_seen_date() == today)
            .map(PortfolioJob::from)
            .collect(),
    }
}

/// A scheduler with one harvest job on `sync_cron`, or `None` when scheduling is off.
pub async fn maybe_build_scheduler(pipeline: Arc<HarvestPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = CronJob::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(summary) => info!(run_id = %summary.run_id, added = summary.added, "scheduled harvest finished"),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled harvest failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub async fn run_harvest_once_from_env() -> Result<HarvestSummary> {
    let config = SyncConfig::from_env()?;
    HarvestPipeline::new(config)?.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn portfolio_lists_only_jobs_first_seen_today() {
        let today = Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2026, 2, 19, 9, 0, 0).unwrap();
        let mut carried = Job::new("old", "Carried Over", "Acme", yesterday);
        carried.last_seen = today;
        let jobs = vec![carried, Job::new("new", "Fresh", "Acme", today)];

        let stats = compute_dashboard(&jobs, today);
        let content = portfolio_content(&stats, &jobs, today.date_naive());

        assert_eq!(content.today.len(), 1);
        assert_eq!(content.today[0].title, "Fresh");
        assert!(!content.summary_lines.is_empty());
    }
}
