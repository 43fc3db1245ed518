use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobpilot_core::Job;
use jobpilot_notion::{
    sync_portfolio, MemoryStore, NotionClient, NotionClientConfig, PortfolioContent,
    RemoteStore, UpsertConfig, UpsertEngine,
};
use jobpilot_storage::{encode_ndjson, write_atomic};
use serde::Serialize;
use tracing::warn;

use crate::config::{PushTarget, SyncConfig};
use crate::export::render_csv;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Destination for harvested jobs.
#[async_trait]
pub trait JobSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn push_jobs(&self, jobs: &[Job]) -> Result<PushReport>;

    /// Sinks without a summary surface ignore this.
    async fn publish_summary(&self, _content: &PortfolioContent) -> Result<()> {
        Ok(())
    }
}

pub struct NotionSink {
    store: Arc<dyn RemoteStore>,
    config: UpsertConfig,
    page_id: Option<String>,
}

impl NotionSink {
    pub fn new(store: Arc<dyn RemoteStore>, config: UpsertConfig, page_id: Option<String>) -> Self {
        Self {
            store,
            config,
            page_id,
        }
    }
}

#[async_trait]
impl JobSink for NotionSink {
    fn name(&self) -> &'static str {
        "notion"
    }

    async fn push_jobs(&self, jobs: &[Job]) -> Result<PushReport> {
        let mut engine = UpsertEngine::new(self.store.clone(), self.config);
        engine
            .ensure_schema()
            .await
            .context("preparing notion database schema")?;
        let report = engine
            .upsert_all(jobs)
            .await
            .context("upserting jobs into notion")?;
        Ok(PushReport {
            created: report.created,
            updated: report.updated,
            failed: report.failed,
        })
    }

    async fn publish_summary(&self, content: &PortfolioContent) -> Result<()> {
        let Some(page_id) = self.page_id.as_deref() else {
            return Ok(());
        };
        sync_portfolio(self.store.as_ref(), page_id, content)
            .await
            .with_context(|| format!("updating portfolio page {page_id}"))?;
        Ok(())
    }
}

/// Writes the pushed set to an outbox directory for pickup by something else.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl JobSink for FileSink {
    fn name(&self) -> &'static str {
        "files"
    }

    async fn push_jobs(&self, jobs: &[Job]) -> Result<PushReport> {
        write_atomic(&self.dir.join("jobs.ndjson"), &encode_ndjson(jobs)?).await?;
        write_atomic(&self.dir.join("jobs.csv"), &render_csv(jobs)?).await?;
        Ok(PushReport {
            created: jobs.len(),
            ..PushReport::default()
        })
    }
}

/// `None` when pushing is switched off. A dry run always pushes into an in-memory
/// Notion store so the full upsert path runs without touching anything remote.
pub fn build_sink(config: &SyncConfig, dry_run: bool) -> Result<Option<Box<dyn JobSink>>> {
    let page_id = config.notion.as_ref().and_then(|n| n.page_id.clone());
    if dry_run {
        warn!("dry run: notion writes go to an in-memory store");
        let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
        let upsert = UpsertConfig {
            write_delay: Duration::ZERO,
        };
        return Ok(Some(Box::new(NotionSink::new(store, upsert, page_id))));
    }

    match config.push_target {
        PushTarget::None => Ok(None),
        PushTarget::Files => Ok(Some(Box::new(FileSink::new(
            config.workspace_root.join("outbox"),
        )))),
        PushTarget::Notion => {
            let settings = config
                .notion
                .as_ref()
                .context("push target is notion but NOTION_TOKEN / NOTION_DATABASE_ID are unset")?;
            let mut client_config =
                NotionClientConfig::new(&settings.token, &settings.database_id);
            client_config.timeout = Duration::from_secs(config.http_timeout_secs);
            let client = NotionClient::new(client_config).context("building notion client")?;
            let store: Arc<dyn RemoteStore> = Arc::new(client);
            let upsert = UpsertConfig {
                write_delay: config.notion_write_delay,
            };
            Ok(Some(Box::new(NotionSink::new(store, upsert, page_id))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn job(id: &str) -> Job {
        let seen = Utc.with_ymd_and_hms(2026, 2, 20, 7, 0, 0).unwrap();
        Job::new(id, format!("Role {id}"), "Acme", seen)
    }

    #[tokio::test]
    async fn notion_sink_creates_then_updates_and_publishes_once() {
        let store = Arc::new(MemoryStore::new());
        let sink = NotionSink::new(
            store.clone(),
            UpsertConfig {
                write_delay: Duration::ZERO,
            },
            Some("page-root".into()),
        );
        let jobs = vec![job("a"), job("b")];

        let first = sink.push_jobs(&jobs).await.unwrap();
        assert_eq!((first.created, first.updated, first.failed), (2, 0, 0));
        let second = sink.push_jobs(&jobs).await.unwrap();
        assert_eq!((second.created, second.updated), (0, 2));
        assert_eq!(store.pages().len(), 2);

        let content = PortfolioContent {
            summary_lines: vec!["Total roles: 2".into()],
            today: jobs.iter().map(Into::into).collect(),
        };
        sink.publish_summary(&content).await.unwrap();
        sink.publish_summary(&content).await.unwrap();
        assert_eq!(store.list_children("page-root").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_sink_writes_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("outbox"));
        let report = sink.push_jobs(&[job("a")]).await.unwrap();
        assert_eq!(report.created, 1);
        assert!(dir.path().join("outbox/jobs.ndjson").exists());
        assert!(dir.path().join("outbox/jobs.csv").exists());
    }
}
