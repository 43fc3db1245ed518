//! Remote job database sync: a store abstraction, the Notion REST client, an in-memory
//! store, the idempotent upsert engine and the portfolio summary block.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobpilot_core::Job;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};

mod client;
mod memory;
pub mod schema;

pub use client::{NotionClient, NotionClientConfig, NOTION_API_BASE, NOTION_VERSION};
pub use memory::{MemoryPage, MemoryStore};
pub use schema::{
    job_properties, upsert_key, Properties, PropertyKind, PropertySpec, KEY_PROPERTY, SCHEMA,
};

pub const CRATE_NAME: &str = "jobpilot-notion";

/// Text that marks blocks owned by the portfolio sync.
pub const SENTINEL: &str = "Jobs Dashboard (auto-updated)";
pub const MAX_PORTFOLIO_JOBS: usize = 50;

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("notion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notion api error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected notion response: {0}")]
    Unexpected(String),
    #[error("remote store rejected the write: {0}")]
    Rejected(String),
}

/// A top-level child block of a page, reduced to what the portfolio sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub block_type: String,
    pub plain_text: String,
}

impl Block {
    /// Reads `{id, type, <type>: {rich_text: [...]}}` as returned by the blocks API.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let block_type = value.get("type")?.as_str()?.to_string();
        let plain_text = value
            .get(&block_type)
            .and_then(|body| body.get("rich_text"))
            .and_then(JsonValue::as_array)
            .map(|items| schema::rich_text_plain(items))
            .unwrap_or_default();
        Some(Self {
            id,
            block_type,
            plain_text,
        })
    }
}

/// Operations the upsert engine and portfolio sync need from a remote document database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Property name to type name (`title`, `rich_text`, ...).
    async fn database_properties(&self) -> Result<BTreeMap<String, String>, NotionError>;

    async fn add_properties(&self, additions: &[PropertySpec]) -> Result<(), NotionError>;

    async fn find_page_by_key(
        &self,
        key_property: &str,
        key: &str,
    ) -> Result<Option<String>, NotionError>;

    /// Returns the new page id.
    async fn create_page(&self, properties: &Properties) -> Result<String, NotionError>;

    async fn update_page(&self, page_id: &str, properties: &Properties)
        -> Result<(), NotionError>;

    async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError>;

    async fn delete_block(&self, block_id: &str) -> Result<(), NotionError>;

    async fn append_children(
        &self,
        block_id: &str,
        children: &[JsonValue],
    ) -> Result<(), NotionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub added: Vec<String>,
    /// Properties present under the expected name with a different type; left alone.
    pub mismatched: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertConfig {
    /// Pause between successive key lookups and writes.
    pub write_delay: Duration,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            write_delay: Duration::from_millis(350),
        }
    }
}

/// Update-or-create by upsert key, one write at a time.
pub struct UpsertEngine {
    store: Arc<dyn RemoteStore>,
    config: UpsertConfig,
    title_property: String,
    schema_ready: bool,
    /// Keys written during this run, so lagging remote queries cannot cause duplicates.
    known_pages: HashMap<String, String>,
    requests: usize,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn RemoteStore>, config: UpsertConfig) -> Self {
        Self {
            store,
            config,
            title_property: schema::TITLE_PROPERTY.to_string(),
            schema_ready: false,
            known_pages: HashMap::new(),
            requests: 0,
        }
    }

    /// Add every missing schema property. Never removes, renames or retypes.
    pub async fn ensure_schema(&mut self) -> Result<SchemaReport, NotionError> {
        let existing = self.store.database_properties().await?;
        let mut report = SchemaReport::default();

        // A database has exactly one title property; reuse it whatever it is called.
        if let Some((name, _)) = existing.iter().find(|(_, kind)| kind.as_str() == "title") {
            self.title_property = name.clone();
        }

        let mut additions = Vec::new();
        for spec in SCHEMA {
            if spec.kind == PropertyKind::Title {
                if !existing.values().any(|kind| kind == "title") {
                    additions.push(*spec);
                }
                continue;
            }
            match existing.get(spec.name) {
                None => additions.push(*spec),
                Some(kind) if kind != spec.kind.as_str() => {
                    warn!(property = spec.name, expected = spec.kind.as_str(), actual = %kind, "schema property has unexpected type; leaving it");
                    report.mismatched.push(spec.name.to_string());
                }
                Some(_) => {}
            }
        }

        if !additions.is_empty() {
            self.store.add_properties(&additions).await?;
            report.added = additions.iter().map(|s| s.name.to_string()).collect();
            info!(added = ?report.added, "added missing database properties");
        }
        self.schema_ready = true;
        Ok(report)
    }

    pub async fn upsert(&mut self, job: &Job) -> Result<UpsertOutcome, NotionError> {
        if !self.schema_ready {
            self.ensure_schema().await?;
        }
        let key = upsert_key(job);

        let existing = match self.known_pages.get(&key) {
            Some(page_id) => Some(page_id.clone()),
            None => {
                self.pace().await;
                self.store.find_page_by_key(KEY_PROPERTY, &key).await?
            }
        };

        self.pace().await;
        match existing {
            Some(page_id) => {
                let props = job_properties(job, &self.title_property, false);
                self.store.update_page(&page_id, &props).await?;
                debug!(key = %key, page_id = %page_id, "updated page");
                self.known_pages.insert(key, page_id);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let props = job_properties(job, &self.title_property, true);
                let page_id = self.store.create_page(&props).await?;
                debug!(key = %key, page_id = %page_id, "created page");
                self.known_pages.insert(key, page_id);
                Ok(UpsertOutcome::Created)
            }
        }
    }

    /// Upsert every job. A schema failure aborts; a failing record is logged and skipped.
    pub async fn upsert_all(&mut self, jobs: &[Job]) -> Result<UpsertReport, NotionError> {
        if !self.schema_ready {
            self.ensure_schema().await?;
        }
        let mut report = UpsertReport::default();
        for job in jobs {
            match self.upsert(job).await {
                Ok(UpsertOutcome::Created) => report.created += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(external_id = %job.external_id, title = %job.title_snippet(), error = %err, "upsert failed; continuing");
                }
            }
        }
        info!(
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "remote upsert finished"
        );
        Ok(report)
    }

    async fn pace(&mut self) {
        if self.requests > 0 && !self.config.write_delay.is_zero() {
            tokio::time::sleep(self.config.write_delay).await;
        }
        self.requests += 1;
    }
}

/// One row in the portfolio's "today" list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioJob {
    pub title: String,
    pub company: String,
    pub remote: Option<bool>,
    pub posted: Option<String>,
    pub url: Option<String>,
}

impl From<&Job> for PortfolioJob {
    fn from(job: &Job) -> Self {
        Self {
            title: job.title.clone(),
            company: job.company.clone(),
            remote: job.remote,
            posted: job.posted_at.map(|at| at.date_naive().to_string()),
            url: job.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioContent {
    pub summary_lines: Vec<String>,
    pub today: Vec<PortfolioJob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortfolioReport {
    pub removed: usize,
    pub appended: usize,
}

fn text_block(block_type: &str, content: &str) -> JsonValue {
    json!({
        "object": "block",
        "type": block_type,
        block_type: { "rich_text": [schema_text(content, None)] }
    })
}

fn schema_text(content: &str, link: Option<&str>) -> JsonValue {
    let content = jobpilot_core::truncate_chars(content, schema::MAX_TEXT_CHARS);
    match link {
        Some(url) => json!({ "type": "text", "text": { "content": content, "link": { "url": url } } }),
        None => json!({ "type": "text", "text": { "content": content } }),
    }
}

fn job_bullet(job: &PortfolioJob) -> JsonValue {
    let title = match job.title.trim() {
        "" => "Untitled",
        t => t,
    };
    let mut pieces = vec![title.to_string()];
    if !job.company.trim().is_empty() {
        pieces.push(format!("at {}", job.company.trim()));
    }
    match job.remote {
        Some(true) => pieces.push("(Remote)".into()),
        Some(false) => pieces.push("(On-site)".into()),
        None => {}
    }
    if let Some(posted) = &job.posted {
        pieces.push(format!("posted {posted}"));
    }
    let mut rich = vec![schema_text(&pieces.join(" "), None)];
    if let Some(url) = job.url.as_deref().filter(|u| !u.is_empty()) {
        rich.push(schema_text("  [Open]", Some(url)));
    }
    json!({
        "object": "block",
        "type": "bulleted_list_item",
        "bulleted_list_item": { "rich_text": rich }
    })
}

/// The single callout that carries the whole summary; everything else nests under it.
pub fn portfolio_block(content: &PortfolioContent) -> JsonValue {
    let mut children: Vec<JsonValue> = content
        .summary_lines
        .iter()
        .map(|line| text_block("paragraph", line))
        .collect();
    children.push(text_block(
        "heading_3",
        &format!("Today's Jobs ({})", content.today.len()),
    ));
    children.extend(content.today.iter().take(MAX_PORTFOLIO_JOBS).map(job_bullet));

    json!({
        "object": "block",
        "type": "callout",
        "callout": {
            "icon": { "type": "emoji", "emoji": "\u{1F4CA}" },
            "rich_text": [schema_text(SENTINEL, None)],
            "color": "default",
            "children": children
        }
    })
}

/// Replace the sentinel-marked block(s) on `page_id` with a freshly rendered one.
pub async fn sync_portfolio(
    store: &dyn RemoteStore,
    page_id: &str,
    content: &PortfolioContent,
) -> Result<PortfolioReport, NotionError> {
    let mut report = PortfolioReport::default();
    for block in store.list_children(page_id).await? {
        if block.plain_text.contains(SENTINEL) {
            store.delete_block(&block.id).await?;
            report.removed += 1;
        }
    }
    store
        .append_children(page_id, &[portfolio_block(content)])
        .await?;
    report.appended = 1;
    info!(page_id, removed = report.removed, today = content.today.len(), "portfolio block replaced");
    Ok(report)
}
