//! Job-board adapters: each one turns a board's API payload into raw records.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use jobpilot_core::RawRecord;
use jobpilot_storage::{read_ndjson, FetchError, HttpFetcher};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod vibe;

pub const CRATE_NAME: &str = "jobpilot-adapters";

pub const REMOTIVE_ENDPOINT: &str = "https://remotive.com/api/remote-jobs";
pub const REMOTEOK_ENDPOINT: &str = "https://remoteok.com/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{source_id}: unexpected payload: {detail}")]
    Payload { source_id: String, detail: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    fn payload(source_id: &str, detail: impl Into<String>) -> Self {
        Self::Payload {
            source_id: source_id.to_string(),
            detail: detail.into(),
        }
    }
}

/// One job board. Fetch failures surface to the caller; adapters never retry on their own.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Remotive,
    Remoteok,
    Greenhouse,
    Lever,
    Ndjson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Greenhouse board token or Lever company slug.
    #[serde(default)]
    pub board: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    /// Endpoint override.
    #[serde(default)]
    pub url: Option<String>,
    /// NDJSON inbox path, relative to the workspace root.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

pub fn load_source_registry(path: impl AsRef<Path>) -> Result<SourceRegistry> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Build the adapter a registry entry describes. `None` when required settings are missing.
pub fn adapter_for_source(
    config: &SourceConfig,
    workspace_root: &Path,
) -> Option<Box<dyn SourceAdapter>> {
    let source_id = config.source_id.clone();
    match config.kind {
        SourceKind::Remotive => Some(Box::new(JsonBoardAdapter {
            source_id,
            endpoint: config.url.clone().unwrap_or_else(|| REMOTIVE_ENDPOINT.to_string()),
            company: config.company.clone(),
            format: BoardFormat::Remotive,
        })),
        SourceKind::Remoteok => Some(Box::new(JsonBoardAdapter {
            source_id,
            endpoint: config.url.clone().unwrap_or_else(|| REMOTEOK_ENDPOINT.to_string()),
            company: config.company.clone(),
            format: BoardFormat::RemoteOk,
        })),
        SourceKind::Greenhouse => {
            let board = config.board.as_deref()?;
            Some(Box::new(JsonBoardAdapter {
                source_id,
                endpoint: config.url.clone().unwrap_or_else(|| {
                    format!("https://boards-api.greenhouse.io/v1/boards/{board}/jobs?content=true")
                }),
                company: config.company.clone().or_else(|| Some(board.to_string())),
                format: BoardFormat::Greenhouse,
            }))
        }
        SourceKind::Lever => {
            let board = config.board.as_deref()?;
            Some(Box::new(JsonBoardAdapter {
                source_id,
                endpoint: config
                    .url
                    .clone()
                    .unwrap_or_else(|| format!("https://api.lever.co/v0/postings/{board}?mode=json")),
                company: config.company.clone().or_else(|| Some(board.to_string())),
                format: BoardFormat::Lever,
            }))
        }
        SourceKind::Ndjson => {
            let path = config.path.as_ref()?;
            Some(Box::new(NdjsonInboxAdapter {
                source_id,
                path: workspace_root.join(path),
            }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardFormat {
    Remotive,
    RemoteOk,
    Greenhouse,
    Lever,
}

/// Single-GET JSON board. Parsing is pure so recorded responses can be replayed in tests.
#[derive(Debug, Clone)]
pub struct JsonBoardAdapter {
    pub source_id: String,
    pub endpoint: String,
    pub company: Option<String>,
    pub format: BoardFormat,
}

impl JsonBoardAdapter {
    pub fn parse(&self, body: &JsonValue) -> Result<Vec<RawRecord>, AdapterError> {
        match self.format {
            BoardFormat::Remotive => parse_remotive(&self.source_id, body),
            BoardFormat::RemoteOk => parse_remoteok(&self.source_id, body),
            BoardFormat::Greenhouse => {
                parse_greenhouse(&self.source_id, self.company.as_deref(), body)
            }
            BoardFormat::Lever => parse_lever(&self.source_id, self.company.as_deref(), body),
        }
    }
}

#[async_trait]
impl SourceAdapter for JsonBoardAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let body = http.get_json(ctx.run_id, &self.source_id, &self.endpoint).await?;
        self.parse(&body)
    }
}

/// Locally dropped raw records, one JSON object per line. A missing file yields nothing.
#[derive(Debug, Clone)]
pub struct NdjsonInboxAdapter {
    pub source_id: String,
    pub path: PathBuf,
}

#[async_trait]
impl SourceAdapter for NdjsonInboxAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let mut records: Vec<RawRecord> = read_ndjson(&self.path).await?;
        for record in &mut records {
            record
                .entry("source")
                .or_insert_with(|| JsonValue::String(self.source_id.clone()));
        }
        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Drop a failing source's contribution and keep the rest.
    #[default]
    Isolate,
    /// Fail the whole harvest when any source fails.
    Abort,
}

#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<RawRecord>,
    pub per_source: Vec<(String, usize)>,
    pub failed_sources: Vec<String>,
}

/// Fetch every source concurrently and wait for all of them before aggregating.
pub async fn collect_all(
    adapters: &[Box<dyn SourceAdapter>],
    http: &HttpFetcher,
    ctx: &AdapterContext,
    policy: FailurePolicy,
) -> Result<Harvest, AdapterError> {
    let results = join_all(adapters.iter().map(|adapter| async move {
        (adapter.source_id().to_string(), adapter.fetch(http, ctx).await)
    }))
    .await;

    let mut harvest = Harvest::default();
    for (source_id, result) in results {
        match result {
            Ok(records) => {
                info!(run_id = %ctx.run_id, source_id = %source_id, records = records.len(), "source fetched");
                harvest.per_source.push((source_id, records.len()));
                harvest.records.extend(records);
            }
            Err(err) => match policy {
                FailurePolicy::Isolate => {
                    warn!(run_id = %ctx.run_id, source_id = %source_id, error = %err, "source failed; continuing without it");
                    harvest.failed_sources.push(source_id);
                }
                FailurePolicy::Abort => return Err(err),
            },
        }
    }
    Ok(harvest)
}

/// Visible text of an HTML document or fragment, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    visible_text(&document)
}

pub(crate) fn visible_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
                .unwrap_or(false)
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn str_field<'a>(item: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = item;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn set_str(record: &mut RawRecord, key: &str, value: impl Into<String>) {
    record.insert(key.to_string(), JsonValue::String(value.into()));
}

fn rewrite_html_description(record: &mut RawRecord, key: &str) {
    if let Some(html) = record.get(key).and_then(JsonValue::as_str) {
        let text = html_to_text(html);
        set_str(record, key, text);
    }
}

fn parse_remotive(source_id: &str, body: &JsonValue) -> Result<Vec<RawRecord>, AdapterError> {
    let jobs = body
        .get("jobs")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AdapterError::payload(source_id, "missing `jobs` array"))?;

    Ok(jobs
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|item| {
            let mut record = item.clone();
            set_str(&mut record, "source", source_id);
            record.insert("remote".into(), JsonValue::Bool(true));
            // Remotive's free-text salary ("$60k - $80k") is not numeric.
            record.remove("salary");
            rewrite_html_description(&mut record, "description");
            record
        })
        .collect())
}

fn parse_remoteok(source_id: &str, body: &JsonValue) -> Result<Vec<RawRecord>, AdapterError> {
    let items = body
        .as_array()
        .ok_or_else(|| AdapterError::payload(source_id, "expected a top-level array"))?;

    Ok(items
        .iter()
        .filter_map(JsonValue::as_object)
        // The first element is the terms-of-service notice.
        .filter(|item| item.contains_key("id") && item.contains_key("position"))
        .map(|item| {
            let mut record = item.clone();
            set_str(&mut record, "source", source_id);
            record.insert("remote".into(), JsonValue::Bool(true));

            let has_url = item
                .get("url")
                .and_then(JsonValue::as_str)
                .is_some_and(|url| !url.trim().is_empty());
            if !has_url {
                let id = match item.get("id") {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                set_str(&mut record, "url", format!("https://remoteok.com/l/{id}"));
            }

            // Zero means "not disclosed".
            let mut has_salary = false;
            for key in ["salary_min", "salary_max"] {
                match record.get(key).and_then(JsonValue::as_f64) {
                    Some(v) if v > 0.0 => has_salary = true,
                    Some(_) => {
                        record.remove(key);
                    }
                    None => {}
                }
            }
            if has_salary && !record.contains_key("currency") {
                set_str(&mut record, "currency", "USD");
            }
            rewrite_html_description(&mut record, "description");
            record
        })
        .collect())
}

fn parse_greenhouse(
    source_id: &str,
    company: Option<&str>,
    body: &JsonValue,
) -> Result<Vec<RawRecord>, AdapterError> {
    let jobs = body
        .get("jobs")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AdapterError::payload(source_id, "missing `jobs` array"))?;

    Ok(jobs
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let mut record = object.clone();
            set_str(&mut record, "source", source_id);
            if let Some(id) = object.get("id") {
                record.insert("greenhouseId".into(), id.clone());
            }
            if let Some(company) = company {
                set_str(&mut record, "company", company);
            }
            if let Some(location) = str_field(item, &["location", "name"]) {
                if location.to_ascii_lowercase().contains("remote") {
                    record.insert("remote".into(), JsonValue::Bool(true));
                }
                set_str(&mut record, "location", location);
            } else {
                record.remove("location");
            }
            let posted = str_field(item, &["first_published"]).or(str_field(item, &["updated_at"]));
            if let Some(posted) = posted {
                set_str(&mut record, "posted_at", posted);
            }
            // `content` is entity-escaped HTML: decode the entities, then strip the tags.
            if let Some(content) = str_field(item, &["content"]) {
                set_str(&mut record, "description", html_to_text(&html_to_text(content)));
            }
            Some(record)
        })
        .collect())
}

fn parse_lever(
    source_id: &str,
    company: Option<&str>,
    body: &JsonValue,
) -> Result<Vec<RawRecord>, AdapterError> {
    let postings = body
        .as_array()
        .ok_or_else(|| AdapterError::payload(source_id, "expected a top-level array"))?;

    Ok(postings
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let mut record = object.clone();
            set_str(&mut record, "source", source_id);
            if let Some(id) = object.get("id") {
                record.insert("leverId".into(), id.clone());
            }
            if let Some(company) = company {
                set_str(&mut record, "company", company);
            }
            if let Some(location) = str_field(item, &["categories", "location"]) {
                set_str(&mut record, "location", location);
            }
            match str_field(item, &["workplaceType"]) {
                Some("remote") => {
                    record.insert("remote".into(), JsonValue::Bool(true));
                }
                Some("onsite") => {
                    record.insert("remote".into(), JsonValue::Bool(false));
                }
                _ => {}
            }
            Some(record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use jobpilot_storage::HttpClientConfig;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_response(source: &str) -> JsonValue {
        let path = workspace_root()
            .join("fixtures")
            .join(source)
            .join("sample")
            .join("response.json");
        let text = fs::read_to_string(&path).expect("read fixture");
        serde_json::from_str(&text).expect("parse fixture")
    }

    fn board(format: BoardFormat, company: Option<&str>) -> JsonBoardAdapter {
        JsonBoardAdapter {
            source_id: format!("{format:?}").to_ascii_lowercase(),
            endpoint: "http://127.0.0.1:9/unused".into(),
            company: company.map(ToString::to_string),
            format,
        }
    }

    fn s<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
        record.get(key).and_then(JsonValue::as_str)
    }

    #[test]
    fn remotive_payload_maps_to_raw_records() {
        let records = board(BoardFormat::Remotive, None)
            .parse(&fixture_response("remotive"))
            .unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.get("id"), Some(&JsonValue::from(1934521)));
        assert_eq!(s(first, "company_name"), Some("Northwind Analytics"));
        assert_eq!(s(first, "source"), Some("remotive"));
        assert_eq!(first.get("remote"), Some(&JsonValue::Bool(true)));
        assert_eq!(
            s(first, "description"),
            Some("We are looking for a Python engineer to own our data platform. Build pipelines Ship fast")
        );
        assert!(!records[1].contains_key("salary"));
    }

    #[test]
    fn remoteok_skips_notice_and_incomplete_entries() {
        let records = board(BoardFormat::RemoteOk, None)
            .parse(&fixture_response("remoteok"))
            .unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(s(first, "position"), Some("Automation Engineer"));
        assert_eq!(s(first, "currency"), Some("USD"));
        assert_eq!(s(first, "description"), Some("Automate everything ."));

        let second = &records[1];
        assert_eq!(s(second, "url"), Some("https://remoteok.com/l/118002"));
        assert!(!second.contains_key("salary_min"));
        assert!(!second.contains_key("currency"));
    }

    #[test]
    fn greenhouse_flattens_location_and_unescapes_content() {
        let records = board(BoardFormat::Greenhouse, Some("Example Robotics"))
            .parse(&fixture_response("greenhouse"))
            .unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.get("greenhouseId"), Some(&JsonValue::from(4400123)));
        assert_eq!(s(first, "company"), Some("Example Robotics"));
        assert_eq!(s(first, "location"), Some("Remote - Canada"));
        assert_eq!(first.get("remote"), Some(&JsonValue::Bool(true)));
        assert_eq!(s(first, "posted_at"), Some("2026-02-19T17:45:00-05:00"));
        assert_eq!(s(first, "description"), Some("Join our fabrication team."));
        assert!(!records[1].contains_key("remote"));
    }

    #[test]
    fn lever_maps_workplace_type_and_ids() {
        let records = board(BoardFormat::Lever, Some("Globex"))
            .parse(&fixture_response("lever"))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            s(&records[0], "leverId"),
            Some("7f1c2d3e-aaaa-4bbb-8ccc-0123456789ab")
        );
        assert_eq!(s(&records[0], "location"), Some("San Francisco, CA"));
        assert_eq!(records[0].get("remote"), Some(&JsonValue::Bool(false)));
        assert_eq!(records[1].get("remote"), Some(&JsonValue::Bool(true)));
        assert_eq!(s(&records[1], "company"), Some("Globex"));
    }

    #[test]
    fn unexpected_payload_shape_is_an_error() {
        let err = board(BoardFormat::Remotive, None)
            .parse(&serde_json::json!([1, 2]))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Payload { .. }));
    }

    #[test]
    fn registry_requires_board_for_ats_sources() {
        let yaml = r#"
sources:
  - source_id: gh
    kind: greenhouse
  - source_id: lever-acme
    kind: lever
    board: acme
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).unwrap();
        let root = Path::new(".");
        assert!(adapter_for_source(&registry.sources[0], root).is_none());
        let adapter = adapter_for_source(&registry.sources[1], root).expect("lever adapter");
        assert_eq!(adapter.source_id(), "lever-acme");
        assert!(registry.sources[1].enabled);
    }

    struct StaticAdapter {
        id: &'static str,
        records: usize,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> &str {
            self.id
        }

        async fn fetch(
            &self,
            _http: &HttpFetcher,
            _ctx: &AdapterContext,
        ) -> Result<Vec<RawRecord>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::payload(self.id, "boom"));
            }
            Ok((0..self.records)
                .map(|i| {
                    let mut r = RawRecord::new();
                    r.insert("id".into(), JsonValue::from(format!("{}-{i}", self.id)));
                    r
                })
                .collect())
        }
    }

    fn adapters(calls: &Arc<AtomicUsize>) -> Vec<Box<dyn SourceAdapter>> {
        vec![
            Box::new(StaticAdapter { id: "ok-a", records: 2, fail: false, calls: calls.clone() }),
            Box::new(StaticAdapter { id: "down", records: 0, fail: true, calls: calls.clone() }),
            Box::new(StaticAdapter { id: "ok-b", records: 1, fail: false, calls: calls.clone() }),
        ]
    }

    #[tokio::test]
    async fn isolated_fan_out_keeps_healthy_sources() {
        let calls = Arc::new(AtomicUsize::new(0));
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let ctx = AdapterContext::new(Utc::now());

        let harvest = collect_all(&adapters(&calls), &http, &ctx, FailurePolicy::Isolate)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(harvest.records.len(), 3);
        assert_eq!(harvest.failed_sources, vec!["down".to_string()]);
        assert_eq!(
            harvest.per_source,
            vec![("ok-a".to_string(), 2), ("ok-b".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn abort_policy_fails_the_whole_harvest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let ctx = AdapterContext::new(Utc::now());

        let result = collect_all(&adapters(&calls), &http, &ctx, FailurePolicy::Abort).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn inbox_adapter_tags_records_with_its_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incoming.ndjson");
        fs::write(&path, "{\"id\":\"1\",\"source\":\"custom\"}\n{\"id\":\"2\"}\n").unwrap();
        let adapter = NdjsonInboxAdapter { source_id: "inbox".into(), path };
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();

        let records = adapter.fetch(&http, &AdapterContext::new(Utc::now())).await.unwrap();

        assert_eq!(s(&records[0], "source"), Some("custom"));
        assert_eq!(s(&records[1], "source"), Some("inbox"));
    }
}
