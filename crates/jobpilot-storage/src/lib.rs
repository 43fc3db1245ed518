//! Day-partitioned NDJSON archive + HTTP fetch utilities for JobPilot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use jobpilot_core::Job;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;
use walkdir::WalkDir;

pub const CRATE_NAME: &str = "jobpilot-storage";
pub const ARCHIVE_FILE_NAME: &str = "jobs.ndjson";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// System of record: one NDJSON file of jobs per UTC calendar day.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn relative_path_for(date: NaiveDate) -> PathBuf {
        PathBuf::from(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(ARCHIVE_FILE_NAME)
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(Self::relative_path_for(date))
    }

    /// Jobs archived for `date`; a day with no file yet is empty.
    pub async fn read_day(&self, date: NaiveDate) -> anyhow::Result<Vec<Job>> {
        read_ndjson(self.path_for(date)).await
    }

    /// Replace the day file wholesale, so re-running a day never duplicates lines.
    pub async fn write_day(&self, date: NaiveDate, jobs: &[Job]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(date);
        let bytes = encode_ndjson(jobs)?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    /// Every archived day, oldest path first.
    pub async fn read_all(&self) -> anyhow::Result<Vec<Job>> {
        fs::metadata(&self.root)
            .await
            .with_context(|| format!("reading archive root {}", self.root.display()))?;

        let mut day_files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("walking archive root {}", self.root.display()))?;
            if entry.file_type().is_file() && entry.file_name() == ARCHIVE_FILE_NAME {
                day_files.push(entry.into_path());
            }
        }

        let mut jobs = Vec::new();
        for path in day_files {
            jobs.extend(read_ndjson::<Job>(&path).await?);
        }
        Ok(jobs)
    }
}

pub fn encode_ndjson<T: Serialize>(rows: &[T]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row).context("serializing ndjson row")?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Parse NDJSON text, skipping blank lines and logging lines that do not decode.
pub fn decode_ndjson<T: DeserializeOwned>(text: &str, origin: &Path) -> Vec<T> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(row) => Some(row),
            Err(err) => {
                warn!(path = %origin.display(), line = idx + 1, error = %err, "skipping malformed ndjson line");
                None
            }
        })
        .collect()
}

pub async fn read_ndjson<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<Vec<T>> {
    let path = path.as_ref();
    if !fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(decode_ndjson(&text, path))
}

/// Write through a temp file in the target directory and rename over the destination.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn is_html(&self) -> bool {
        self.content_type.starts_with("text/html")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared GET client. Retries are the caller's policy, configured once via [`BackoffPolicy`].
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    pub async fn get_json(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<JsonValue, FetchError> {
        let response = self.fetch_bytes(run_id, source_id, url).await?;
        serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
            url: response.final_url,
            source,
        })
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        // A closed semaphore is never produced here; treat it as "no limit".
        let _permit = self.global_limit.acquire().await.ok();

        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_ascii_lowercase();
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            final_url,
                            content_type,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use jobpilot_core::VibeProfile;
    use tempfile::tempdir;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).expect("ts").with_timezone(&Utc)
    }

    fn sample_job(id: &str) -> Job {
        let mut job = Job::new(id, "Backend Engineer", "Acme", ts("2026-02-24T12:00:00Z"));
        job.location = Some("Berlin".into());
        job.remote = Some(true);
        job.url = Some(format!("https://jobs.example.com/{id}"));
        job.posted_at = Some(ts("2026-02-20T08:30:00+02:00"));
        job.salary_min = Some(90000.0);
        job.currency = Some("EUR".into());
        job.keywords = vec!["python".into(), "backend".into()];
        job.source = Some("remotive".into());
        job.last_seen = ts("2026-02-25T06:00:00Z");
        job
    }

    #[test]
    fn content_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn archive_paths_are_derived_from_the_date() {
        let store = ArchiveStore::new("/data");
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).expect("date");
        assert_eq!(
            store.path_for(date),
            PathBuf::from("/data/2026/03/07/jobs.ndjson")
        );
    }

    #[tokio::test]
    async fn archived_jobs_read_back_identically() {
        let dir = tempdir().expect("tempdir");
        let store = ArchiveStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).expect("date");
        let mut enriched = sample_job("b");
        enriched.vibe = Some(VibeProfile {
            mission: Some("Our mission is to ship.".into()),
            keywords: vec!["ship".into()],
            links: vec![],
            talking_points: vec!["Mission fit".into()],
        });
        let jobs = vec![sample_job("a"), enriched];

        store.write_day(date, &jobs).await.expect("write");
        let back = store.read_day(date).await.expect("read");

        assert_eq!(back, jobs);
        assert_eq!(
            back[0].posted_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 20, 6, 30, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn rewriting_a_day_replaces_instead_of_appending() {
        let dir = tempdir().expect("tempdir");
        let store = ArchiveStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).expect("date");
        let jobs = vec![sample_job("a"), sample_job("b")];

        store.write_day(date, &jobs).await.expect("first");
        let path = store.write_day(date, &jobs).await.expect("second");

        let text = std::fs::read_to_string(path).expect("read");
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn missing_day_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = ArchiveStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).expect("date");
        assert!(store.read_day(date).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn read_all_spans_days_and_skips_malformed_lines() {
        let dir = tempdir().expect("tempdir");
        let store = ArchiveStore::new(dir.path());
        let d1 = NaiveDate::from_ymd_opt(2026, 2, 23).expect("date");
        let d2 = NaiveDate::from_ymd_opt(2026, 2, 24).expect("date");
        store.write_day(d1, &[sample_job("a")]).await.expect("d1");
        store.write_day(d2, &[sample_job("b")]).await.expect("d2");

        let path = store.path_for(d2);
        let mut text = std::fs::read_to_string(&path).expect("read");
        text.push_str("{not json}\n\n");
        std::fs::write(&path, text).expect("write");

        let all = store.read_all().await.expect("all");
        let ids: Vec<_> = all.iter().map(|j| j.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unreadable_archive_root_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = ArchiveStore::new(dir.path().join("missing"));
        assert!(store.read_all().await.is_err());
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }
}
