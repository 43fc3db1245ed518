//! Static artifacts under `reports/<date>/`: CSV, NDJSON, dashboard, chart series and a
//! parquet snapshot with a checksum manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use jobpilot_core::{most_common, truncate_chars, Job};
use jobpilot_storage::{encode_ndjson, sha256_hex, write_atomic};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tokio::fs;

pub const CSV_HEADER: [&str; 9] = [
    "source",
    "job_id",
    "title",
    "company",
    "location",
    "url",
    "tags",
    "description",
    "posted_at",
];
pub const CSV_DESCRIPTION_CHARS: usize = 1000;
const CHART_POINTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub generated_at: DateTime<Utc>,
    pub top_companies: Vec<ChartPoint>,
    pub top_locations: Vec<ChartPoint>,
    pub sources: Vec<ChartPoint>,
    pub top_keywords: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportPaths {
    pub dir: PathBuf,
    pub csv: PathBuf,
    pub ndjson: PathBuf,
    pub dashboard: PathBuf,
    pub charts: PathBuf,
    pub parquet: PathBuf,
    pub manifest: PathBuf,
}

fn iso_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn csv_description(job: &Job) -> String {
    let flat = job
        .description
        .as_deref()
        .unwrap_or_default()
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ");
    truncate_chars(&flat, CSV_DESCRIPTION_CHARS)
}

/// CSV bytes, newest posting first; undated postings last.
pub fn render_csv(jobs: &[Job]) -> Result<Vec<u8>> {
    let mut rows: Vec<&Job> = jobs.iter().collect();
    rows.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).context("writing csv header")?;
    for job in rows {
        writer
            .write_record([
                job.source.clone().unwrap_or_default(),
                job.external_id.clone(),
                job.title.clone(),
                job.company.clone(),
                job.location.clone().unwrap_or_default(),
                job.url.clone().unwrap_or_default(),
                job.keywords.join("|"),
                csv_description(job),
                job.posted_at.map(iso_utc).unwrap_or_default(),
            ])
            .with_context(|| format!("writing csv row for {}", job.external_id))?;
    }
    writer.into_inner().context("flushing csv writer")
}

pub fn chart_series(history: &[Job], generated_at: DateTime<Utc>) -> ChartSeries {
    let points = |ranked: Vec<(String, usize)>| {
        ranked
            .into_iter()
            .map(|(label, count)| ChartPoint { label, count })
            .collect::<Vec<_>>()
    };
    ChartSeries {
        generated_at,
        top_companies: points(most_common(
            history.iter().map(|j| j.company.as_str()),
            CHART_POINTS,
        )),
        top_locations: points(most_common(
            history.iter().filter_map(|j| j.location.as_deref()),
            CHART_POINTS,
        )),
        sources: points(most_common(
            history.iter().map(|j| j.source.as_deref().unwrap_or("unknown")),
            usize::MAX,
        )),
        top_keywords: points(most_common(
            history.iter().flat_map(|j| j.keywords.iter().map(String::as_str)),
            CHART_POINTS,
        )),
    }
}

/// Write every artifact for `date`. `day_jobs` is the merged day set, `history` the full archive.
pub async fn export_reports(
    reports_root: &Path,
    date: NaiveDate,
    day_jobs: &[Job],
    history: &[Job],
    dashboard_markdown: &str,
    generated_at: DateTime<Utc>,
) -> Result<ExportPaths> {
    let dir = reports_root.join(date.to_string());
    let snapshot_dir = dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let paths = ExportPaths {
        csv: dir.join("jobs.csv"),
        ndjson: dir.join("jobs.ndjson"),
        dashboard: dir.join("dashboard.md"),
        charts: dir.join("charts.json"),
        parquet: snapshot_dir.join("jobs.parquet"),
        manifest: snapshot_dir.join("manifest.json"),
        dir,
    };

    write_atomic(&paths.csv, &render_csv(day_jobs)?).await?;
    write_atomic(&paths.ndjson, &encode_ndjson(day_jobs)?).await?;
    write_atomic(&paths.dashboard, dashboard_markdown.as_bytes()).await?;
    let charts = serde_json::to_vec_pretty(&chart_series(history, generated_at))
        .context("serializing chart series")?;
    write_atomic(&paths.charts, &charts).await?;

    write_jobs_parquet(&paths.parquet, history)?;
    let manifest = SnapshotManifest {
        schema_version: 1,
        generated_at,
        files: vec![manifest_entry("jobs", &paths.dir, &paths.parquet)?],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    write_atomic(&paths.manifest, &bytes).await?;

    Ok(paths)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn utf8<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

pub fn write_jobs_parquet(path: &Path, jobs: &[Job]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("external_id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("company", DataType::Utf8, false),
        ArrowField::new("location", DataType::Utf8, true),
        ArrowField::new("remote", DataType::Boolean, true),
        ArrowField::new("url", DataType::Utf8, true),
        ArrowField::new("posted_at", DataType::Utf8, true),
        ArrowField::new("salary_min", DataType::Float64, true),
        ArrowField::new("salary_max", DataType::Float64, true),
        ArrowField::new("currency", DataType::Utf8, true),
        ArrowField::new("keywords", DataType::Utf8, false),
        ArrowField::new("source", DataType::Utf8, true),
        ArrowField::new("first_seen", DataType::Utf8, false),
        ArrowField::new("last_seen", DataType::Utf8, false),
    ]));

    let posted: Vec<Option<String>> = jobs.iter().map(|j| j.posted_at.map(iso_utc)).collect();
    let keywords: Vec<String> = jobs.iter().map(|j| j.keywords.join("|")).collect();
    let first_seen: Vec<String> = jobs.iter().map(|j| iso_utc(j.first_seen)).collect();
    let last_seen: Vec<String> = jobs.iter().map(|j| iso_utc(j.last_seen)).collect();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            utf8(jobs.iter().map(|j| Some(j.external_id.as_str()))),
            utf8(jobs.iter().map(|j| Some(j.title.as_str()))),
            utf8(jobs.iter().map(|j| Some(j.company.as_str()))),
            utf8(jobs.iter().map(|j| j.location.as_deref())),
            Arc::new(BooleanArray::from(
                jobs.iter().map(|j| j.remote).collect::<Vec<_>>(),
            )),
            utf8(jobs.iter().map(|j| j.url.as_deref())),
            utf8(posted.iter().map(|p| p.as_deref())),
            Arc::new(Float64Array::from(
                jobs.iter().map(|j| j.salary_min).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                jobs.iter().map(|j| j.salary_max).collect::<Vec<_>>(),
            )),
            utf8(jobs.iter().map(|j| j.currency.as_deref())),
            utf8(keywords.iter().map(|k| Some(k.as_str()))),
            utf8(jobs.iter().map(|j| j.source.as_deref())),
            utf8(first_seen.iter().map(|s| Some(s.as_str()))),
            utf8(last_seen.iter().map(|s| Some(s.as_str()))),
        ],
    )
    .context("building jobs record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, base_dir: &Path, path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(base_dir).unwrap_or(path).display().to_string();
    Ok(ManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, 10, 0, 0).unwrap()
    }

    fn job(id: &str, posted: Option<u32>) -> Job {
        let mut job = Job::new(id, format!("Role {id}"), "Acme, Inc.", at(20));
        job.posted_at = posted.map(at);
        job.source = Some("remotive".into());
        job.keywords = vec!["python".into(), "ai".into()];
        job
    }

    #[test]
    fn csv_sorts_newest_first_and_flattens_descriptions() {
        let mut long = job("old", Some(18));
        long.description = Some(format!("line one\nline two\r\n{}", "x".repeat(2000)));
        let jobs = vec![job("undated", None), long, job("new", Some(19))];

        let text = String::from_utf8(render_csv(&jobs).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "source,job_id,title,company,location,url,tags,description,posted_at");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("remotive,new,Role new,\"Acme, Inc.\",,,python|ai,,2026-02-19T10:00:00Z"));
        assert!(lines[2].contains("line one line two xxx"));
        assert!(lines[3].starts_with("remotive,undated,"));
        assert!(lines[3].ends_with(','));

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows[1][7].chars().count(), CSV_DESCRIPTION_CHARS);
    }

    #[test]
    fn chart_series_counts_history() {
        let mut b = job("b", None);
        b.location = Some("Remote".into());
        b.source = None;
        let series = chart_series(&[job("a", None), b], at(20));
        assert_eq!(series.top_companies[0].count, 2);
        assert_eq!(series.top_locations.len(), 1);
        assert_eq!(series.sources.len(), 2);
        assert_eq!(series.sources[1].label, "unknown");
    }

    #[tokio::test]
    async fn export_writes_every_artifact_with_a_checksummed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![job("a", Some(19)), job("b", None)];

        let paths = export_reports(
            dir.path(),
            at(20).date_naive(),
            &jobs,
            &jobs,
            "## dashboard\n",
            at(20),
        )
        .await
        .unwrap();

        assert_eq!(paths.dir, dir.path().join("2026-02-20"));
        for path in [&paths.csv, &paths.ndjson, &paths.dashboard, &paths.charts, &paths.parquet] {
            assert!(path.exists(), "{} missing", path.display());
        }
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths.manifest).unwrap()).unwrap();
        let entry = &manifest["files"][0];
        assert_eq!(entry["path"], "snapshots/jobs.parquet");
        let parquet = std::fs::read(&paths.parquet).unwrap();
        assert_eq!(entry["sha256"], sha256_hex(&parquet));
        assert_eq!(entry["bytes"], parquet.len() as u64);

        let ndjson = std::fs::read_to_string(&paths.ndjson).unwrap();
        assert_eq!(ndjson.lines().count(), 2);
    }
}
