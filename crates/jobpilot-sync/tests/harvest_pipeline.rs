use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use jobpilot_sync::{HarvestPipeline, SyncConfig};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

const SOURCES: &str = "\
sources:
  - source_id: inbox
    kind: ndjson
    path: inbox/incoming.ndjson
";

fn seed_root(sources_yaml: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = workspace_root();
    std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
    std::fs::copy(
        repo.join("fixtures/inbox/incoming.ndjson"),
        dir.path().join("inbox/incoming.ndjson"),
    )
    .unwrap();
    std::fs::copy(repo.join("keywords.yml"), dir.path().join("keywords.yml")).unwrap();
    std::fs::write(dir.path().join("sources.yaml"), sources_yaml).unwrap();
    dir
}

fn config_for(root: &Path) -> SyncConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("JOBPILOT_ROOT", root.display().to_string()),
        ("JOBPILOT_PUSH_TARGET", "files".to_string()),
        ("JOBPILOT_HTTP_RETRIES", "0".to_string()),
        ("JOBPILOT_HTTP_TIMEOUT_SECS", "5".to_string()),
    ]);
    SyncConfig::from_lookup(|name| vars.get(name).cloned()).expect("config")
}

fn harvest_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap()
}

#[tokio::test]
async fn inbox_harvest_archives_exports_and_pushes() {
    let root = seed_root(SOURCES);
    let pipeline = HarvestPipeline::new(config_for(root.path())).unwrap();

    let summary = pipeline.run_at(harvest_time()).await.unwrap();
    assert_eq!(summary.sources, 1);
    assert!(summary.failed_sources.is_empty());
    assert_eq!(summary.raw_records, 4);
    assert_eq!(summary.normalized, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.invalid, 1);
    assert_eq!((summary.added, summary.refreshed), (2, 0));
    assert_eq!((summary.archived, summary.history), (2, 2));
    assert_eq!(summary.pushed.as_ref().map(|p| p.created), Some(2));

    let day = root.path().join("data/2026/02/20/jobs.ndjson");
    assert_eq!(std::fs::read_to_string(&day).unwrap().lines().count(), 2);

    let reports = root.path().join("reports/2026-02-20");
    assert_eq!(summary.reports_dir, reports);
    for artifact in [
        "jobs.csv",
        "jobs.ndjson",
        "dashboard.md",
        "charts.json",
        "snapshots/jobs.parquet",
        "snapshots/manifest.json",
    ] {
        assert!(reports.join(artifact).exists(), "{artifact} missing");
    }
    assert!(root.path().join("outbox/jobs.ndjson").exists());

    let jobs = pipeline.archive().read_day(harvest_time().date_naive()).await.unwrap();
    let automation = jobs.iter().find(|j| j.external_id == "inbox-1").unwrap();
    assert!(automation.keywords.contains(&"python".to_string()));
    assert!(automation.keywords.contains(&"automation".to_string()));
    assert_eq!(automation.salary_min, Some(90000.0));
    let design = jobs.iter().find(|j| j.external_id == "inbox-2").unwrap();
    assert_eq!(design.company, "Umbrella");
    assert_eq!(design.source.as_deref(), Some("inbox"));
    assert!(design.keywords.contains(&"design".to_string()));

    let markdown = pipeline.dashboard(harvest_time()).await.unwrap();
    assert!(markdown.starts_with("## Jobs Dashboard (auto-updated)"));
}

#[tokio::test]
async fn rerunning_the_same_day_refreshes_without_duplicating() {
    let root = seed_root(SOURCES);
    let pipeline = HarvestPipeline::new(config_for(root.path())).unwrap();
    let first = harvest_time();
    let later = first + Duration::hours(3);

    pipeline.run_at(first).await.unwrap();
    let summary = pipeline.run_at(later).await.unwrap();

    assert_eq!((summary.added, summary.refreshed), (0, 2));
    assert_eq!((summary.archived, summary.history), (2, 2));

    let jobs = pipeline.archive().read_day(first.date_naive()).await.unwrap();
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job.first_seen, first);
        assert_eq!(job.last_seen, later);
    }
}

#[tokio::test]
async fn a_failing_source_is_isolated_from_the_rest() {
    let sources = format!(
        "{SOURCES}  - source_id: broken-board
    kind: greenhouse
    board: nowhere
    url: http://127.0.0.1:9/unreachable
"
    );
    let root = seed_root(&sources);
    let pipeline = HarvestPipeline::new(config_for(root.path())).unwrap();

    let summary = pipeline.run_at(harvest_time()).await.unwrap();
    assert_eq!(summary.sources, 2);
    assert_eq!(summary.failed_sources, vec!["broken-board".to_string()]);
    assert_eq!(summary.normalized, 2);
}
