//! Environment-driven run configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jobpilot_adapters::FailurePolicy;
use jobpilot_storage::{BackoffPolicy, HttpClientConfig};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget {
    Notion,
    Files,
    None,
}

impl FromStr for PushTarget {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notion" => Ok(Self::Notion),
            "files" => Ok(Self::Files),
            "none" | "off" => Ok(Self::None),
            _ => Err(ConfigError::InvalidValue {
                name: "JOBPILOT_PUSH_TARGET",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionSettings {
    pub token: String,
    pub database_id: String,
    pub page_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardLinks {
    pub today: String,
    pub all: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub archive_dir: PathBuf,
    pub push_target: PushTarget,
    pub notion: Option<NotionSettings>,
    pub links: DashboardLinks,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_retries: usize,
    pub notion_write_delay: Duration,
    pub failure_policy: FailurePolicy,
    pub vibe_scrape_limit: usize,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Config for commands that never push: the target is forced to `none`, so
    /// Notion credentials are optional.
    pub fn local_from_env() -> Result<Self, ConfigError> {
        Self::local_from_lookup(|name| std::env::var(name).ok())
    }

    pub fn local_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| match name {
            "JOBPILOT_PUSH_TARGET" => Some("none".to_string()),
            _ => lookup(name),
        })
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let workspace_root = var("JOBPILOT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let archive_dir = var("JOBPILOT_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("data"));
        let push_target = match var("JOBPILOT_PUSH_TARGET") {
            Some(value) => value.parse()?,
            None => PushTarget::Notion,
        };

        let notion = match (var("NOTION_TOKEN"), var("NOTION_DATABASE_ID")) {
            (Some(token), Some(database_id)) => Some(NotionSettings {
                token,
                database_id,
                page_id: var("NOTION_PAGE_ID"),
            }),
            (None, _) if push_target == PushTarget::Notion => {
                return Err(ConfigError::MissingVar("NOTION_TOKEN"))
            }
            (_, None) if push_target == PushTarget::Notion => {
                return Err(ConfigError::MissingVar("NOTION_DATABASE_ID"))
            }
            _ => None,
        };

        let isolate = parse_or("JOBPILOT_ISOLATE_SOURCE_FAILURES", var("JOBPILOT_ISOLATE_SOURCE_FAILURES"), parse_bool, true)?;

        Ok(Self {
            workspace_root,
            archive_dir,
            push_target,
            notion,
            links: DashboardLinks {
                today: var("NOTION_TODAY_LINK").unwrap_or_default(),
                all: var("NOTION_DB_LINK").unwrap_or_default(),
            },
            user_agent: var("JOBPILOT_USER_AGENT")
                .unwrap_or_else(|| format!("jobpilot/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: parse_or("JOBPILOT_HTTP_TIMEOUT_SECS", var("JOBPILOT_HTTP_TIMEOUT_SECS"), parse_num, 30)?,
            http_retries: parse_or("JOBPILOT_HTTP_RETRIES", var("JOBPILOT_HTTP_RETRIES"), parse_num, 2)?,
            notion_write_delay: Duration::from_millis(parse_or(
                "JOBPILOT_NOTION_WRITE_DELAY_MS",
                var("JOBPILOT_NOTION_WRITE_DELAY_MS"),
                parse_num,
                350,
            )?),
            failure_policy: if isolate {
                FailurePolicy::Isolate
            } else {
                FailurePolicy::Abort
            },
            vibe_scrape_limit: parse_or("JOBPILOT_VIBE_SCRAPE_LIMIT", var("JOBPILOT_VIBE_SCRAPE_LIMIT"), parse_num, 0)?,
            scheduler_enabled: parse_or("JOBPILOT_SCHEDULER_ENABLED", var("JOBPILOT_SCHEDULER_ENABLED"), parse_bool, false)?,
            sync_cron: var("JOBPILOT_SYNC_CRON").unwrap_or_else(|| "0 0 7 * * *".to_string()),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_retries,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn keywords_path(&self) -> PathBuf {
        self.workspace_root.join("keywords.yml")
    }

    pub fn vibes_path(&self) -> PathBuf {
        self.workspace_root
            .join("data")
            .join("enrichment")
            .join("company_vibes.yaml")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn parse_or<T>(
    name: &'static str,
    value: Option<String>,
    parse: impl Fn(&str) -> Option<T>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => parse(&value).ok_or(ConfigError::InvalidValue { name, value }),
    }
}
