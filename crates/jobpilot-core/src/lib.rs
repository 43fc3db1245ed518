//! Canonical job model shared by every JobPilot crate.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "jobpilot-core";

/// One raw posting as reported by a board, with whatever keys the board uses.
pub type RawRecord = Map<String, JsonValue>;

/// Scraped or curated "company vibe" attached to a job. Never part of identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VibeProfile {
    pub mission: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub talking_points: Vec<String>,
}

impl VibeProfile {
    pub fn is_empty(&self) -> bool {
        self.mission.is_none()
            && self.keywords.is_empty()
            && self.links.is_empty()
            && self.talking_points.is_empty()
    }
}

/// Canonical, normalized job posting.
///
/// `external_id`, `title` and `company` are non-empty for every persisted job and
/// `first_seen <= last_seen` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub external_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub remote: Option<bool>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub vibe: Option<VibeProfile>,
}

impl Job {
    /// Minimal job with every optional field empty; harvest bookkeeping set to `seen_at`.
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            company: company.into(),
            location: None,
            remote: None,
            url: None,
            posted_at: None,
            salary_min: None,
            salary_max: None,
            currency: None,
            keywords: Vec::new(),
            source: None,
            description: None,
            first_seen: seen_at,
            last_seen: seen_at,
            vibe: None,
        }
    }

    pub fn first_seen_date(&self) -> NaiveDate {
        self.first_seen.date_naive()
    }

    /// Average of min/max when both exist, otherwise whichever one exists.
    pub fn salary_midpoint(&self) -> Option<f64> {
        match (self.salary_min, self.salary_max) {
            (Some(lo), Some(hi)) => Some((lo + hi) / 2.0),
            (Some(lo), None) => Some(lo),
            (None, Some(hi)) => Some(hi),
            (None, None) => None,
        }
    }

    /// Short title prefix for log lines.
    pub fn title_snippet(&self) -> String {
        truncate_chars(&self.title, 60)
    }
}

/// Truncate on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to a single `-`.
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Values ranked by frequency, most frequent first; ties keep first-encounter order.
pub fn most_common<I, S>(values: I, limit: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for value in values {
        let value = value.into();
        match index.get(&value) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                index.insert(value.clone(), counts.len());
                counts.push((value, 1));
            }
        }
    }
    // Stable sort preserves encounter order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(limit);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn salary_midpoint_prefers_both_bounds() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut job = Job::new("a", "Engineer", "Acme", at);
        assert_eq!(job.salary_midpoint(), None);
        job.salary_max = Some(300.0);
        assert_eq!(job.salary_midpoint(), Some(300.0));
        job.salary_min = Some(100.0);
        assert_eq!(job.salary_midpoint(), Some(200.0));
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Senior Engineer @ Acme, Inc. "), "senior-engineer-acme-inc");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn missing_enrichment_fields_deserialize_as_empty() {
        let line = r#"{"external_id":"1","title":"T","company":"C","location":null,"remote":null,"url":null,"posted_at":null,"salary_min":null,"salary_max":null,"currency":null,"source":null,"first_seen":"2026-03-01T00:00:00Z","last_seen":"2026-03-01T00:00:00Z"}"#;
        let job: Job = serde_json::from_str(line).expect("parse");
        assert!(job.keywords.is_empty());
        assert!(job.vibe.is_none());
        assert!(job.description.is_none());
    }

    #[test]
    fn most_common_breaks_ties_by_first_encounter() {
        let ranked = most_common(["b", "a", "c", "a", "b", "d"], 3);
        assert_eq!(
            ranked,
            vec![("b".to_string(), 2), ("a".to_string(), 2), ("c".to_string(), 1)]
        );
    }
}
