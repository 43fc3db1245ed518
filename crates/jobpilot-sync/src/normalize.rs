//! Raw board record -> canonical [`Job`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use jobpilot_core::{Job, RawRecord};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::tagging::Tagger;

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("field {field} has non-numeric value {value}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ExternalId,
    Title,
    Company,
    Url,
    PostedAt,
    Location,
    Remote,
    SalaryMin,
    SalaryMax,
    Currency,
    Description,
    Source,
}

/// Candidate raw keys per logical field, scanned in order.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<(Field, Vec<String>)>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let table: &[(Field, &[&str])] = &[
            (Field::ExternalId, &["external_id", "id", "leverId", "greenhouseId", "url"]),
            (Field::Title, &["title", "position", "text"]),
            (Field::Company, &["company", "organization", "company_name", "companyName"]),
            (Field::Url, &["url", "applyUrl", "postingUrl", "hostedUrl", "absolute_url"]),
            (
                Field::PostedAt,
                &["posted_at", "createdAt", "datePosted", "publication_date", "date", "epoch"],
            ),
            (
                Field::Location,
                &["location", "city", "region", "candidate_required_location"],
            ),
            (Field::Remote, &["remote", "isRemote", "is_remote"]),
            (Field::SalaryMin, &["salary_min", "minSalary"]),
            (Field::SalaryMax, &["salary_max", "maxSalary"]),
            (Field::Currency, &["currency", "compCurrency", "salary_currency"]),
            (Field::Description, &["description", "body", "descriptionPlain", "content"]),
            (Field::Source, &["source", "board"]),
        ];
        Self {
            entries: table
                .iter()
                .map(|(field, keys)| (*field, keys.iter().map(|k| k.to_string()).collect()))
                .collect(),
        }
    }
}

impl AliasTable {
    /// Append lower-priority aliases for `field`.
    pub fn with_aliases<I, S>(mut self, field: Field, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let aliases: Vec<String> = aliases.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some((_, keys)) => {
                for alias in aliases {
                    if !keys.contains(&alias) {
                        keys.push(alias);
                    }
                }
            }
            None => self.entries.push((field, aliases)),
        }
        self
    }

    pub fn keys(&self, field: Field) -> &[String] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, keys)| keys.as_slice())
            .unwrap_or_default()
    }

    /// First present, non-empty value for `field`.
    pub fn resolve<'a>(&self, raw: &'a RawRecord, field: Field) -> Option<&'a JsonValue> {
        self.keys(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .find(|value| !is_empty_value(value))
    }

    /// First value for `field` that reads as non-empty text.
    pub fn resolve_text(&self, raw: &RawRecord, field: Field) -> Option<String> {
        self.keys(field)
            .iter()
            .filter_map(|key| raw.get(key))
            .find_map(as_text)
    }
}

fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Best-effort timestamp parsing; anything unrecognized is `None`.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::Number(n) => n.as_f64().and_then(from_epoch),
        JsonValue::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%m/%d/%Y",
];

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(number) = s.parse::<f64>() {
        return from_epoch(number);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(s) {
        return Some(at.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

fn parse_number(
    field: &'static str,
    value: Option<&JsonValue>,
) -> Result<Option<f64>, NormalizeError> {
    let invalid = |value: &JsonValue| NormalizeError::InvalidNumber {
        field,
        value: value.to_string(),
    };
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        JsonValue::Number(n) => Ok(n.as_f64()),
        JsonValue::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(value)),
        _ => Err(invalid(value)),
    }
}

fn parse_remote(value: Option<&JsonValue>) -> Option<bool> {
    match value? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "remote" => Some(true),
            "false" | "no" | "0" | "onsite" | "on-site" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Converts raw records using an alias table and a tagger built once per run.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: AliasTable,
    tagger: Tagger,
}

impl Normalizer {
    pub fn new(aliases: AliasTable, tagger: Tagger) -> Self {
        Self { aliases, tagger }
    }

    /// `Ok(None)` means rejected: no identifier, title or company.
    /// A non-numeric salary is an error for this record only.
    pub fn normalize(
        &self,
        raw: &RawRecord,
        harvested_at: DateTime<Utc>,
    ) -> Result<Option<Job>, NormalizeError> {
        let aliases = &self.aliases;
        let (Some(external_id), Some(title), Some(company)) = (
            aliases.resolve_text(raw, Field::ExternalId),
            aliases.resolve_text(raw, Field::Title),
            aliases.resolve_text(raw, Field::Company),
        ) else {
            return Ok(None);
        };

        let salary_min = parse_number("salary_min", aliases.resolve(raw, Field::SalaryMin))?;
        let salary_max = parse_number("salary_max", aliases.resolve(raw, Field::SalaryMax))?;

        let mut job = Job::new(external_id, title, company, harvested_at);
        job.location = aliases.resolve_text(raw, Field::Location);
        job.remote = parse_remote(aliases.resolve(raw, Field::Remote));
        job.url = aliases.resolve_text(raw, Field::Url);
        job.posted_at = aliases.resolve(raw, Field::PostedAt).and_then(parse_timestamp);
        job.salary_min = salary_min;
        job.salary_max = salary_max;
        job.currency = aliases.resolve_text(raw, Field::Currency);
        job.description = aliases.resolve_text(raw, Field::Description);
        job.source = aliases.resolve_text(raw, Field::Source);

        let haystack = [
            job.title.as_str(),
            job.company.as_str(),
            job.location.as_deref().unwrap_or_default(),
            job.description.as_deref().unwrap_or_default(),
        ]
        .join(" ");
        job.keywords = self.tagger.tag(&haystack);

        Ok(Some(job))
    }

    /// Title-ish text for log lines about a record that failed to normalize.
    pub fn describe(&self, raw: &RawRecord) -> String {
        let title = self
            .aliases
            .resolve_text(raw, Field::Title)
            .unwrap_or_else(|| "<untitled>".to_string());
        jobpilot_core::truncate_chars(&title, 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::KeywordRule;
    use serde_json::json;

    fn raw(value: JsonValue) -> RawRecord {
        value.as_object().cloned().expect("object")
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn normalizer() -> Normalizer {
        let rules = vec![
            KeywordRule { name: "python".into(), terms: vec!["python".into()] },
            KeywordRule { name: "remote-first".into(), terms: vec!["remote".into()] },
        ];
        Normalizer::new(AliasTable::default(), Tagger::new(&rules).unwrap())
    }

    #[test]
    fn rejects_records_without_identity() {
        let n = normalizer();
        let now = at(2026, 2, 20, 7, 0, 0);
        for value in [
            json!({ "id": "1", "company": "Acme" }),
            json!({ "id": "1", "title": "Engineer", "company": "   " }),
            json!({ "title": "Engineer", "company": "Acme" }),
            json!({ "external_id": null, "id": "", "title": "Engineer", "company": "Acme" }),
        ] {
            assert_eq!(n.normalize(&raw(value), now).unwrap(), None);
        }
    }

    #[test]
    fn resolves_aliases_and_converts_epoch_seconds() {
        let now = at(2026, 2, 20, 7, 0, 0);
        let job = normalizer()
            .normalize(
                &raw(json!({
                    "id": 42,
                    "position": "Python Developer",
                    "organization": "Acme",
                    "city": "Remote",
                    "isRemote": "yes",
                    "applyUrl": "https://jobs.example/42",
                    "createdAt": 1771500000,
                    "minSalary": "90,000",
                    "maxSalary": null,
                    "compCurrency": "USD",
                    "board": "inbox"
                })),
                now,
            )
            .unwrap()
            .expect("job");

        assert_eq!(job.external_id, "42");
        assert_eq!(job.title, "Python Developer");
        assert_eq!(job.location.as_deref(), Some("Remote"));
        assert_eq!(job.remote, Some(true));
        assert_eq!(job.posted_at, Some(at(2026, 2, 19, 11, 20, 0)));
        assert_eq!(job.salary_min, Some(90000.0));
        assert_eq!(job.salary_max, None);
        assert_eq!(job.source.as_deref(), Some("inbox"));
        assert_eq!(job.keywords, vec!["python", "remote-first"]);
        assert_eq!((job.first_seen, job.last_seen), (now, now));
    }

    #[test]
    fn timestamps_accept_common_shapes() {
        let cases = [
            (json!(1771502400000_i64), Some(at(2026, 2, 19, 12, 0, 0))),
            (json!("1771581600"), Some(at(2026, 2, 20, 10, 0, 0))),
            (json!("2026-02-19T17:45:00-05:00"), Some(at(2026, 2, 19, 22, 45, 0))),
            (json!("2026-02-20T10:11:12"), Some(at(2026, 2, 20, 10, 11, 12))),
            (json!("Feb 18, 2026"), Some(at(2026, 2, 18, 0, 0, 0))),
            (json!("2026-02-18"), Some(at(2026, 2, 18, 0, 0, 0))),
            (json!("next tuesday"), None),
            (json!({ "at": 1 }), None),
        ];
        for (value, expected) in cases {
            assert_eq!(parse_timestamp(&value), expected, "{value}");
        }
    }

    #[test]
    fn non_numeric_salary_fails_the_record() {
        let now = at(2026, 2, 20, 7, 0, 0);
        let err = normalizer()
            .normalize(
                &raw(json!({ "id": "4", "title": "T", "company": "C", "salary_min": "lots" })),
                now,
            )
            .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidNumber { field: "salary_min", value: "\"lots\"".into() }
        );

        let empty = normalizer()
            .normalize(
                &raw(json!({ "id": "5", "title": "T", "company": "C", "salary_min": "" })),
                now,
            )
            .unwrap()
            .expect("job");
        assert_eq!(empty.salary_min, None);
    }

    #[test]
    fn unparseable_dates_and_unknown_remote_values_become_null() {
        let now = at(2026, 2, 20, 7, 0, 0);
        let job = normalizer()
            .normalize(
                &raw(json!({
                    "id": "6", "title": "T", "company": "C",
                    "posted_at": "soon", "remote": "hybrid"
                })),
                now,
            )
            .unwrap()
            .expect("job");
        assert_eq!(job.posted_at, None);
        assert_eq!(job.remote, None);
    }

    #[test]
    fn extra_aliases_are_consulted_last() {
        let aliases = AliasTable::default().with_aliases(Field::Title, ["jobTitle"]);
        assert_eq!(aliases.keys(Field::Title).last().map(String::as_str), Some("jobTitle"));
        let n = Normalizer::new(aliases, Tagger::default());
        let job = n
            .normalize(
                &raw(json!({ "id": "7", "jobTitle": "Welder", "company": "C" })),
                at(2026, 2, 20, 7, 0, 0),
            )
            .unwrap()
            .expect("job");
        assert_eq!(job.title, "Welder");
    }
}
