//! Remote database schema and the Job -> property-value mapping.

use jobpilot_core::{slugify, truncate_chars, Job};
use jobpilot_storage::sha256_hex;
use serde_json::{json, Map, Value as JsonValue};

/// Property values keyed by property name, in Notion's JSON shape.
pub type Properties = Map<String, JsonValue>;

/// Notion caps a single rich-text item at 2000 characters.
pub const MAX_TEXT_CHARS: usize = 2000;
pub const KEY_PROPERTY: &str = "External ID";
pub const TITLE_PROPERTY: &str = "Title";
pub const INITIAL_STATUS: &str = "New";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Title,
    RichText,
    Checkbox,
    Url,
    Date,
    Number,
    Select,
    MultiSelect,
}

impl PropertyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::RichText => "rich_text",
            Self::Checkbox => "checkbox",
            Self::Url => "url",
            Self::Date => "date",
            Self::Number => "number",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
        }
    }

    /// Body used when adding a property of this kind to a database.
    pub fn definition(self) -> JsonValue {
        match self {
            Self::Number => json!({ "number": { "format": "number" } }),
            other => {
                let mut definition = Map::new();
                definition.insert(other.as_str().to_string(), json!({}));
                JsonValue::Object(definition)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
}

const fn spec(name: &'static str, kind: PropertyKind) -> PropertySpec {
    PropertySpec { name, kind }
}

pub const SCHEMA: &[PropertySpec] = &[
    spec(TITLE_PROPERTY, PropertyKind::Title),
    spec(KEY_PROPERTY, PropertyKind::RichText),
    spec("Company", PropertyKind::RichText),
    spec("Location", PropertyKind::RichText),
    spec("Remote", PropertyKind::Checkbox),
    spec("URL", PropertyKind::Url),
    spec("Posted", PropertyKind::Date),
    spec("Salary Min", PropertyKind::Number),
    spec("Salary Max", PropertyKind::Number),
    spec("Currency", PropertyKind::Select),
    spec("Keywords", PropertyKind::MultiSelect),
    spec("Source", PropertyKind::Select),
    spec("First Seen", PropertyKind::Date),
    spec("Last Seen", PropertyKind::Date),
    spec("Mission", PropertyKind::RichText),
    spec("Vibe", PropertyKind::MultiSelect),
    spec("BrandLinks", PropertyKind::RichText),
    spec("TalkingPoints", PropertyKind::RichText),
    spec("Status", PropertyKind::Select),
    spec("Stage", PropertyKind::Select),
    spec("Priority", PropertyKind::Select),
    spec("Score", PropertyKind::Number),
];

/// Written on create only; humans own them afterwards.
pub const CREATION_ONLY: &[&str] = &["First Seen", "Status", "Stage", "Priority", "Score"];

/// Stable key for the remote record: the external id, else the URL, else a slug of
/// title, company, posted date and location.
pub fn upsert_key(job: &Job) -> String {
    fit_key(raw_key(job))
}

fn raw_key(job: &Job) -> String {
    let id = job.external_id.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    if let Some(url) = job.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    let posted = job
        .posted_at
        .map(|at| at.date_naive().to_string())
        .unwrap_or_default();
    let seed = format!(
        "{} {} {} {}",
        job.title,
        job.company,
        posted,
        job.location.as_deref().unwrap_or_default()
    );
    truncate_chars(&slugify(&seed), 200)
}

/// The stored key is a text value, so it must survive truncation unchanged.
fn fit_key(key: String) -> String {
    if key.chars().count() <= MAX_TEXT_CHARS {
        key
    } else {
        format!("sha256:{}", sha256_hex(key.as_bytes()))
    }
}

fn text_item(content: &str) -> JsonValue {
    json!({ "type": "text", "text": { "content": truncate_chars(content, MAX_TEXT_CHARS) } })
}

pub fn rich_text(content: &str) -> JsonValue {
    if content.is_empty() {
        json!({ "rich_text": [] })
    } else {
        json!({ "rich_text": [text_item(content)] })
    }
}

fn title(content: &str) -> JsonValue {
    json!({ "title": [text_item(content)] })
}

/// Select option names may not contain commas.
fn option_name(name: &str) -> String {
    truncate_chars(&name.replace(',', " "), 100).trim().to_string()
}

fn select(value: Option<&str>) -> JsonValue {
    match value.map(option_name).filter(|v| !v.is_empty()) {
        Some(name) => json!({ "select": { "name": name } }),
        None => json!({ "select": null }),
    }
}

fn multi_select(values: &[String]) -> JsonValue {
    let mut names: Vec<String> = Vec::new();
    for name in values.iter().map(|v| option_name(v)) {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    let options: Vec<JsonValue> = names.into_iter().map(|name| json!({ "name": name })).collect();
    json!({ "multi_select": options })
}

fn date(value: Option<String>) -> JsonValue {
    match value {
        Some(start) => json!({ "date": { "start": start } }),
        None => json!({ "date": null }),
    }
}

/// Full property set for `job`. With `creating`, creation-only fields are included.
pub fn job_properties(job: &Job, title_property: &str, creating: bool) -> Properties {
    let mut props = Properties::new();
    props.insert(title_property.to_string(), title(&job.title));
    props.insert(KEY_PROPERTY.into(), rich_text(&upsert_key(job)));
    props.insert("Company".into(), rich_text(&job.company));
    props.insert(
        "Location".into(),
        rich_text(job.location.as_deref().unwrap_or_default()),
    );
    props.insert(
        "Remote".into(),
        json!({ "checkbox": job.remote.unwrap_or(false) }),
    );
    props.insert("URL".into(), json!({ "url": job.url }));
    props.insert("Posted".into(), date(job.posted_at.map(|at| at.to_rfc3339())));
    props.insert("Salary Min".into(), json!({ "number": job.salary_min }));
    props.insert("Salary Max".into(), json!({ "number": job.salary_max }));
    props.insert("Currency".into(), select(job.currency.as_deref()));
    props.insert("Keywords".into(), multi_select(&job.keywords));
    props.insert("Source".into(), select(job.source.as_deref()));
    props.insert("Last Seen".into(), date(Some(job.last_seen.to_rfc3339())));

    if let Some(vibe) = job.vibe.as_ref().filter(|v| !v.is_empty()) {
        if let Some(mission) = vibe.mission.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            props.insert("Mission".into(), rich_text(mission));
        }
        if !vibe.keywords.is_empty() {
            props.insert("Vibe".into(), multi_select(&vibe.keywords));
        }
        let links: Vec<JsonValue> = vibe
            .links
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| json!({ "type": "text", "text": { "content": l, "link": { "url": l } } }))
            .collect();
        if !links.is_empty() {
            props.insert("BrandLinks".into(), json!({ "rich_text": links }));
        }
        let points: Vec<&str> = vibe
            .talking_points
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if !points.is_empty() {
            props.insert("TalkingPoints".into(), rich_text(&points.join(", ")));
        }
    }

    if creating {
        props.insert("First Seen".into(), date(Some(job.first_seen.to_rfc3339())));
        props.insert("Status".into(), select(Some(INITIAL_STATUS)));
    }
    props
}

/// Concatenated plain text of a rich-text or title property value.
pub fn property_text(value: &JsonValue) -> String {
    let items = value
        .get("rich_text")
        .or_else(|| value.get("title"))
        .and_then(JsonValue::as_array);
    items.map(|items| rich_text_plain(items)).unwrap_or_default()
}

/// Plain text of a rich-text array as the API returns it (`plain_text`) or as we send it.
pub fn rich_text_plain(items: &[JsonValue]) -> String {
    items
        .iter()
        .filter_map(|item| {
            item.get("plain_text")
                .or_else(|| item.get("text").and_then(|t| t.get("content")))
                .and_then(JsonValue::as_str)
        })
        .collect()
}
