//! Company "vibe" enrichment: a curated YAML directory plus a best-effort site scraper.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jobpilot_core::{most_common, truncate_chars, Job, VibeProfile};
use jobpilot_storage::HttpFetcher;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::visible_text;

pub const CANDIDATE_PATHS: [&str; 11] = [
    "",
    "about",
    "company",
    "careers",
    "values",
    "mission",
    "brand",
    "press",
    "blog",
    "design",
    "design-system",
];

const BRANDISH_MARKERS: [&str; 10] = [
    "/brand",
    "/press",
    "/media",
    "/blog",
    "/news",
    "/design",
    "design-system",
    "/careers",
    "/values",
    "/mission",
];

const STOPWORDS: &str = "a an and are as at be by for from has have i in is it its of on or our \
    that the their them there they this to was we with you your solutions platform products \
    services team global customer customers enterprise trusted leading innovation innovative \
    enable empowering empower secure";

const MAX_KEYWORDS: usize = 8;
const MAX_LINKS: usize = 6;
const MAX_TALKING_POINTS: usize = 4;

static STOPWORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOPWORDS.split_whitespace().collect());

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z\-+]{2,}").expect("static regex"));

static MISSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bour mission is\b.+?[.!?]",
        r"(?i)\bmission\b.+?[.!?]",
        r"(?i)\bour purpose\b.+?[.!?]",
        r"(?i)\bwe (?:exist|aim|strive|work) to\b.+?[.!?]",
        r"(?i)\bwhat we (?:do|believe)\b.+?[.!?]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
});

static MISSION_FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i).{20,180}?(customers?|users?|developers?)\. ").expect("static regex")
});

static COMPANY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s,]*\b(inc|corp|ltd|llc)\.?$").expect("static regex")
});

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

#[derive(Debug, Clone, Default, Deserialize)]
struct DirectoryEntry {
    #[serde(default)]
    mission: Option<String>,
    #[serde(default)]
    vibe: Vec<String>,
    #[serde(default)]
    talking_points: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
}

/// Curated vibes keyed by normalized company name.
#[derive(Debug, Clone, Default)]
pub struct VibeDirectory {
    entries: HashMap<String, VibeProfile>,
}

impl VibeDirectory {
    /// A missing file is an empty directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: Option<HashMap<String, DirectoryEntry>> = serde_yaml::from_str(text)?;
        let entries = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, entry)| {
                let profile = VibeProfile {
                    mission: entry.mission,
                    keywords: entry.vibe,
                    links: entry.links,
                    talking_points: entry.talking_points,
                };
                (normalize_company(&name), profile)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact normalized match first, then the name without a trailing legal suffix.
    pub fn lookup(&self, company: &str) -> Option<&VibeProfile> {
        let key = normalize_company(company);
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.entries.get(&key) {
            return Some(hit);
        }
        let stripped = COMPANY_SUFFIX.replace(&key, "");
        self.entries.get(stripped.trim())
    }
}

fn normalize_company(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Scrapes a company's public site starting from a job's ATS page. Every failure yields
/// an empty profile.
pub struct VibeScraper<'a> {
    http: &'a HttpFetcher,
    run_id: Uuid,
}

impl<'a> VibeScraper<'a> {
    pub fn new(http: &'a HttpFetcher, run_id: Uuid) -> Self {
        Self { http, run_id }
    }

    pub async fn scrape(&self, job: &Job) -> VibeProfile {
        let Some(apply_url) = job.url.as_deref().and_then(|u| Url::parse(u).ok()) else {
            return VibeProfile::default();
        };

        let Some(ats_page) = self.get_html(apply_url.as_str()).await else {
            return VibeProfile::default();
        };
        let Some(root) = pick_company_root(&apply_url, &ats_page) else {
            debug!(company = %job.company, "no external company site linked from ats page");
            return VibeProfile::default();
        };

        let mut pages = Vec::new();
        for path in CANDIDATE_PATHS {
            let Ok(url) = root.join(path) else {
                continue;
            };
            if let Some(html) = self.get_html(url.as_str()).await {
                pages.push((url, html));
            }
        }
        if pages.is_empty() {
            return VibeProfile::default();
        }

        profile_from_pages(&root, &pages)
    }

    async fn get_html(&self, url: &str) -> Option<String> {
        match self.http.fetch_bytes(self.run_id, "vibe", url).await {
            Ok(response) if response.is_html() => Some(response.text()),
            Ok(_) => None,
            Err(err) => {
                debug!(url, error = %err, "vibe page fetch failed");
                None
            }
        }
    }
}

/// Build a profile from already-fetched `(page url, html)` pairs.
pub fn profile_from_pages(root: &Url, pages: &[(Url, String)]) -> VibeProfile {
    let text = pages
        .iter()
        .map(|(_, html)| visible_text(&Html::parse_document(html)))
        .collect::<Vec<_>>()
        .join(" ");

    let mission = extract_mission(&text);
    let keywords = keywords_from_text(&text, MAX_KEYWORDS);
    let links = brandish_links(root, pages);
    let talking_points = talking_points(mission.as_deref(), &keywords, &links);

    VibeProfile {
        mission,
        keywords,
        links,
        talking_points,
    }
}

/// Registrable domain of a host: the last two labels, or three for `co.uk`-style suffixes.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let keep = match labels.as_slice() {
        [] => return None,
        [.., second, tld]
            if labels.len() >= 3
                && tld.len() == 2
                && matches!(*second, "co" | "com" | "org" | "net" | "ac" | "gov") =>
        {
            3
        }
        _ => 2,
    };
    let start = labels.len().saturating_sub(keep);
    Some(labels[start..].join("."))
}

fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            !(href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("tel:"))
        })
        .filter_map(|href| base.join(href).ok())
        .collect()
}

/// Most frequently linked domain that is not the ATS's own.
pub fn pick_company_root(apply_url: &Url, ats_html: &str) -> Option<Url> {
    let ats_domain = registrable_domain(apply_url);
    let candidates = extract_links(ats_html, apply_url)
        .into_iter()
        .filter(|link| matches!(link.scheme(), "http" | "https"))
        .filter_map(|link| registrable_domain(&link))
        .filter(|domain| Some(domain) != ats_domain.as_ref());

    let (domain, _) = most_common(candidates, 1).into_iter().next()?;
    Url::parse(&format!("{}://{domain}/", apply_url.scheme())).ok()
}

pub fn extract_mission(text: &str) -> Option<String> {
    MISSION_PATTERNS
        .iter()
        .find_map(|pattern| pattern.find(text))
        .or_else(|| MISSION_FALLBACK.find(text))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn keywords_from_text(text: &str, limit: usize) -> Vec<String> {
    let words = WORD
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORD_SET.contains(w.as_str()) && w.len() <= 24);
    most_common(words, limit)
        .into_iter()
        .map(|(word, _)| word)
        .collect()
}

pub fn brandish_links(root: &Url, pages: &[(Url, String)]) -> Vec<String> {
    let root_domain = registrable_domain(root);
    let mut seen = HashSet::new();
    let mut keep = Vec::new();
    for (page_url, html) in pages {
        for link in extract_links(html, page_url) {
            if registrable_domain(&link) != root_domain {
                continue;
            }
            let link = link.to_string();
            let lower = link.to_lowercase();
            if BRANDISH_MARKERS.iter().any(|m| lower.contains(m)) && seen.insert(link.clone()) {
                keep.push(link);
            }
        }
    }
    keep.truncate(MAX_LINKS);
    keep
}

pub fn talking_points(mission: Option<&str>, keywords: &[String], links: &[String]) -> Vec<String> {
    let mut points = Vec::new();
    if let Some(mission) = mission {
        points.push(format!("Mission fit: {}", truncate_chars(mission, 120).trim_end()));
    }
    if !keywords.is_empty() {
        let themes: Vec<&str> = keywords.iter().take(6).map(String::as_str).collect();
        points.push(format!("Themes: {}", themes.join(", ")));
    }
    let lower: Vec<String> = links.iter().map(|l| l.to_lowercase()).collect();
    if lower.iter().any(|l| l.contains("careers")) {
        points.push("Recent roles & teams on Careers page".to_string());
    }
    if lower.iter().any(|l| l.contains("blog") || l.contains("news")) {
        points.push("Pull a recent blog/news win".to_string());
    }
    points.truncate(MAX_TALKING_POINTS);
    points
}
