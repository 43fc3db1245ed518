//! Keyword tagging by whole-word, case-insensitive rule matching.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub name: String,
    #[serde(rename = "match", default)]
    pub terms: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RulesFile {
    List(Vec<KeywordRule>),
    Wrapped {
        #[serde(default)]
        rules: Vec<KeywordRule>,
    },
}

/// Reads `keywords.yml`. A missing or empty file is an empty rule set.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<KeywordRule>> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "keyword rules file not found; tagging disabled");
        return Ok(Vec::new());
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: Option<RulesFile> =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(match parsed {
        Some(RulesFile::List(rules)) | Some(RulesFile::Wrapped { rules }) => rules,
        None => Vec::new(),
    })
}

/// Rules compiled once per run.
#[derive(Debug, Clone, Default)]
pub struct Tagger {
    compiled: Vec<(String, Regex)>,
}

impl Tagger {
    pub fn new(rules: &[KeywordRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let terms: Vec<String> = rule
                .terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(regex::escape)
                .collect();
            if terms.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b(?:{})\b", terms.join("|"));
            let regex = Regex::new(&pattern)
                .with_context(|| format!("compiling keyword rule {}", rule.name))?;
            compiled.push((rule.name.clone(), regex));
        }
        Ok(Self { compiled })
    }

    /// Names of the rules that fire on `text`, in declaration order, each once.
    pub fn tag(&self, text: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for (name, regex) in &self.compiled {
            if !tags.contains(name) && regex.is_match(text) {
                tags.push(name.clone());
            }
        }
        tags
    }
}

/// One-shot tagging; prefer a [`Tagger`] when tagging many texts.
pub fn tag(text: &str, rules: &[KeywordRule]) -> Vec<String> {
    match Tagger::new(rules) {
        Ok(tagger) => tagger.tag(text),
        Err(err) => {
            warn!(error = %err, "invalid keyword rules; no tags applied");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, terms: &[&str]) -> KeywordRule {
        KeywordRule {
            name: name.into(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn matches_whole_words_only() {
        let rules = vec![rule("python", &["python"])];
        assert_eq!(tag("Looking for a Python engineer", &rules), vec!["python"]);
        assert!(tag("pythonic code", &rules).is_empty());
    }

    #[test]
    fn keeps_declaration_order_and_dedups_names() {
        let rules = vec![
            rule("design", &["industrial design"]),
            rule("ai", &["AI", "machine learning"]),
            rule("design", &["fabrication"]),
            rule("empty", &[]),
        ];
        let tags = tag("Machine Learning for fabrication and Industrial   design", &rules);
        assert_eq!(tags, vec!["ai", "design"]);
        assert!(tag("maintain the ai-free zone", &rules[1..2]).contains(&"ai".to_string()));
        assert!(tag("maintainers wanted", &rules).is_empty());
        assert!(tag("anything", &[]).is_empty());
    }

    #[test]
    fn rule_file_accepts_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.yml");
        std::fs::write(&bare, "- name: python\n  match: [python]\n").unwrap();
        let wrapped = dir.path().join("wrapped.yml");
        std::fs::write(&wrapped, "rules:\n  - name: go\n    match: [golang]\n").unwrap();
        let empty = dir.path().join("empty.yml");
        std::fs::write(&empty, "").unwrap();

        assert_eq!(load_rules(&bare).unwrap()[0].name, "python");
        assert_eq!(load_rules(&wrapped).unwrap()[0].terms, vec!["golang"]);
        assert!(load_rules(&empty).unwrap().is_empty());
        assert!(load_rules(dir.path().join("missing.yml")).unwrap().is_empty());
    }
}
