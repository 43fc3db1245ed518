//! Incremental merge of a fresh harvest into the day's archived set.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use jobpilot_core::Job;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub refreshed: usize,
    pub untouched: usize,
}

pub fn merge(existing: &[Job], incoming: &[Job], harvested_at: DateTime<Utc>) -> Vec<Job> {
    merge_with_stats(existing, incoming, harvested_at).0
}

/// Merge keyed by `external_id`: existing order kept, new jobs appended, `first_seen`
/// preserved, `last_seen` bumped to the harvest time for every incoming match.
pub fn merge_with_stats(
    existing: &[Job],
    incoming: &[Job],
    harvested_at: DateTime<Utc>,
) -> (Vec<Job>, MergeStats) {
    let mut merged: Vec<Job> = Vec::with_capacity(existing.len() + incoming.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    for job in existing {
        match slots.get(&job.external_id) {
            Some(&slot) => {
                let kept = &merged[slot];
                let mut folded = job.clone();
                folded.first_seen = kept.first_seen.min(job.first_seen);
                folded.last_seen = kept.last_seen.max(job.last_seen);
                if folded.vibe.is_none() {
                    folded.vibe = kept.vibe.clone();
                }
                merged[slot] = folded;
            }
            None => {
                slots.insert(job.external_id.clone(), merged.len());
                merged.push(job.clone());
            }
        }
    }

    let existing_count = merged.len();
    let mut refreshed: HashSet<usize> = HashSet::new();
    let mut stats = MergeStats::default();

    for job in incoming {
        match slots.get(&job.external_id) {
            Some(&slot) => {
                let previous = &merged[slot];
                let mut next = job.clone();
                next.first_seen = previous.first_seen;
                next.last_seen = harvested_at.max(previous.first_seen);
                if next.vibe.is_none() {
                    next.vibe = previous.vibe.clone();
                }
                merged[slot] = next;
                if slot < existing_count {
                    refreshed.insert(slot);
                }
            }
            None => {
                let mut next = job.clone();
                next.first_seen = harvested_at;
                next.last_seen = harvested_at;
                slots.insert(next.external_id.clone(), merged.len());
                merged.push(next);
                stats.added += 1;
            }
        }
    }

    stats.refreshed = refreshed.len();
    stats.untouched = existing_count - stats.refreshed;
    (merged, stats)
}
