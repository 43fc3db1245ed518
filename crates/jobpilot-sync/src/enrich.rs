//! Vibe enrichment stage. Best effort: nothing here can fail a harvest.

use jobpilot_adapters::vibe::{VibeDirectory, VibeScraper};
use jobpilot_core::Job;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub from_directory: usize,
    pub scraped: usize,
}

pub struct VibeEnricher {
    directory: VibeDirectory,
    scrape_limit: usize,
}

impl VibeEnricher {
    pub fn new(directory: VibeDirectory, scrape_limit: usize) -> Self {
        Self {
            directory,
            scrape_limit,
        }
    }

    /// Curated vibes for every job that lacks one.
    pub fn apply_directory(&self, jobs: &mut [Job]) -> usize {
        let mut applied = 0;
        for job in jobs.iter_mut().filter(|job| lacks_vibe(job)) {
            if let Some(profile) = self.directory.lookup(&job.company) {
                job.vibe = Some(profile.clone());
                applied += 1;
            }
        }
        applied
    }

    /// Directory first, then up to `scrape_limit` scrapes for jobs still lacking a vibe.
    pub async fn enrich(&self, jobs: &mut [Job], scraper: Option<&VibeScraper<'_>>) -> EnrichReport {
        let mut report = EnrichReport {
            from_directory: self.apply_directory(jobs),
            scraped: 0,
        };

        if let Some(scraper) = scraper.filter(|_| self.scrape_limit > 0) {
            let candidates = jobs
                .iter_mut()
                .filter(|job| lacks_vibe(job) && job.url.is_some())
                .take(self.scrape_limit);
            for job in candidates {
                let profile = scraper.scrape(job).await;
                if profile.is_empty() {
                    debug!(external_id = %job.external_id, "no vibe found");
                    continue;
                }
                job.vibe = Some(profile);
                report.scraped += 1;
            }
        }

        if report.from_directory > 0 || report.scraped > 0 {
            info!(
                from_directory = report.from_directory,
                scraped = report.scraped,
                "vibe enrichment applied"
            );
        }
        report
    }
}

fn lacks_vibe(job: &Job) -> bool {
    job.vibe.as_ref().map(|v| v.is_empty()).unwrap_or(true)
}
