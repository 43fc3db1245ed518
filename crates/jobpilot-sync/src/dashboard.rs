//! Rollup statistics over the full archive history.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use jobpilot_core::{most_common, Job};
use serde::Serialize;

use crate::config::DashboardLinks;

pub const TOP_COMPANIES: usize = 5;
pub const TOP_TITLES: usize = 5;
pub const TOP_KEYWORDS: usize = 10;
pub const WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub today_date: NaiveDate,
    pub total_roles: usize,
    pub today_count: usize,
    pub remote_count: usize,
    pub onsite_count: usize,
    pub top_companies: Vec<(String, usize)>,
    pub top_titles: Vec<(String, usize)>,
    pub top_keywords: Vec<(String, usize)>,
    pub avg_salary: Option<f64>,
}

/// Pure rollup. `today_count` and the top-N lists key off each row's `first_seen` date.
pub fn compute_dashboard(rows: &[Job], now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let window_start = (now - Duration::days(WINDOW_DAYS)).date_naive();
    let recent: Vec<&Job> = rows
        .iter()
        .filter(|job| {
            let seen = job.first_seen_date();
            seen >= window_start && seen <= today
        })
        .collect();

    let midpoints: Vec<f64> = rows.iter().filter_map(Job::salary_midpoint).collect();
    let avg_salary = if midpoints.is_empty() {
        None
    } else {
        let mean = midpoints.iter().sum::<f64>() / midpoints.len() as f64;
        Some((mean * 100.0).round() / 100.0)
    };

    DashboardStats {
        today_date: today,
        total_roles: rows.len(),
        today_count: rows
            .iter()
            .filter(|job| job.first_seen_date() == today)
            .count(),
        remote_count: rows.iter().filter(|job| job.remote == Some(true)).count(),
        onsite_count: rows.iter().filter(|job| job.remote == Some(false)).count(),
        top_companies: most_common(recent.iter().map(|job| job.company.as_str()), TOP_COMPANIES),
        top_titles: most_common(recent.iter().map(|job| job.title.as_str()), TOP_TITLES),
        top_keywords: most_common(
            recent
                .iter()
                .flat_map(|job| job.keywords.iter().map(String::as_str)),
            TOP_KEYWORDS,
        ),
        avg_salary,
    }
}

fn pairs_to_text(pairs: &[(String, usize)]) -> String {
    if pairs.is_empty() {
        return "none".to_string();
    }
    pairs
        .iter()
        .map(|(label, count)| format!("{label} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Summary lines without the heading or links; reused by the portfolio block.
pub fn summary_lines(stats: &DashboardStats) -> Vec<String> {
    let mut lines = vec![
        format!("Today's jobs ({}): {}", stats.today_date, stats.today_count),
        format!("All-time collected: {}", stats.total_roles),
        format!(
            "Remote vs On-site: {} remote / {} on-site",
            stats.remote_count, stats.onsite_count
        ),
    ];
    if let Some(avg) = stats.avg_salary {
        lines.push(format!("Avg salary midpoint: {avg:.2}"));
    }
    lines.push(format!(
        "Top companies (last 7d): {}",
        pairs_to_text(&stats.top_companies)
    ));
    lines.push(format!("Top titles (last 7d): {}", pairs_to_text(&stats.top_titles)));
    lines.push(format!(
        "Top keywords (last 7d): {}",
        pairs_to_text(&stats.top_keywords)
    ));
    lines
}

pub fn render_dashboard_markdown(stats: &DashboardStats, links: &DashboardLinks) -> String {
    let mut out = vec![
        format!("## {}", jobpilot_notion::SENTINEL),
        String::new(),
        format!("- **Today's jobs ({}):** {}", stats.today_date, stats.today_count),
        format!("- **All-time collected:** {}", stats.total_roles),
        format!(
            "- **Remote vs On-site:** {} remote / {} on-site",
            stats.remote_count, stats.onsite_count
        ),
    ];
    if let Some(avg) = stats.avg_salary {
        out.push(format!("- **Avg salary midpoint:** {avg:.2}"));
    }
    out.push(String::new());
    out.push(format!(
        "**Top companies (last 7d):** {}",
        pairs_to_text(&stats.top_companies)
    ));
    out.push(format!(
        "**Top titles (last 7d):** {}",
        pairs_to_text(&stats.top_titles)
    ));
    out.push(format!(
        "**Top keywords (last 7d):** {}",
        pairs_to_text(&stats.top_keywords)
    ));
    out.push(String::new());
    out.push(format!("[Today's jobs]({})", links.today));
    out.push(format!("[Full database]({})", links.all));
    out.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 20, 18, 0, 0).unwrap()
    }

    fn row(id: &str, company: &str, days_ago: i64) -> Job {
        let mut job = Job::new(id, format!("Title {id}"), company, now() - Duration::days(days_ago));
        job.keywords = vec!["python".into()];
        job
    }

    #[test]
    fn average_salary_uses_midpoints_and_skips_missing() {
        let mut a = row("a", "Acme", 0);
        a.salary_min = Some(100.0);
        a.salary_max = Some(200.0);
        let mut b = row("b", "Acme", 0);
        b.salary_max = Some(300.0);
        let c = row("c", "Acme", 0);

        let stats = compute_dashboard(&[a, b, c.clone()], now());
        assert_eq!(stats.avg_salary, Some(225.0));
        assert_eq!(compute_dashboard(&[c], now()).avg_salary, None);
    }

    #[test]
    fn today_count_excludes_yesterday() {
        let stats = compute_dashboard(&[row("a", "Acme", 0), row("b", "Acme", 1)], now());
        assert_eq!(stats.today_count, 1);
        assert_eq!(stats.total_roles, 2);
    }

    #[test]
    fn top_lists_cover_the_trailing_week_only() {
        let mut rows = vec![
            row("1", "Beta", 1),
            row("2", "Acme", 2),
            row("3", "Acme", 3),
            row("4", "Beta", 7),
            row("5", "Old Co", 8),
            row("6", "Old Co", 9),
            row("7", "Old Co", 10),
        ];
        rows[0].remote = Some(true);
        rows[1].remote = Some(false);
        rows[6].remote = Some(true);

        let stats = compute_dashboard(&rows, now());

        assert_eq!(
            stats.top_companies,
            vec![("Beta".to_string(), 2), ("Acme".to_string(), 2)]
        );
        assert_eq!(stats.top_keywords, vec![("python".to_string(), 4)]);
        assert_eq!(stats.top_titles.len(), 4);
        assert_eq!((stats.remote_count, stats.onsite_count), (2, 1));
    }

    #[test]
    fn markdown_lists_counts_and_links() {
        let mut a = row("a", "Acme", 0);
        a.salary_min = Some(1000.5);
        let stats = compute_dashboard(&[a], now());
        let links = DashboardLinks {
            today: "https://notion.so/today".into(),
            all: "https://notion.so/all".into(),
        };

        let md = render_dashboard_markdown(&stats, &links);

        assert!(md.starts_with("## Jobs Dashboard (auto-updated)\n"));
        assert!(md.contains("- **Today's jobs (2026-02-20):** 1\n"));
        assert!(md.contains("- **Avg salary midpoint:** 1000.50\n"));
        assert!(md.contains("**Top companies (last 7d):** Acme (1)\n"));
        assert!(md.contains("[Full database](https://notion.so/all)"));
        assert!(!md.contains("\\n"));
    }
}
