use anyhow::Result;
use async_trait::async_trait;
use siteaudit_common::{Audit, Page, Prioritizer, PriorityPage};
use tracing::debug;
use url::Url;

/// Path keywords per page type, most valuable first.
const PAGE_TYPES: &[(&str, f64, &[&str])] = &[
    ("pricing", 90.0, &["pricing", "plans", "price"]),
    ("product", 85.0, &["product", "features", "solutions", "services", "shop"]),
    ("about", 70.0, &["about", "company", "team"]),
    ("contact", 65.0, &["contact", "support", "demo"]),
    ("blog", 40.0, &["blog", "news", "articles", "resources"]),
];

const HOME_SCORE: f64 = 100.0;
const OTHER_SCORE: f64 = 20.0;

/// Classifies pages by URL path and keeps the best scoring ones.
pub struct HeuristicPrioritizer {
    max_pages: usize,
}

impl HeuristicPrioritizer {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }
}

/// `(page_type, score)` for a URL. Deeper paths score a little lower.
pub fn classify(url: &str) -> (&'static str, f64) {
    let Ok(parsed) = Url::parse(url) else {
        return ("other", OTHER_SCORE);
    };
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(|seg| seg.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();
    if segments.is_empty() {
        return ("home", HOME_SCORE);
    }

    let depth_penalty = 5.0 * (segments.len() as f64 - 1.0);
    for &(page_type, score, keywords) in PAGE_TYPES {
        if segments
            .iter()
            .any(|seg| keywords.iter().any(|k| seg.starts_with(k)))
        {
            return (page_type, (score - depth_penalty).max(OTHER_SCORE));
        }
    }
    ("other", (OTHER_SCORE - depth_penalty).max(1.0))
}

#[async_trait]
impl Prioritizer for HeuristicPrioritizer {
    /// The seed page is always first; ties keep crawl order.
    async fn identify_priority(&self, audit: &Audit, pages: &[Page]) -> Result<Vec<PriorityPage>> {
        let mut ranked: Vec<PriorityPage> = pages
            .iter()
            .filter(|p| p.url != audit.url)
            .map(|p| {
                let (page_type, score) = classify(&p.url);
                PriorityPage {
                    url: p.url.clone(),
                    page_type: page_type.to_string(),
                    priority_score: score,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        ranked.truncate(self.max_pages - 1);

        let mut selected = vec![PriorityPage {
            url: audit.url.clone(),
            page_type: "home".to_string(),
            priority_score: HOME_SCORE,
        }];
        selected.extend(ranked);
        debug!(audit_id = audit.id, selected = selected.len(), "Pages prioritized");
        Ok(selected)
    }
}
