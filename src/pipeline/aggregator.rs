use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use siteaudit_common::{Audit, CategoryScore, CheckResult, CheckStatus, ResultAggregator};

use crate::store::DbHandle;

/// Default [`ResultAggregator`]: a plain mean per category.
pub struct ScoreAggregator {
    store: DbHandle,
}

impl ScoreAggregator {
    pub fn new(store: DbHandle) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResultAggregator for ScoreAggregator {
    async fn synthesize(&self, audit: &Audit) -> Result<Vec<CategoryScore>> {
        let audit_id = audit.id;
        let results = self
            .store
            .call(move |db| db.list_results_for_audit(audit_id))
            .await?;
        Ok(category_scores(&results))
    }
}

/// Mean score per category, ordered by category name.
///
/// A result contributes its own score when it has one and its status default
/// otherwise. `not_applicable` results are ignored and a category left with
/// nothing to score is omitted.
pub fn category_scores(results: &[CheckResult]) -> Vec<CategoryScore> {
    let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
    for result in results {
        if result.status == CheckStatus::NotApplicable {
            continue;
        }
        let Some(score) = result.score.or_else(|| result.status.default_score()) else {
            continue;
        };
        let entry = sums.entry(result.category.as_str()).or_default();
        entry.0 += score.clamp(0.0, 100.0);
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(category, (sum, count))| CategoryScore {
            category: category.to_string(),
            score: round1(sum / f64::from(count)),
            result_count: count,
        })
        .collect()
}

/// Mean of the category scores, `None` when nothing was scorable.
pub fn overall_score(scores: &[CategoryScore]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: f64 = scores.iter().map(|s| s.score).sum();
    Some(round1(sum / scores.len() as f64))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
