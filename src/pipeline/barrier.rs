//! Polling barrier over persisted check results.
//!
//! The orchestrator and the workers share nothing but the database, so
//! convergence is observed by counting `check_results` rows for a page.

use std::time::{Duration, Instant};

use anyhow::Result;
use siteaudit_common::{Page, TestingStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BarrierSection;
use crate::store::DbHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    Converged { results: u32 },
    TimedOut { results: u32, expected: u32 },
    Cancelled { results: u32 },
}

impl BarrierOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub fn results(&self) -> u32 {
        match self {
            Self::Converged { results }
            | Self::TimedOut { results, .. }
            | Self::Cancelled { results } => *results,
        }
    }

    /// Label written to the audit's `current_phase`.
    pub fn label(&self) -> String {
        match self {
            Self::Converged { results } => format!("testing: converged ({results} results)"),
            Self::TimedOut { results, expected } => {
                format!("testing: timed out ({results}/{expected} results)")
            }
            Self::Cancelled { results } => format!("testing: cancelled ({results} results)"),
        }
    }
}

#[derive(Clone)]
pub struct CompletionBarrier {
    store: DbHandle,
    idle_interval: Duration,
    active_interval: Duration,
    max_attempts: u32,
    max_wait: Duration,
}

impl CompletionBarrier {
    pub fn new(store: DbHandle, settings: &BarrierSection) -> Self {
        Self {
            store,
            idle_interval: settings.idle_interval(),
            active_interval: settings.active_interval(),
            max_attempts: settings.max_attempts.max(1),
            max_wait: settings.max_wait(),
        }
    }

    /// Wait for `expected` results on `page` using the configured ceiling.
    pub async fn wait(
        &self,
        page: &Page,
        expected: u32,
        cancel: &CancellationToken,
    ) -> Result<BarrierOutcome> {
        self.wait_for(page, expected, self.max_wait, cancel).await
    }

    /// Poll until `expected` results exist, the attempt budget or `max_wait`
    /// runs out, or `cancel` fires.
    ///
    /// Converged and timed-out waits both mark the page's testing complete;
    /// a timeout is a soft success. The audit status is left alone. A
    /// cancelled wait writes nothing.
    pub async fn wait_for(
        &self,
        page: &Page,
        expected: u32,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<BarrierOutcome> {
        let started = Instant::now();
        let page_id = page.id;
        let mut attempts = 0u32;

        let outcome = loop {
            let results = self
                .store
                .call(move |db| db.count_results_for_page(page_id))
                .await?;
            if results >= expected {
                break BarrierOutcome::Converged { results };
            }

            attempts += 1;
            let elapsed = started.elapsed();
            if attempts >= self.max_attempts || elapsed >= max_wait {
                break BarrierOutcome::TimedOut { results, expected };
            }

            // Slow cadence until the first result lands.
            let interval = if results == 0 {
                self.idle_interval
            } else {
                self.active_interval
            };
            let sleep = interval.min(max_wait - elapsed);
            debug!(page_id, results, expected, attempts, "Waiting for check results");

            tokio::select! {
                _ = cancel.cancelled() => break BarrierOutcome::Cancelled { results },
                _ = tokio::time::sleep(sleep) => {}
            }
        };

        match outcome {
            BarrierOutcome::Cancelled { results } => {
                warn!(page_id, results, expected, "Barrier wait cancelled");
                return Ok(outcome);
            }
            BarrierOutcome::TimedOut { results, expected } => {
                warn!(
                    page_id,
                    results,
                    expected,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Barrier timed out, continuing with partial results"
                );
            }
            BarrierOutcome::Converged { results } => {
                info!(page_id, results, "All check results arrived");
            }
        }

        let audit_id = page.audit_id;
        let label = outcome.label();
        self.store
            .call(move |db| {
                db.set_testing_status(page_id, TestingStatus::Complete)?;
                db.set_current_phase(audit_id, &label)
            })
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use siteaudit_common::{
        AuditMode, CheckStatus, CollectionStatus, NewAudit, NewCheckResult, TestingStatus,
    };

    use super::*;
    use crate::config::FullCrawlBarrier;
    use crate::store::AuditDb;

    fn settings(max_attempts: u32, max_wait_secs: u64) -> BarrierSection {
        BarrierSection {
            idle_interval_ms: 10,
            active_interval_ms: 5,
            max_attempts,
            max_wait_secs,
            full_crawl: FullCrawlBarrier::DispatchOnly,
        }
    }

    fn passed(page: &Page, key: &str) -> NewCheckResult {
        NewCheckResult {
            status: CheckStatus::Passed,
            score: Some(100.0),
            summary: "ok".into(),
            ..NewCheckResult::not_applicable(page, key, "seo", "")
        }
    }

    fn setup() -> Result<(DbHandle, Page)> {
        let db = AuditDb::new_in_memory()?;
        let audit = db.create_audit(&NewAudit::new("https://a.test", AuditMode::SinglePage))?;
        let page = db.insert_page(audit.id, &audit.url)?;
        db.set_collection_status(page.id, CollectionStatus::Complete)?;
        db.set_testing_status(page.id, TestingStatus::Testing)?;
        Ok((DbHandle::new(db), page))
    }

    #[tokio::test]
    async fn test_zero_expected_converges_immediately() -> Result<()> {
        let (store, page) = setup()?;
        let barrier = CompletionBarrier::new(store.clone(), &settings(5, 5));

        let outcome = barrier.wait(&page, 0, &CancellationToken::new()).await?;
        assert_eq!(outcome, BarrierOutcome::Converged { results: 0 });
        Ok(())
    }

    #[tokio::test]
    async fn test_converges_when_results_arrive_later() -> Result<()> {
        let (store, page) = setup()?;
        let barrier = CompletionBarrier::new(store.clone(), &settings(500, 5));

        let writer_store = store.clone();
        let writer_page = page.clone();
        let writer = tokio::spawn(async move {
            for key in ["a", "b"] {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let result = passed(&writer_page, key);
                writer_store
                    .call(move |db| db.insert_check_result(&result))
                    .await?;
            }
            anyhow::Ok(())
        });

        let outcome = barrier.wait(&page, 2, &CancellationToken::new()).await?;
        writer.await??;
        assert!(outcome.converged());
        assert_eq!(outcome.results(), 2);

        let (page_id, audit_id) = (page.id, page.audit_id);
        let page = store.call(move |db| db.get_page(page_id)).await?.unwrap();
        assert_eq!(page.testing_status, TestingStatus::Complete);
        let audit = store.call(move |db| db.get_audit(audit_id)).await?.unwrap();
        assert_eq!(
            audit.current_phase.as_deref(),
            Some("testing: converged (2 results)")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_times_out_after_attempt_budget_and_still_completes_page() -> Result<()> {
        let (store, page) = setup()?;
        let result = passed(&page, "only_one");
        store.call(move |db| db.insert_check_result(&result)).await?;
        let barrier = CompletionBarrier::new(store.clone(), &settings(3, 60));

        let started = Instant::now();
        let outcome = barrier.wait(&page, 3, &CancellationToken::new()).await?;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            outcome,
            BarrierOutcome::TimedOut {
                results: 1,
                expected: 3
            }
        );

        let (page_id, audit_id) = (page.id, page.audit_id);
        let page = store.call(move |db| db.get_page(page_id)).await?.unwrap();
        assert_eq!(page.testing_status, TestingStatus::Complete);
        let audit = store.call(move |db| db.get_audit(audit_id)).await?.unwrap();
        assert_eq!(audit.status.as_str(), "pending");
        Ok(())
    }

    #[tokio::test]
    async fn test_wall_clock_ceiling_bounds_the_wait() -> Result<()> {
        let (store, page) = setup()?;
        let barrier = CompletionBarrier::new(store.clone(), &settings(u32::MAX, 60));

        let started = Instant::now();
        let outcome = barrier
            .wait_for(&page, 1, Duration::from_millis(60), &CancellationToken::new())
            .await?;
        assert!(!outcome.converged());
        assert!(started.elapsed() < Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_returns_without_marking_page() -> Result<()> {
        let (store, page) = setup()?;
        let barrier = CompletionBarrier::new(store.clone(), &settings(u32::MAX, 60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = barrier.wait(&page, 4, &cancel).await?;
        assert_eq!(outcome, BarrierOutcome::Cancelled { results: 0 });
        let page_id = page.id;
        let page = store.call(move |db| db.get_page(page_id)).await?.unwrap();
        assert_eq!(page.testing_status, TestingStatus::Testing);
        Ok(())
    }
}
