//! One audit run: the phase state machine.
//!
//! Each phase writes its label to the audit, runs its collaborator and
//! records a history row. Any error out of a phase fails the audit and stops
//! the run. Check-level failures never get here: the executor turns them
//! into results.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use siteaudit_common::{
    AiInvoker, Audit, AuditMode, AuditStatus, CategoryScore, CollectionStatus, Crawler, Page,
    PageCollector, Prioritizer, PriorityPage, ResultAggregator,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::aggregator::overall_score;
use super::barrier::{BarrierOutcome, CompletionBarrier};
use super::dispatcher::Dispatcher;
use super::summary::ExecutiveSummary;
use crate::checks::CheckRegistry;
use crate::config::{Config, FullCrawlBarrier};
use crate::errors::OrchestratorError;
use crate::queue::WorkQueue;
use crate::store::{DbHandle, PhaseStatus};

/// External collaborators driven by the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub crawler: Arc<dyn Crawler>,
    pub prioritizer: Arc<dyn Prioritizer>,
    pub collector: Arc<dyn PageCollector>,
    pub aggregator: Arc<dyn ResultAggregator>,
    pub ai: Arc<dyn AiInvoker>,
}

pub struct Orchestrator {
    store: DbHandle,
    dispatcher: Dispatcher,
    barrier: CompletionBarrier,
    summary: ExecutiveSummary,
    collaborators: Collaborators,
    full_crawl: FullCrawlBarrier,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: DbHandle,
        registry: Arc<CheckRegistry>,
        queue: Arc<dyn WorkQueue>,
        collaborators: Collaborators,
        config: &Config,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone(), registry, queue),
            barrier: CompletionBarrier::new(store.clone(), &config.barrier),
            summary: ExecutiveSummary::new(collaborators.ai.clone(), config.ai.clone()),
            store,
            collaborators,
            full_crawl: config.barrier.full_crawl,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that interrupts a barrier wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every phase of a `pending` audit to `complete` or `failed`.
    ///
    /// The audit is claimed atomically; a second call for the same audit
    /// returns [`OrchestratorError::AlreadyStarted`] without touching it.
    pub async fn run(&self, audit_id: i64) -> Result<Audit, OrchestratorError> {
        let audit = self
            .store
            .call(move |db| db.get_audit(audit_id))
            .await?
            .ok_or(OrchestratorError::AuditNotFound { id: audit_id })?;

        let phases = audit.mode.phases();
        let first = phases[0];
        let claimed = self
            .store
            .call(move |db| db.claim_audit(audit_id, first))
            .await?;
        if !claimed {
            let status = self
                .store
                .call(move |db| db.get_audit(audit_id))
                .await?
                .map(|a| a.status)
                .unwrap_or(audit.status);
            return Err(OrchestratorError::AlreadyStarted {
                id: audit_id,
                status,
            });
        }
        info!(audit_id, url = %audit.url, mode = audit.mode.as_str(), "Audit started");

        for (index, &phase) in phases.iter().enumerate() {
            if phase == AuditStatus::Complete {
                break;
            }
            if index > 0 {
                self.store
                    .call(move |db| db.advance_audit_status(audit_id, phase))
                    .await?;
            }
            self.store
                .call(move |db| db.upsert_audit_phase(audit_id, phase, PhaseStatus::Running, None))
                .await?;

            let started = Instant::now();
            if let Err(e) = self.run_phase(phase, &audit).await {
                return Err(self.abort(audit_id, phase, e).await);
            }
            self.store
                .call(move |db| {
                    db.upsert_audit_phase(audit_id, phase, PhaseStatus::Completed, None)
                })
                .await?;
            info!(
                audit_id,
                phase = %phase,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Phase complete"
            );
        }

        let audit = self
            .store
            .call(move |db| db.advance_audit_status(audit_id, AuditStatus::Complete))
            .await?;
        info!(audit_id, overall_score = ?audit.overall_score, "Audit complete");
        Ok(audit)
    }

    async fn run_phase(&self, phase: AuditStatus, audit: &Audit) -> Result<()> {
        match phase {
            AuditStatus::Crawling => self.crawl(audit).await,
            AuditStatus::Prioritizing => self.prioritize(audit).await,
            AuditStatus::Collecting => self.collect(audit).await,
            AuditStatus::Testing => self.test(audit).await,
            AuditStatus::Synthesizing => self.synthesize(audit).await,
            other => bail!("{other} is not a runnable phase"),
        }
    }

    /// Record the failure on the audit and its phase history.
    async fn abort(
        &self,
        audit_id: i64,
        phase: AuditStatus,
        error: anyhow::Error,
    ) -> OrchestratorError {
        let cancelled = matches!(
            error.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::Cancelled { .. })
        );
        let message = if cancelled {
            "cancelled while waiting for check results".to_string()
        } else {
            format!("{phase}: {error:#}")
        };

        let recorded = message.clone();
        let outcome = self
            .store
            .call(move |db| {
                db.upsert_audit_phase(audit_id, phase, PhaseStatus::Failed, Some(&recorded))?;
                db.fail_audit(audit_id, &recorded)?;
                Ok(())
            })
            .await;
        if let Err(e) = outcome {
            error!(audit_id, error = %e, "Failed to record audit failure");
        }

        if cancelled {
            warn!(audit_id, phase = %phase, "Audit cancelled");
            OrchestratorError::Cancelled { id: audit_id }
        } else {
            error!(audit_id, phase = %phase, error = %message, "Audit failed");
            OrchestratorError::PhaseFailed {
                phase,
                source: error,
            }
        }
    }

    async fn crawl(&self, audit: &Audit) -> Result<()> {
        let mut urls = self
            .collaborators
            .crawler
            .crawl(&audit.url)
            .await
            .context("Crawler failed")?;
        if !urls.iter().any(|u| u == &audit.url) {
            urls.insert(0, audit.url.clone());
        }

        let audit_id = audit.id;
        let discovered = urls.len();
        let inserted = self
            .store
            .call(move |db| db.insert_pages(audit_id, &urls))
            .await?;
        info!(audit_id, discovered, inserted, "Crawl finished");
        Ok(())
    }

    async fn prioritize(&self, audit: &Audit) -> Result<()> {
        let audit_id = audit.id;
        let pages = self.store.call(move |db| db.list_pages(audit_id)).await?;
        let mut priorities = self
            .collaborators
            .prioritizer
            .identify_priority(audit, &pages)
            .await
            .context("Prioritizer failed")?;
        if priorities.is_empty() {
            warn!(audit_id, "Prioritizer picked nothing, falling back to the seed page");
            priorities.push(PriorityPage {
                url: audit.url.clone(),
                page_type: "home".to_string(),
                priority_score: 100.0,
            });
        }

        let flagged = self
            .store
            .call(move |db| {
                for priority in &priorities {
                    db.flag_priority_page(audit_id, priority)?;
                }
                Ok(priorities.len())
            })
            .await?;
        info!(audit_id, pages = pages.len(), flagged, "Priority pages selected");
        Ok(())
    }

    /// A collector error is fatal to the whole audit.
    async fn collect(&self, audit: &Audit) -> Result<()> {
        for page in self.scoped_pages(audit).await? {
            let page_id = page.id;
            self.store
                .call(move |db| db.set_collection_status(page_id, CollectionStatus::Collecting))
                .await?;

            match self.collaborators.collector.collect(&page).await {
                Ok(artifact) => {
                    self.store
                        .call(move |db| {
                            db.save_artifact(page_id, &artifact)?;
                            db.set_collection_status(page_id, CollectionStatus::Complete)
                        })
                        .await?;
                    info!(page_id, url = %page.url, "Page data collected");
                }
                Err(e) => {
                    let marked = self
                        .store
                        .call(move |db| db.set_collection_status(page_id, CollectionStatus::Failed))
                        .await;
                    if let Err(mark_err) = marked {
                        warn!(page_id, error = %mark_err, "Failed to mark page collection failed");
                    }
                    return Err(e.context(format!("Collecting {} failed", page.url)));
                }
            }
        }
        Ok(())
    }

    async fn test(&self, audit: &Audit) -> Result<()> {
        let pages: Vec<Page> = self
            .scoped_pages(audit)
            .await?
            .into_iter()
            .filter(|p| p.data_collection_status == CollectionStatus::Complete)
            .collect();
        if pages.is_empty() {
            warn!(audit_id = audit.id, "No collected pages to test");
        }

        let mut dispatched = Vec::with_capacity(pages.len());
        for page in pages {
            let expected = self.dispatcher.dispatch(&page).await?;
            dispatched.push((page, expected));
        }
        let total: u32 = dispatched.iter().map(|(_, n)| n).sum();

        let await_results = match audit.mode {
            AuditMode::SinglePage => true,
            AuditMode::FullCrawl => self.full_crawl == FullCrawlBarrier::Await,
        };
        if !await_results {
            warn!(
                audit_id = audit.id,
                pages = dispatched.len(),
                checks = total,
                "Full-crawl testing continues without waiting for check results"
            );
            let audit_id = audit.id;
            let label = format!("testing: dispatched {total} checks");
            self.store
                .call(move |db| db.set_current_phase(audit_id, &label))
                .await?;
            return Ok(());
        }

        for (page, expected) in &dispatched {
            let outcome = self.barrier.wait(page, *expected, &self.cancel).await?;
            if let BarrierOutcome::Cancelled { .. } = outcome {
                return Err(OrchestratorError::Cancelled { id: audit.id }.into());
            }
        }
        Ok(())
    }

    async fn synthesize(&self, audit: &Audit) -> Result<()> {
        let scores = self
            .collaborators
            .aggregator
            .synthesize(audit)
            .await
            .context("Aggregator failed")?;
        let overall = overall_score(&scores);

        let audit_id = audit.id;
        let stored = scores.clone();
        self.store
            .call(move |db| {
                db.save_category_scores(audit_id, &stored)?;
                db.set_overall_score(audit_id, overall)
            })
            .await?;
        info!(audit_id, categories = scores.len(), overall = ?overall, "Scores saved");

        if audit.mode == AuditMode::SinglePage {
            self.write_summary(audit, &scores).await;
        }
        Ok(())
    }

    /// Best effort; the audit completes with or without a summary.
    async fn write_summary(&self, audit: &Audit, scores: &[CategoryScore]) {
        let audit_id = audit.id;
        let results = match self
            .store
            .call(move |db| db.list_results_for_audit(audit_id))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(audit_id, error = %e, "Skipping summary, could not load results");
                return;
            }
        };

        match self.summary.generate(audit, scores, &results).await {
            Ok(Some(text)) => {
                if let Err(e) = self
                    .store
                    .call(move |db| db.set_audit_summary(audit_id, &text))
                    .await
                {
                    warn!(audit_id, error = %e, "Failed to store summary");
                }
            }
            Ok(None) => warn!(audit_id, "AI provider returned no summary"),
            Err(e) => warn!(audit_id, error = %e, "Summary generation failed"),
        }
    }

    /// Pages a phase works on: the seed page in single-page mode, the
    /// priority pages in full-crawl mode.
    async fn scoped_pages(&self, audit: &Audit) -> Result<Vec<Page>> {
        let (audit_id, url, mode) = (audit.id, audit.url.clone(), audit.mode);
        self.store
            .call(move |db| match mode {
                AuditMode::SinglePage => Ok(vec![db.insert_page(audit_id, &url)?]),
                AuditMode::FullCrawl => db.list_priority_pages(audit_id),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use siteaudit_common::{ChatRequest, NewAudit, PageArtifact};

    use super::*;
    use crate::queue::CheckJob;
    use crate::store::AuditDb;

    struct FailingCrawler;

    #[async_trait]
    impl Crawler for FailingCrawler {
        async fn crawl(&self, _seed_url: &str) -> Result<Vec<String>> {
            bail!("connection refused")
        }
    }

    struct NoPriorities;

    #[async_trait]
    impl Prioritizer for NoPriorities {
        async fn identify_priority(&self, _: &Audit, _: &[Page]) -> Result<Vec<PriorityPage>> {
            Ok(vec![])
        }
    }

    struct EmptyCollector;

    #[async_trait]
    impl PageCollector for EmptyCollector {
        async fn collect(&self, page: &Page) -> Result<PageArtifact> {
            Ok(PageArtifact {
                url: page.url.clone(),
                ..Default::default()
            })
        }
    }

    struct NoScores;

    #[async_trait]
    impl ResultAggregator for NoScores {
        async fn synthesize(&self, _: &Audit) -> Result<Vec<CategoryScore>> {
            Ok(vec![])
        }
    }

    struct SilentAi;

    #[async_trait]
    impl AiInvoker for SilentAi {
        async fn chat(&self, _: ChatRequest) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct DroppingQueue;

    #[async_trait]
    impl WorkQueue for DroppingQueue {
        async fn submit(&self, _job: CheckJob) -> Result<()> {
            Ok(())
        }
    }

    fn orchestrator(store: DbHandle, crawler: Arc<dyn Crawler>) -> Orchestrator {
        let collaborators = Collaborators {
            crawler,
            prioritizer: Arc::new(NoPriorities),
            collector: Arc::new(EmptyCollector),
            aggregator: Arc::new(NoScores),
            ai: Arc::new(SilentAi),
        };
        Orchestrator::new(
            store,
            Arc::new(CheckRegistry::builtin()),
            Arc::new(DroppingQueue),
            collaborators,
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_audit_is_not_found() -> Result<()> {
        let store = DbHandle::new(AuditDb::new_in_memory()?);
        let err = orchestrator(store, Arc::new(FailingCrawler))
            .run(42)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AuditNotFound { id: 42 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_without_changes() -> Result<()> {
        let db = AuditDb::new_in_memory()?;
        let audit = db.create_audit(&NewAudit::new("https://a.test", AuditMode::FullCrawl))?;
        db.fail_audit(audit.id, "earlier failure")?;
        let store = DbHandle::new(db);

        let err = orchestrator(store.clone(), Arc::new(FailingCrawler))
            .run(audit.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AlreadyStarted {
                status: AuditStatus::Failed,
                ..
            }
        ));
        let id = audit.id;
        let audit = store.call(move |db| db.get_audit(id)).await?.unwrap();
        assert_eq!(audit.error_message.as_deref(), Some("earlier failure"));
        Ok(())
    }

    #[tokio::test]
    async fn test_crawler_failure_fails_audit_and_stops() -> Result<()> {
        let db = AuditDb::new_in_memory()?;
        let audit = db.create_audit(&NewAudit::new("https://a.test", AuditMode::FullCrawl))?;
        let store = DbHandle::new(db);

        let err = orchestrator(store.clone(), Arc::new(FailingCrawler))
            .run(audit.id)
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(AuditStatus::Crawling));

        let id = audit.id;
        let (audit, phases, pages) = store
            .call(move |db| {
                Ok((
                    db.get_audit(id)?.unwrap(),
                    db.list_audit_phases(id)?,
                    db.list_pages(id)?,
                ))
            })
            .await?;
        assert_eq!(audit.status, AuditStatus::Failed);
        assert!(audit.error_message.unwrap().contains("connection refused"));
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].status, PhaseStatus::Failed);
        assert!(pages.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_full_crawl_with_empty_prioritizer_falls_back_to_seed() -> Result<()> {
        struct SeedOnly;

        #[async_trait]
        impl Crawler for SeedOnly {
            async fn crawl(&self, seed_url: &str) -> Result<Vec<String>> {
                Ok(vec![format!("{seed_url}/about")])
            }
        }

        let db = AuditDb::new_in_memory()?;
        db.seed_check_definitions(&CheckRegistry::catalog())?;
        let audit = db.create_audit(&NewAudit::new("https://a.test", AuditMode::FullCrawl))?;
        let store = DbHandle::new(db);

        let finished = orchestrator(store.clone(), Arc::new(SeedOnly))
            .run(audit.id)
            .await?;
        assert_eq!(finished.status, AuditStatus::Complete);
        assert_eq!(
            finished.current_phase.as_deref(),
            Some(AuditStatus::Complete.as_str())
        );

        let id = audit.id;
        let (pages, priority, phases) = store
            .call(move |db| {
                Ok((
                    db.list_pages(id)?,
                    db.list_priority_pages(id)?,
                    db.list_audit_phases(id)?,
                ))
            })
            .await?;
        assert_eq!(pages.len(), 2);
        assert_eq!(priority.len(), 1);
        assert_eq!(priority[0].url, "https://a.test");
        assert_eq!(priority[0].testing_status.as_str(), "testing");
        assert_eq!(phases.len(), 5);
        assert!(phases.iter().all(|p| p.status == PhaseStatus::Completed));
        Ok(())
    }
}
