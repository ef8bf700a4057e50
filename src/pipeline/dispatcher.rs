//! Fan-out of one job per applicable check for a page.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use siteaudit_common::{Audit, CheckDefinition, Page, TestingStatus};
use tracing::{info, warn};

use crate::checks::CheckRegistry;
use crate::queue::{CheckJob, WorkQueue};
use crate::store::DbHandle;

pub struct Dispatcher {
    store: DbHandle,
    registry: Arc<CheckRegistry>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(store: DbHandle, registry: Arc<CheckRegistry>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            store,
            registry,
            queue,
        }
    }

    /// Checks that would run for `audit`, in defined order.
    pub async fn applicable_checks(&self, audit: &Audit) -> Result<Vec<CheckDefinition>> {
        let active = self
            .store
            .call(|db| db.list_active_check_definitions())
            .await?;
        Ok(resolve_check_set(
            active,
            audit.selected_checks.as_deref(),
            &audit.skipped_checks,
            &self.registry,
        ))
    }

    /// Submit one job per applicable check and return how many were
    /// submitted. Never waits for any of them.
    ///
    /// The page moves to `testing` with its expected result count before the
    /// first submission, so a worker finishing early cannot mark it complete
    /// while later jobs are still being submitted. It goes straight to
    /// `complete` when nothing applies.
    pub async fn dispatch(&self, page: &Page) -> Result<u32> {
        let audit_id = page.audit_id;
        let audit = self
            .store
            .call(move |db| db.get_audit(audit_id))
            .await?
            .with_context(|| format!("Audit {audit_id} not found for page {}", page.id))?;
        let checks = self.applicable_checks(&audit).await?;

        let page_id = page.id;
        let expected = checks.len() as u32;
        self.store
            .call(move |db| db.start_testing(page_id, expected))
            .await?;

        if checks.is_empty() {
            info!(page_id, "No checks apply, page is done testing");
            self.store
                .call(move |db| db.set_testing_status(page_id, TestingStatus::Complete))
                .await?;
            return Ok(0);
        }

        for check in &checks {
            self.queue
                .submit(CheckJob::new(page_id, check.key.clone()))
                .await
                .with_context(|| format!("Failed to submit {} for page {page_id}", check.key))?;
        }
        info!(page_id, checks = checks.len(), "Dispatched check jobs");
        Ok(checks.len() as u32)
    }
}

/// Pick the checks to run from the active catalog.
///
/// `selected = None` means every active check, `Some([])` means none, and a
/// non-empty list is intersected with the active set. Skipped keys and keys
/// without a registered strategy are removed afterwards.
pub fn resolve_check_set(
    active: Vec<CheckDefinition>,
    selected: Option<&[String]>,
    skipped: &[String],
    registry: &CheckRegistry,
) -> Vec<CheckDefinition> {
    let candidates = match selected {
        None => active,
        Some([]) => return Vec::new(),
        Some(keys) => {
            let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
            let chosen: Vec<CheckDefinition> = active
                .into_iter()
                .filter(|c| wanted.contains(c.key.as_str()))
                .collect();
            if chosen.len() < wanted.len() {
                let found: HashSet<&str> = chosen.iter().map(|c| c.key.as_str()).collect();
                let missing: Vec<&&str> = wanted.iter().filter(|k| !found.contains(**k)).collect();
                warn!(?missing, "Selected checks are unknown or inactive");
            }
            chosen
        }
    };

    let skipped: HashSet<&str> = skipped.iter().map(String::as_str).collect();
    candidates
        .into_iter()
        .filter(|c| !skipped.contains(c.key.as_str()))
        .filter(|c| {
            let known = registry.contains(&c.key);
            if !known {
                warn!(check_key = %c.key, "No execution strategy registered, skipping");
            }
            known
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use siteaudit_common::{AuditMode, CollectionStatus, NewAudit};

    use super::*;
    use crate::errors::StoreError;
    use crate::store::AuditDb;

    #[derive(Default)]
    struct RecordingQueue(Mutex<Vec<CheckJob>>);

    #[async_trait]
    impl WorkQueue for RecordingQueue {
        async fn submit(&self, job: CheckJob) -> Result<()> {
            self.0.lock().unwrap().push(job);
            Ok(())
        }
    }

    fn keys(defs: &[CheckDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.key.as_str()).collect()
    }

    fn owned(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_resolve_null_selection_runs_all_active_in_order() {
        let registry = CheckRegistry::builtin();
        let catalog = CheckRegistry::catalog();
        let resolved = resolve_check_set(catalog.clone(), None, &[], &registry);
        assert_eq!(resolved, catalog);
    }

    #[test]
    fn test_resolve_empty_selection_runs_nothing() {
        let registry = CheckRegistry::builtin();
        let resolved = resolve_check_set(CheckRegistry::catalog(), Some(&[]), &[], &registry);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolve_selection_intersects_active_and_keeps_catalog_order() {
        let registry = CheckRegistry::builtin();
        let selected = owned(&["readability", "page_title", "made_up"]);
        let resolved =
            resolve_check_set(CheckRegistry::catalog(), Some(&selected), &[], &registry);
        assert_eq!(keys(&resolved), vec!["page_title", "readability"]);
    }

    #[test]
    fn test_resolve_applies_skip_list_and_registry() {
        let registry = CheckRegistry::builtin();
        let mut catalog = CheckRegistry::catalog();
        catalog[0].key = "unregistered".into();
        let skipped = owned(&["meta_description"]);
        let resolved = resolve_check_set(catalog, None, &skipped, &registry);
        assert!(!keys(&resolved).contains(&"unregistered"));
        assert!(!keys(&resolved).contains(&"meta_description"));
        assert_eq!(resolved.len(), 16);
    }

    async fn setup(audit: NewAudit) -> Result<(Dispatcher, Arc<RecordingQueue>, DbHandle, Page)> {
        let db = AuditDb::new_in_memory()?;
        db.seed_check_definitions(&CheckRegistry::catalog())?;
        let audit = db.create_audit(&audit)?;
        let page = db.insert_page(audit.id, &audit.url)?;
        db.set_collection_status(page.id, CollectionStatus::Complete)?;
        let store = DbHandle::new(db);
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(CheckRegistry::builtin()),
            queue.clone(),
        );
        Ok((dispatcher, queue, store, page))
    }

    #[tokio::test]
    async fn test_dispatch_submits_one_job_per_check() -> Result<()> {
        let audit = NewAudit::new("https://a.test", AuditMode::SinglePage)
            .with_selected_checks(owned(&["page_title", "readability"]));
        let (dispatcher, queue, store, page) = setup(audit).await?;

        assert_eq!(dispatcher.dispatch(&page).await?, 2);
        let jobs = queue.0.lock().unwrap().clone();
        assert_eq!(
            jobs,
            vec![
                CheckJob::new(page.id, "page_title"),
                CheckJob::new(page.id, "readability")
            ]
        );
        let page_id = page.id;
        let page = store.call(move |db| db.get_page(page_id)).await?.unwrap();
        assert_eq!(page.testing_status, TestingStatus::Testing);
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_with_empty_selection_completes_page_immediately() -> Result<()> {
        let audit =
            NewAudit::new("https://a.test", AuditMode::SinglePage).with_selected_checks(vec![]);
        let (dispatcher, queue, store, page) = setup(audit).await?;

        assert_eq!(dispatcher.dispatch(&page).await?, 0);
        assert!(queue.0.lock().unwrap().is_empty());
        let page_id = page.id;
        let page = store.call(move |db| db.get_page(page_id)).await?.unwrap();
        assert_eq!(page.testing_status, TestingStatus::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_refuses_uncollected_page() -> Result<()> {
        let (dispatcher, queue, store, page) =
            setup(NewAudit::new("https://a.test", AuditMode::SinglePage)).await?;
        let page_id = page.id;
        store
            .call(move |db| db.set_collection_status(page_id, CollectionStatus::Failed))
            .await?;

        let err = dispatcher.dispatch(&page).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::PageNotCollected { .. })
        ));
        assert!(queue.0.lock().unwrap().is_empty());
        Ok(())
    }
}
