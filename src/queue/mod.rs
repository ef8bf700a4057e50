//! Durable fan-out of (page, check) jobs.
//!
//! The dispatcher only ever talks to a [`WorkQueue`]. The production queue
//! is the `check_jobs` table, drained by a [`WorkerPool`] in this process or
//! in a separate `siteaudit worker` process; the two sides share nothing but
//! the database.

mod worker;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::DbHandle;

pub use worker::WorkerPool;

/// One unit of fanned-out work. A worker re-resolves the page, check
/// definition and artifact from these two values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckJob {
    pub page_id: i64,
    pub check_key: String,
}

impl CheckJob {
    pub fn new(page_id: i64, check_key: impl Into<String>) -> Self {
        Self {
            page_id,
            check_key: check_key.into(),
        }
    }
}

/// Fire-and-forget submission.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn submit(&self, job: CheckJob) -> Result<()>;
}

/// Queue backed by the `check_jobs` table.
#[derive(Clone)]
pub struct SqliteQueue {
    store: DbHandle,
}

impl SqliteQueue {
    pub fn new(store: DbHandle) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn submit(&self, job: CheckJob) -> Result<()> {
        let id = self
            .store
            .call(move |db| db.enqueue_job(job.page_id, &job.check_key))
            .await?;
        tracing::debug!(job_id = id, "Check job queued");
        Ok(())
    }
}
