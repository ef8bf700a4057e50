use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use siteaudit_common::NewCheckResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checks::CheckExecutor;
use crate::config::WorkersSection;
use crate::store::{DbHandle, JobRecord, JobStatus};

/// A fixed set of tokio tasks draining the `check_jobs` table, plus one
/// task that requeues jobs orphaned by a crashed worker.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        settings: &WorkersSection,
        store: DbHandle,
        executor: Arc<CheckExecutor>,
        shutdown: CancellationToken,
    ) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        let mut handles = Vec::with_capacity(settings.count + 1);

        for index in 0..settings.count {
            let worker = Worker {
                id: format!("worker-{}-{}", &run_id[..8], index),
                store: store.clone(),
                executor: executor.clone(),
                poll_interval: settings.poll_interval(),
                max_attempts: settings.max_job_attempts.max(1),
                shutdown: shutdown.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        handles.push(tokio::spawn(reap_stale_jobs(
            store,
            settings.stale_after(),
            shutdown.clone(),
        )));

        info!(workers = settings.count, "Worker pool started");
        Self { handles, shutdown }
    }

    /// Number of job-draining workers.
    pub fn size(&self) -> usize {
        self.handles.len().saturating_sub(1)
    }

    /// Cancel every worker and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for the pool to stop after its token is cancelled elsewhere.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

struct Worker {
    id: String,
    store: DbHandle,
    executor: Arc<CheckExecutor>,
    poll_interval: Duration,
    max_attempts: u32,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = %self.id, "Worker started");
        while !self.shutdown.is_cancelled() {
            let worker_id = self.id.clone();
            match self.store.call(move |db| db.claim_next_job(&worker_id)).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.idle().await,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "Failed to claim job");
                    self.idle().await;
                }
            }
        }
        debug!(worker = %self.id, "Worker stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    /// A claimed job always runs to completion; cancellation is only
    /// observed between jobs.
    async fn process(&self, job: JobRecord) {
        debug!(
            worker = %self.id,
            job_id = job.id,
            page_id = job.page_id,
            check_key = %job.check_key,
            attempt = job.attempts,
            "Running check job"
        );

        match self.executor.run_job(job.page_id, &job.check_key).await {
            Ok(_) => {
                let (job_id, page_id) = (job.id, job.page_id);
                let outcome = self
                    .store
                    .call(move |db| {
                        db.complete_job(job_id)?;
                        db.mark_page_tested_if_converged(page_id)
                    })
                    .await;
                match outcome {
                    Ok(true) => debug!(page_id, "Every check for the page has a result"),
                    Ok(false) => {}
                    Err(e) => warn!(job_id, error = %e, "Failed to finish job bookkeeping"),
                }
            }
            Err(e) => self.fail(job, format!("{e:#}")).await,
        }
    }

    async fn fail(&self, job: JobRecord, message: String) {
        let max_attempts = self.max_attempts;
        let job_id = job.id;
        let err_text = message.clone();
        let status = self
            .store
            .call(move |db| db.fail_job(job_id, &err_text, max_attempts))
            .await;

        match status {
            Ok(JobStatus::Queued) => {
                warn!(job_id, attempt = job.attempts, error = %message, "Check job failed, requeued");
            }
            Ok(_) => {
                error!(job_id, error = %message, "Check job gave up");
                self.write_fallback_result(job, message).await;
            }
            Err(e) => error!(job_id, error = %e, "Failed to record job failure"),
        }
    }

    /// Last attempt to leave a row behind for a job that gave up, so the
    /// page can still converge.
    async fn write_fallback_result(&self, job: JobRecord, message: String) {
        let page_id = job.page_id;
        let result = self
            .store
            .call(move |db| {
                let Some(page) = db.get_page(page_id)? else {
                    return Ok(false);
                };
                let category = db
                    .get_check_definition(&job.check_key)?
                    .map(|d| d.category.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let summary = format!("Check could not be executed: {message}");
                db.insert_check_result(&NewCheckResult::not_applicable(
                    &page,
                    &job.check_key,
                    &category,
                    &summary,
                ))?;
                db.mark_page_tested_if_converged(page_id)?;
                Ok(true)
            })
            .await;
        if let Err(e) = result {
            error!(page_id, error = %e, "Failed to write fallback result");
        }
    }
}

async fn reap_stale_jobs(store: DbHandle, stale_after: Duration, shutdown: CancellationToken) {
    let period = (stale_after / 2).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match store.call(move |db| db.requeue_stale_jobs(stale_after)).await {
                    Ok(0) => {}
                    Ok(n) => warn!(jobs = n, "Requeued stale check jobs"),
                    Err(e) => warn!(error = %e, "Failed to requeue stale jobs"),
                }
            }
        }
    }
}
