use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use siteaudit_common::{
    AiConfig, AiTrace, Audit, AuditMode, AuditStatus, CategoryScore, CheckCategory,
    CheckDefinition, CheckResult, CheckStatus, CollectionStatus, NewAudit, NewCheckResult, Page,
    PageArtifact, PriorityPage, TestingStatus,
};

use super::models::*;
use crate::errors::StoreError;

/// Async-safe handle to the audit database.
///
/// Wraps `AuditDb` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool so SQLite I/O never stalls async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<AuditDb>>,
}

impl DbHandle {
    pub fn new(db: AuditDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&AuditDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct AuditDb {
    conn: Connection,
}

const AUDIT_COLUMNS: &str = "id, url, mode, status, current_phase, selected_checks, skipped_checks, \
     ai_config, summary, overall_score, error_message, created_at, updated_at, completed_at";

const PAGE_COLUMNS: &str = "id, audit_id, url, page_type, priority_score, is_priority, \
     data_collection_status, testing_status, created_at";

const CHECK_COLUMNS: &str = "key, name, category, active, position, instructions, data_sources";

const RESULT_COLUMNS: &str = "id, page_id, audit_id, check_key, category, status, score, summary, \
     details, ai_prompt, ai_response, created_at";

const JOB_COLUMNS: &str = "id, page_id, check_key, status, attempts, worker_id, last_error";

impl AuditDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    ///
    /// File databases run in WAL mode with a busy timeout so a standalone
    /// worker process and an orchestrator can share them.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("Failed to enable WAL")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS audits (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    current_phase TEXT,
                    selected_checks TEXT,
                    skipped_checks TEXT NOT NULL DEFAULT '[]',
                    ai_config TEXT NOT NULL DEFAULT '{}',
                    summary TEXT,
                    overall_score REAL,
                    error_message TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS audit_phases (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    error TEXT,
                    UNIQUE(audit_id, phase)
                );

                CREATE TABLE IF NOT EXISTS pages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
                    url TEXT NOT NULL,
                    page_type TEXT,
                    priority_score REAL,
                    is_priority INTEGER NOT NULL DEFAULT 0,
                    data_collection_status TEXT NOT NULL DEFAULT 'pending',
                    testing_status TEXT NOT NULL DEFAULT 'pending',
                    expected_checks INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(audit_id, url)
                );

                CREATE TABLE IF NOT EXISTS page_artifacts (
                    page_id INTEGER PRIMARY KEY REFERENCES pages(id) ON DELETE CASCADE,
                    data TEXT NOT NULL,
                    collected_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS check_definitions (
                    key TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    category TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    position INTEGER NOT NULL DEFAULT 0,
                    instructions TEXT NOT NULL DEFAULT '',
                    data_sources TEXT NOT NULL DEFAULT '[]'
                );

                CREATE TABLE IF NOT EXISTS check_results (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
                    check_key TEXT NOT NULL,
                    category TEXT NOT NULL,
                    status TEXT NOT NULL,
                    score REAL,
                    summary TEXT NOT NULL DEFAULT '',
                    details TEXT,
                    ai_prompt TEXT,
                    ai_response TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(page_id, check_key)
                );

                CREATE TABLE IF NOT EXISTS category_scores (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
                    category TEXT NOT NULL,
                    score REAL NOT NULL,
                    result_count INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(audit_id, category)
                );

                CREATE TABLE IF NOT EXISTS check_jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                    check_key TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    worker_id TEXT,
                    last_error TEXT,
                    enqueued_at TEXT NOT NULL DEFAULT (datetime('now')),
                    claimed_at TEXT,
                    finished_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_pages_audit ON pages(audit_id);
                CREATE INDEX IF NOT EXISTS idx_check_results_page ON check_results(page_id);
                CREATE INDEX IF NOT EXISTS idx_check_results_audit ON check_results(audit_id);
                CREATE INDEX IF NOT EXISTS idx_check_jobs_status ON check_jobs(status, id);
                CREATE INDEX IF NOT EXISTS idx_check_jobs_page ON check_jobs(page_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ── Audits ───────────────────────────────────────────────────────

    pub fn create_audit(&self, new: &NewAudit) -> Result<Audit> {
        let selected = new
            .selected_checks
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode selected checks")?;
        let skipped =
            serde_json::to_string(&new.skipped_checks).context("Failed to encode skipped checks")?;
        let ai_config =
            serde_json::to_string(&new.ai_config).context("Failed to encode AI config")?;

        self.conn
            .execute(
                "INSERT INTO audits (url, mode, selected_checks, skipped_checks, ai_config)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new.url, new.mode.as_str(), selected, skipped, ai_config],
            )
            .context("Failed to insert audit")?;
        let id = self.conn.last_insert_rowid();
        self.get_audit(id)?.context("Audit not found after insert")
    }

    pub fn get_audit(&self, id: i64) -> Result<Option<Audit>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {AUDIT_COLUMNS} FROM audits WHERE id = ?1"),
                params![id],
                AuditRow::from_row,
            )
            .optional()
            .context("Failed to query audit")?;
        row.map(AuditRow::into_audit).transpose()
    }

    fn require_audit(&self, id: i64) -> Result<Audit> {
        self.get_audit(id)?.ok_or_else(|| {
            StoreError::NotFound {
                entity: "Audit",
                id: id.to_string(),
            }
            .into()
        })
    }

    pub fn list_audits(&self, limit: u32) -> Result<Vec<Audit>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audits ORDER BY id DESC LIMIT ?1"
            ))
            .context("Failed to prepare list_audits")?;
        let rows = stmt
            .query_map(params![limit], AuditRow::from_row)
            .context("Failed to query audits")?;
        let mut audits = Vec::new();
        for row in rows {
            audits.push(row.context("Failed to read audit row")?.into_audit()?);
        }
        Ok(audits)
    }

    /// Move a `pending` audit to its first phase in one statement.
    ///
    /// Returns `false` when the audit is not `pending` anymore, which is how
    /// a second invocation for the same audit is detected.
    pub fn claim_audit(&self, id: i64, first_phase: AuditStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE audits SET status = ?1, current_phase = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = 'pending'",
                params![first_phase.as_str(), id],
            )
            .context("Failed to claim audit")?;
        Ok(changed == 1)
    }

    /// Advance the audit's phase, refusing any move `can_advance_to` rejects.
    pub fn advance_audit_status(&self, id: i64, to: AuditStatus) -> Result<Audit> {
        self.transition(id, to, None)
    }

    /// Move the audit to `failed` and record why.
    pub fn fail_audit(&self, id: i64, message: &str) -> Result<Audit> {
        self.transition(id, AuditStatus::Failed, Some(message))
    }

    fn transition(&self, id: i64, to: AuditStatus, error: Option<&str>) -> Result<Audit> {
        let audit = self.require_audit(id)?;
        if !audit.status.can_advance_to(to) {
            return Err(StoreError::IllegalTransition {
                from: audit.status,
                to,
            }
            .into());
        }
        let changed = self
            .conn
            .execute(
                "UPDATE audits SET
                    status = ?1,
                    current_phase = ?1,
                    error_message = COALESCE(?2, error_message),
                    updated_at = datetime('now'),
                    completed_at = CASE WHEN ?1 IN ('complete', 'failed') THEN datetime('now') ELSE completed_at END
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), error, id, audit.status.as_str()],
            )
            .context("Failed to update audit status")?;
        if changed == 0 {
            // Someone else moved the audit between the read and the write.
            let current = self.require_audit(id)?;
            return Err(StoreError::IllegalTransition {
                from: current.status,
                to,
            }
            .into());
        }
        self.require_audit(id)
    }

    /// Set the free-form sub-state label without touching the status.
    pub fn set_current_phase(&self, id: i64, label: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE audits SET current_phase = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![label, id],
            )
            .context("Failed to set current phase")?;
        Ok(())
    }

    pub fn set_audit_summary(&self, id: i64, summary: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE audits SET summary = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![summary, id],
            )
            .context("Failed to store audit summary")?;
        Ok(())
    }

    pub fn set_overall_score(&self, id: i64, score: Option<f64>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE audits SET overall_score = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![score, id],
            )
            .context("Failed to store overall score")?;
        Ok(())
    }

    // ── Phase history ────────────────────────────────────────────────

    /// Create or update the history entry for one phase of an audit.
    pub fn upsert_audit_phase(
        &self,
        audit_id: i64,
        phase: AuditStatus,
        status: PhaseStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_phases (audit_id, phase, status, started_at, completed_at, error)
                 VALUES (?1, ?2, ?3, datetime('now'),
                         CASE WHEN ?3 IN ('completed', 'failed') THEN datetime('now') END, ?4)
                 ON CONFLICT(audit_id, phase) DO UPDATE SET
                    status = ?3,
                    completed_at = CASE WHEN ?3 IN ('completed', 'failed') THEN datetime('now') ELSE audit_phases.completed_at END,
                    error = ?4",
                params![audit_id, phase.as_str(), status.as_str(), error],
            )
            .context("Failed to upsert audit phase")?;
        Ok(())
    }

    pub fn list_audit_phases(&self, audit_id: i64) -> Result<Vec<AuditPhase>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, audit_id, phase, status, started_at, completed_at, error
                 FROM audit_phases WHERE audit_id = ?1 ORDER BY id ASC",
            )
            .context("Failed to prepare list_audit_phases")?;
        let rows = stmt
            .query_map(params![audit_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .context("Failed to query audit phases")?;

        let mut phases = Vec::new();
        for row in rows {
            let (id, audit_id, phase, status, started_at, completed_at, error) =
                row.context("Failed to read audit phase row")?;
            phases.push(AuditPhase {
                id,
                audit_id,
                phase: parse_column("audit_phases.phase", &phase)?,
                status: PhaseStatus::from_str(&status).map_err(|e| invalid("audit_phases.status", e))?,
                started_at,
                completed_at,
                error,
            });
        }
        Ok(phases)
    }

    // ── Pages ────────────────────────────────────────────────────────

    /// Insert a page, or return the existing one for the same (audit, url).
    pub fn insert_page(&self, audit_id: i64, url: &str) -> Result<Page> {
        self.conn
            .execute(
                "INSERT INTO pages (audit_id, url) VALUES (?1, ?2)
                 ON CONFLICT(audit_id, url) DO NOTHING",
                params![audit_id, url],
            )
            .context("Failed to insert page")?;
        self.page_by_url(audit_id, url)?
            .context("Page not found after insert")
    }

    /// Bulk insert discovered URLs. Returns how many were new.
    pub fn insert_pages(&self, audit_id: i64, urls: &[String]) -> Result<usize> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut inserted = 0;
        for url in urls {
            inserted += tx
                .execute(
                    "INSERT INTO pages (audit_id, url) VALUES (?1, ?2)
                     ON CONFLICT(audit_id, url) DO NOTHING",
                    params![audit_id, url],
                )
                .context("Failed to insert crawled page")?;
        }
        tx.commit().context("Failed to commit crawled pages")?;
        Ok(inserted)
    }

    /// Flag a page as priority, creating it if the crawler never saw it.
    pub fn flag_priority_page(&self, audit_id: i64, priority: &PriorityPage) -> Result<Page> {
        self.conn
            .execute(
                "INSERT INTO pages (audit_id, url, page_type, priority_score, is_priority)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(audit_id, url) DO UPDATE SET
                    page_type = excluded.page_type,
                    priority_score = excluded.priority_score,
                    is_priority = 1",
                params![
                    audit_id,
                    priority.url,
                    priority.page_type,
                    priority.priority_score
                ],
            )
            .context("Failed to flag priority page")?;
        self.page_by_url(audit_id, &priority.url)?
            .context("Page not found after flagging")
    }

    fn page_by_url(&self, audit_id: i64, url: &str) -> Result<Option<Page>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE audit_id = ?1 AND url = ?2"),
                params![audit_id, url],
                PageRow::from_row,
            )
            .optional()
            .context("Failed to query page by url")?;
        row.map(PageRow::into_page).transpose()
    }

    pub fn get_page(&self, id: i64) -> Result<Option<Page>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
                params![id],
                PageRow::from_row,
            )
            .optional()
            .context("Failed to query page")?;
        row.map(PageRow::into_page).transpose()
    }

    pub fn list_pages(&self, audit_id: i64) -> Result<Vec<Page>> {
        self.query_pages(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE audit_id = ?1 ORDER BY id ASC"),
            audit_id,
        )
    }

    /// Priority pages, highest score first.
    pub fn list_priority_pages(&self, audit_id: i64) -> Result<Vec<Page>> {
        self.query_pages(
            &format!(
                "SELECT {PAGE_COLUMNS} FROM pages WHERE audit_id = ?1 AND is_priority = 1
                 ORDER BY COALESCE(priority_score, 0) DESC, id ASC"
            ),
            audit_id,
        )
    }

    fn query_pages(&self, sql: &str, audit_id: i64) -> Result<Vec<Page>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare page query")?;
        let rows = stmt
            .query_map(params![audit_id], PageRow::from_row)
            .context("Failed to query pages")?;
        let mut pages = Vec::new();
        for row in rows {
            pages.push(row.context("Failed to read page row")?.into_page()?);
        }
        Ok(pages)
    }

    pub fn set_collection_status(&self, page_id: i64, status: CollectionStatus) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pages SET data_collection_status = ?1 WHERE id = ?2",
                params![status.as_str(), page_id],
            )
            .context("Failed to set data collection status")?;
        if changed == 0 {
            return Err(page_not_found(page_id));
        }
        Ok(())
    }

    /// Set a page's testing status. `testing` is refused until the page's
    /// data collection is `complete`.
    pub fn set_testing_status(&self, page_id: i64, status: TestingStatus) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pages SET testing_status = ?1
                 WHERE id = ?2 AND (?1 != 'testing' OR data_collection_status = 'complete')",
                params![status.as_str(), page_id],
            )
            .context("Failed to set testing status")?;
        if changed == 0 {
            return match self.get_page(page_id)? {
                Some(_) => Err(StoreError::PageNotCollected { page_id }.into()),
                None => Err(page_not_found(page_id)),
            };
        }
        Ok(())
    }

    /// Move a collected page to `testing` and record how many check results
    /// it must accumulate before it counts as tested. Called before the first
    /// job is submitted.
    pub fn start_testing(&self, page_id: i64, expected: u32) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE pages SET testing_status = 'testing', expected_checks = ?1
                 WHERE id = ?2 AND data_collection_status = 'complete'",
                params![expected, page_id],
            )
            .context("Failed to start testing")?;
        if changed == 0 {
            return match self.get_page(page_id)? {
                Some(_) => Err(StoreError::PageNotCollected { page_id }.into()),
                None => Err(page_not_found(page_id)),
            };
        }
        Ok(())
    }

    /// Mark the page `complete` once it holds as many results as
    /// [`start_testing`](Self::start_testing) recorded. Pages without an
    /// expected count never converge here. Returns whether this call made
    /// the change.
    pub fn mark_page_tested_if_converged(&self, page_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE pages SET testing_status = 'complete'
                 WHERE id = ?1 AND testing_status = 'testing'
                   AND expected_checks IS NOT NULL
                   AND (SELECT COUNT(*) FROM check_results WHERE page_id = ?1)
                       >= expected_checks",
                params![page_id],
            )
            .context("Failed to mark page tested")?;
        Ok(changed == 1)
    }

    // ── Artifacts ────────────────────────────────────────────────────

    pub fn save_artifact(&self, page_id: i64, artifact: &PageArtifact) -> Result<()> {
        let data = serde_json::to_string(artifact).context("Failed to encode page artifact")?;
        self.conn
            .execute(
                "INSERT INTO page_artifacts (page_id, data) VALUES (?1, ?2)
                 ON CONFLICT(page_id) DO UPDATE SET data = excluded.data, collected_at = datetime('now')",
                params![page_id, data],
            )
            .context("Failed to save page artifact")?;
        Ok(())
    }

    pub fn get_artifact(&self, page_id: i64) -> Result<Option<PageArtifact>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM page_artifacts WHERE page_id = ?1",
                params![page_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query page artifact")?;
        data.map(|d| serde_json::from_str(&d).context("Failed to decode page artifact"))
            .transpose()
    }

    // ── Check definitions ────────────────────────────────────────────

    /// Insert catalog entries that do not exist yet. Existing rows keep
    /// whatever the user changed. Returns how many were inserted.
    pub fn seed_check_definitions(&self, definitions: &[CheckDefinition]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut inserted = 0;
        for def in definitions {
            let sources =
                serde_json::to_string(&def.data_sources).context("Failed to encode data sources")?;
            inserted += tx
                .execute(
                    "INSERT INTO check_definitions (key, name, category, active, position, instructions, data_sources)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(key) DO NOTHING",
                    params![
                        def.key,
                        def.name,
                        def.category.as_str(),
                        def.active,
                        def.position,
                        def.instructions,
                        sources
                    ],
                )
                .context("Failed to seed check definition")?;
        }
        tx.commit().context("Failed to commit check definitions")?;
        Ok(inserted)
    }

    /// All definitions in defined order.
    pub fn list_check_definitions(&self) -> Result<Vec<CheckDefinition>> {
        self.query_checks(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_definitions ORDER BY position ASC, key ASC"
        ))
    }

    pub fn list_active_check_definitions(&self) -> Result<Vec<CheckDefinition>> {
        self.query_checks(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_definitions WHERE active = 1
             ORDER BY position ASC, key ASC"
        ))
    }

    fn query_checks(&self, sql: &str) -> Result<Vec<CheckDefinition>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare check query")?;
        let rows = stmt
            .query_map([], CheckRow::from_row)
            .context("Failed to query check definitions")?;
        let mut defs = Vec::new();
        for row in rows {
            defs.push(row.context("Failed to read check row")?.into_definition()?);
        }
        Ok(defs)
    }

    pub fn get_check_definition(&self, key: &str) -> Result<Option<CheckDefinition>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CHECK_COLUMNS} FROM check_definitions WHERE key = ?1"),
                params![key],
                CheckRow::from_row,
            )
            .optional()
            .context("Failed to query check definition")?;
        row.map(CheckRow::into_definition).transpose()
    }

    pub fn set_check_active(&self, key: &str, active: bool) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE check_definitions SET active = ?1 WHERE key = ?2",
                params![active, key],
            )
            .context("Failed to toggle check")?;
        Ok(changed > 0)
    }

    pub fn set_check_instructions(&self, key: &str, instructions: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE check_definitions SET instructions = ?1 WHERE key = ?2",
                params![instructions, key],
            )
            .context("Failed to update check instructions")?;
        Ok(changed > 0)
    }

    // ── Check results ────────────────────────────────────────────────

    /// Persist a result unless one already exists for (page, check key).
    /// Always returns the stored row, which is the first one written.
    pub fn insert_check_result(&self, result: &NewCheckResult) -> Result<CheckResult> {
        let details = result
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode result details")?;
        let (prompt, response) = match &result.ai_trace {
            Some(trace) => (Some(trace.prompt.as_str()), trace.response.as_deref()),
            None => (None, None),
        };

        let inserted = self
            .conn
            .execute(
                "INSERT INTO check_results
                    (page_id, audit_id, check_key, category, status, score, summary, details, ai_prompt, ai_response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(page_id, check_key) DO NOTHING",
                params![
                    result.page_id,
                    result.audit_id,
                    result.check_key,
                    result.category,
                    result.status.as_str(),
                    result.score,
                    result.summary,
                    details,
                    prompt,
                    response
                ],
            )
            .context("Failed to insert check result")?;
        if inserted == 0 {
            tracing::debug!(
                page_id = result.page_id,
                check_key = %result.check_key,
                "Result already recorded, keeping the first one"
            );
        }

        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM check_results WHERE page_id = ?1 AND check_key = ?2"
                ),
                params![result.page_id, result.check_key],
                ResultRow::from_row,
            )
            .context("Check result not found after insert")?;
        row.into_result()
    }

    /// The value the completion barrier polls.
    pub fn count_results_for_page(&self, page_id: i64) -> Result<u32> {
        let count: u32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM check_results WHERE page_id = ?1",
                params![page_id],
                |row| row.get(0),
            )
            .context("Failed to count check results")?;
        Ok(count)
    }

    pub fn get_check_result(&self, page_id: i64, check_key: &str) -> Result<Option<CheckResult>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM check_results WHERE page_id = ?1 AND check_key = ?2"
                ),
                params![page_id, check_key],
                ResultRow::from_row,
            )
            .optional()
            .context("Failed to query check result")?;
        row.map(ResultRow::into_result).transpose()
    }

    pub fn list_results_for_page(&self, page_id: i64) -> Result<Vec<CheckResult>> {
        self.query_results(
            &format!("SELECT {RESULT_COLUMNS} FROM check_results WHERE page_id = ?1 ORDER BY id ASC"),
            page_id,
        )
    }

    pub fn list_results_for_audit(&self, audit_id: i64) -> Result<Vec<CheckResult>> {
        self.query_results(
            &format!("SELECT {RESULT_COLUMNS} FROM check_results WHERE audit_id = ?1 ORDER BY id ASC"),
            audit_id,
        )
    }

    fn query_results(&self, sql: &str, id: i64) -> Result<Vec<CheckResult>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare result query")?;
        let rows = stmt
            .query_map(params![id], ResultRow::from_row)
            .context("Failed to query check results")?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to read result row")?.into_result()?);
        }
        Ok(results)
    }

    // ── Category scores ──────────────────────────────────────────────

    pub fn save_category_scores(&self, audit_id: i64, scores: &[CategoryScore]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for score in scores {
            tx.execute(
                "INSERT INTO category_scores (audit_id, category, score, result_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(audit_id, category) DO UPDATE SET
                    score = excluded.score,
                    result_count = excluded.result_count",
                params![audit_id, score.category, score.score, score.result_count],
            )
            .context("Failed to save category score")?;
        }
        tx.commit().context("Failed to commit category scores")?;
        Ok(())
    }

    pub fn list_category_scores(&self, audit_id: i64) -> Result<Vec<CategoryScore>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT category, score, result_count FROM category_scores
                 WHERE audit_id = ?1 ORDER BY category ASC",
            )
            .context("Failed to prepare list_category_scores")?;
        let rows = stmt
            .query_map(params![audit_id], |row| {
                Ok(CategoryScore {
                    category: row.get(0)?,
                    score: row.get(1)?,
                    result_count: row.get(2)?,
                })
            })
            .context("Failed to query category scores")?;
        let mut scores = Vec::new();
        for row in rows {
            scores.push(row.context("Failed to read category score row")?);
        }
        Ok(scores)
    }

    // ── Job queue ────────────────────────────────────────────────────

    pub fn enqueue_job(&self, page_id: i64, check_key: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO check_jobs (page_id, check_key) VALUES (?1, ?2)",
                params![page_id, check_key],
            )
            .context("Failed to enqueue check job")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Claim the oldest queued job for `worker_id` in a single statement,
    /// so two processes sharing the file never claim the same row.
    pub fn claim_next_job(&self, worker_id: &str) -> Result<Option<JobRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "UPDATE check_jobs SET
                        status = 'running',
                        attempts = attempts + 1,
                        worker_id = ?1,
                        claimed_at = datetime('now')
                     WHERE id = (SELECT id FROM check_jobs WHERE status = 'queued' ORDER BY id ASC LIMIT 1)
                     RETURNING {JOB_COLUMNS}"
                ),
                params![worker_id],
                JobRow::from_row,
            )
            .optional()
            .context("Failed to claim check job")?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn complete_job(&self, job_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE check_jobs SET status = 'done', finished_at = datetime('now') WHERE id = ?1",
                params![job_id],
            )
            .context("Failed to complete check job")?;
        Ok(())
    }

    /// Record a failed attempt. The job goes back to `queued` while it has
    /// attempts left, otherwise it becomes `failed`.
    pub fn fail_job(&self, job_id: i64, error: &str, max_attempts: u32) -> Result<JobStatus> {
        let status: String = self
            .conn
            .query_row(
                "UPDATE check_jobs SET
                    status = CASE WHEN attempts < ?3 THEN 'queued' ELSE 'failed' END,
                    worker_id = NULL,
                    last_error = ?2,
                    finished_at = CASE WHEN attempts < ?3 THEN NULL ELSE datetime('now') END
                 WHERE id = ?1
                 RETURNING status",
                params![job_id, error, max_attempts],
                |row| row.get(0),
            )
            .context("Failed to record job failure")?;
        JobStatus::from_str(&status).map_err(|e| invalid("check_jobs.status", e))
    }

    /// Requeue `running` jobs claimed at least `older_than` ago.
    pub fn requeue_stale_jobs(&self, older_than: Duration) -> Result<usize> {
        let modifier = format!("-{} seconds", older_than.as_secs());
        let changed = self
            .conn
            .execute(
                "UPDATE check_jobs SET status = 'queued', worker_id = NULL
                 WHERE status = 'running' AND claimed_at <= datetime('now', ?1)",
                params![modifier],
            )
            .context("Failed to requeue stale jobs")?;
        Ok(changed)
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM check_jobs WHERE id = ?1"),
                params![job_id],
                JobRow::from_row,
            )
            .optional()
            .context("Failed to query check job")?;
        row.map(JobRow::into_job).transpose()
    }

    /// Distinct checks enqueued for a page.
    pub fn count_jobs_for_page(&self, page_id: i64) -> Result<u32> {
        let count: u32 = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT check_key) FROM check_jobs WHERE page_id = ?1",
                params![page_id],
                |row| row.get(0),
            )
            .context("Failed to count check jobs")?;
        Ok(count)
    }

    // ── Progress read model ──────────────────────────────────────────

    pub fn audit_progress(&self, audit_id: i64) -> Result<Option<AuditProgress>> {
        let Some(audit) = self.get_audit(audit_id)? else {
            return Ok(None);
        };

        let mut pages_by_testing_status = BTreeMap::new();
        let mut pages_total = 0;
        {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT testing_status, COUNT(*) FROM pages WHERE audit_id = ?1
                     GROUP BY testing_status",
                )
                .context("Failed to prepare page counts")?;
            let rows = stmt
                .query_map(params![audit_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
                })
                .context("Failed to query page counts")?;
            for row in rows {
                let (status, count) = row.context("Failed to read page count row")?;
                pages_total += count;
                pages_by_testing_status.insert(status, count);
            }
        }

        let mut categories: BTreeMap<String, CategoryCounts> = BTreeMap::new();
        {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT category, status, COUNT(*) FROM check_results WHERE audit_id = ?1
                     GROUP BY category, status",
                )
                .context("Failed to prepare category counts")?;
            let rows = stmt
                .query_map(params![audit_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                })
                .context("Failed to query category counts")?;
            for row in rows {
                let (category, status, count) = row.context("Failed to read category count row")?;
                let entry = categories.entry(category).or_default();
                match parse_column::<CheckStatus>("check_results.status", &status)? {
                    CheckStatus::Passed => entry.passed += count,
                    CheckStatus::Failed => entry.failed += count,
                    CheckStatus::Warning => entry.warning += count,
                    CheckStatus::NotApplicable => entry.not_applicable += count,
                }
            }
        }

        let mut jobs = JobCounts::default();
        {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT j.status, COUNT(*) FROM check_jobs j
                     JOIN pages p ON p.id = j.page_id
                     WHERE p.audit_id = ?1 GROUP BY j.status",
                )
                .context("Failed to prepare job counts")?;
            let rows = stmt
                .query_map(params![audit_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
                })
                .context("Failed to query job counts")?;
            for row in rows {
                let (status, count) = row.context("Failed to read job count row")?;
                match JobStatus::from_str(&status).map_err(|e| invalid("check_jobs.status", e))? {
                    JobStatus::Queued => jobs.queued = count,
                    JobStatus::Running => jobs.running = count,
                    JobStatus::Done => jobs.done = count,
                    JobStatus::Failed => jobs.failed = count,
                }
            }
        }

        Ok(Some(AuditProgress {
            audit_id: audit.id,
            url: audit.url,
            mode: audit.mode,
            status: audit.status,
            current_phase: audit.current_phase,
            overall_score: audit.overall_score,
            error_message: audit.error_message,
            pages_total,
            pages_by_testing_status,
            categories,
            jobs,
        }))
    }
}

fn invalid(column: &str, message: impl std::fmt::Display) -> anyhow::Error {
    StoreError::InvalidColumn {
        column: column.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn parse_column<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| invalid(column, e))
}

fn page_not_found(page_id: i64) -> anyhow::Error {
    StoreError::NotFound {
        entity: "Page",
        id: page_id.to_string(),
    }
    .into()
}

/// Intermediate row struct for audits; JSON and enum columns are decoded in
/// `into_audit`.
struct AuditRow {
    id: i64,
    url: String,
    mode: String,
    status: String,
    current_phase: Option<String>,
    selected_checks: Option<String>,
    skipped_checks: String,
    ai_config: String,
    summary: Option<String>,
    overall_score: Option<f64>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            mode: row.get(2)?,
            status: row.get(3)?,
            current_phase: row.get(4)?,
            selected_checks: row.get(5)?,
            skipped_checks: row.get(6)?,
            ai_config: row.get(7)?,
            summary: row.get(8)?,
            overall_score: row.get(9)?,
            error_message: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn into_audit(self) -> Result<Audit> {
        let selected_checks = self
            .selected_checks
            .map(|s| serde_json::from_str::<Vec<String>>(&s))
            .transpose()
            .map_err(|e| invalid("audits.selected_checks", e))?;
        let skipped_checks: Vec<String> = serde_json::from_str(&self.skipped_checks)
            .map_err(|e| invalid("audits.skipped_checks", e))?;
        let ai_config: AiConfig =
            serde_json::from_str(&self.ai_config).map_err(|e| invalid("audits.ai_config", e))?;

        Ok(Audit {
            id: self.id,
            url: self.url,
            mode: parse_column::<AuditMode>("audits.mode", &self.mode)?,
            status: parse_column::<AuditStatus>("audits.status", &self.status)?,
            current_phase: self.current_phase,
            selected_checks,
            skipped_checks,
            ai_config,
            summary: self.summary,
            overall_score: self.overall_score,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

struct PageRow {
    id: i64,
    audit_id: i64,
    url: String,
    page_type: Option<String>,
    priority_score: Option<f64>,
    is_priority: bool,
    data_collection_status: String,
    testing_status: String,
    created_at: String,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            audit_id: row.get(1)?,
            url: row.get(2)?,
            page_type: row.get(3)?,
            priority_score: row.get(4)?,
            is_priority: row.get(5)?,
            data_collection_status: row.get(6)?,
            testing_status: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_page(self) -> Result<Page> {
        Ok(Page {
            id: self.id,
            audit_id: self.audit_id,
            url: self.url,
            page_type: self.page_type,
            priority_score: self.priority_score,
            is_priority: self.is_priority,
            data_collection_status: parse_column::<CollectionStatus>(
                "pages.data_collection_status",
                &self.data_collection_status,
            )?,
            testing_status: parse_column::<TestingStatus>(
                "pages.testing_status",
                &self.testing_status,
            )?,
            created_at: self.created_at,
        })
    }
}

struct CheckRow {
    key: String,
    name: String,
    category: String,
    active: bool,
    position: i32,
    instructions: String,
    data_sources: String,
}

impl CheckRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            active: row.get(3)?,
            position: row.get(4)?,
            instructions: row.get(5)?,
            data_sources: row.get(6)?,
        })
    }

    fn into_definition(self) -> Result<CheckDefinition> {
        let data_sources: Vec<String> = serde_json::from_str(&self.data_sources)
            .map_err(|e| invalid("check_definitions.data_sources", e))?;
        Ok(CheckDefinition {
            category: parse_column::<CheckCategory>("check_definitions.category", &self.category)?,
            key: self.key,
            name: self.name,
            active: self.active,
            position: self.position,
            instructions: self.instructions,
            data_sources,
        })
    }
}

struct ResultRow {
    id: i64,
    page_id: i64,
    audit_id: i64,
    check_key: String,
    category: String,
    status: String,
    score: Option<f64>,
    summary: String,
    details: Option<String>,
    ai_prompt: Option<String>,
    ai_response: Option<String>,
    created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            page_id: row.get(1)?,
            audit_id: row.get(2)?,
            check_key: row.get(3)?,
            category: row.get(4)?,
            status: row.get(5)?,
            score: row.get(6)?,
            summary: row.get(7)?,
            details: row.get(8)?,
            ai_prompt: row.get(9)?,
            ai_response: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_result(self) -> Result<CheckResult> {
        let details = self
            .details
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| invalid("check_results.details", e))?;
        let ai_trace = self.ai_prompt.map(|prompt| AiTrace {
            prompt,
            response: self.ai_response,
        });
        Ok(CheckResult {
            id: self.id,
            page_id: self.page_id,
            audit_id: self.audit_id,
            check_key: self.check_key,
            category: self.category,
            status: parse_column::<CheckStatus>("check_results.status", &self.status)?,
            score: self.score,
            summary: self.summary,
            details,
            ai_trace,
            created_at: self.created_at,
        })
    }
}

struct JobRow {
    id: i64,
    page_id: i64,
    check_key: String,
    status: String,
    attempts: u32,
    worker_id: Option<String>,
    last_error: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            page_id: row.get(1)?,
            check_key: row.get(2)?,
            status: row.get(3)?,
            attempts: row.get(4)?,
            worker_id: row.get(5)?,
            last_error: row.get(6)?,
        })
    }

    fn into_job(self) -> Result<JobRecord> {
        Ok(JobRecord {
            id: self.id,
            page_id: self.page_id,
            check_key: self.check_key,
            status: JobStatus::from_str(&self.status).map_err(|e| invalid("check_jobs.status", e))?,
            attempts: self.attempts,
            worker_id: self.worker_id,
            last_error: self.last_error,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
