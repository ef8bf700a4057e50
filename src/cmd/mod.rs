//! CLI command implementations.
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `init`    | `Init`                    |
//! | `checks`  | `Checks`                  |
//! | `run`     | `Run`                     |
//! | `worker`  | `Worker`                  |
//! | `status`  | `Status`, `List`          |

pub mod checks;
pub mod init;
pub mod run;
pub mod status;
pub mod worker;

pub use checks::cmd_checks;
pub use init::cmd_init;
pub use run::cmd_run;
pub use status::{cmd_list, cmd_status};
pub use worker::cmd_worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use siteaudit::ai::OpenAiInvoker;
use siteaudit::checks::{CheckExecutor, CheckRegistry};
use siteaudit::config::Config;
use siteaudit::store::{AuditDb, DbHandle};
use siteaudit_common::AiInvoker;

/// Open the configured database, creating it and seeding the catalog on
/// first use. Existing definitions are never overwritten.
pub fn open_store(config: &Config) -> Result<DbHandle> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = AuditDb::new(path)?;
    let seeded = db.seed_check_definitions(&CheckRegistry::catalog())?;
    if seeded > 0 {
        tracing::debug!(seeded, "Seeded check definitions");
    }
    Ok(DbHandle::new(db))
}

/// Executor wired to the configured AI provider.
pub fn build_executor(
    config: &Config,
    store: DbHandle,
    registry: Arc<CheckRegistry>,
) -> Result<(Arc<CheckExecutor>, Arc<dyn AiInvoker>)> {
    let ai: Arc<dyn AiInvoker> = Arc::new(OpenAiInvoker::new(&config.ai)?);
    let executor = Arc::new(CheckExecutor::new(
        store,
        registry,
        ai.clone(),
        config.ai.clone(),
    ));
    Ok((executor, ai))
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(token: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, shutting down");
            token.cancel();
        }
    })
}
