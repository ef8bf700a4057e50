//! `siteaudit worker`: drain check jobs queued by any process sharing the
//! database.

use std::sync::Arc;

use anyhow::Result;
use siteaudit::checks::CheckRegistry;
use siteaudit::config::Config;
use siteaudit::queue::WorkerPool;
use tokio_util::sync::CancellationToken;

use super::{build_executor, open_store};

pub async fn cmd_worker(config: &Config, workers: Option<usize>) -> Result<()> {
    let store = open_store(config)?;
    let registry = Arc::new(CheckRegistry::builtin());
    let (executor, _) = build_executor(config, store.clone(), registry)?;

    let mut settings = config.workers.clone();
    if let Some(count) = workers {
        settings.count = count.max(1);
    }

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(&settings, store, executor, shutdown.clone());
    println!(
        "{} workers draining {} (Ctrl-C to stop)",
        console::style(pool.size()).bold(),
        config.database.path.display()
    );

    tokio::signal::ctrl_c().await?;
    println!("Stopping workers...");
    pool.shutdown().await;
    Ok(())
}
