//! `siteaudit run`: create an audit and drive it to completion in-process.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use siteaudit::checks::CheckRegistry;
use siteaudit::collect::{HeuristicPrioritizer, HttpCollector, HttpCrawler, http_client};
use siteaudit::config::Config;
use siteaudit::errors::OrchestratorError;
use siteaudit::pipeline::{Collaborators, Orchestrator, ScoreAggregator};
use siteaudit::queue::{SqliteQueue, WorkQueue, WorkerPool};
use siteaudit::store::DbHandle;
use siteaudit_common::{AiConfig, Audit, AuditMode, NewAudit};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{build_executor, cancel_on_ctrl_c, open_store};
use crate::RunArgs;

pub async fn cmd_run(config: &Config, args: &RunArgs) -> Result<()> {
    let url = Url::parse(&args.url).with_context(|| format!("Invalid URL: {}", args.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Only http and https URLs can be audited: {url}");
    }

    let store = open_store(config)?;
    let new = new_audit(url.as_str(), args);
    let audit = store.call(move |db| db.create_audit(&new)).await?;
    println!();
    println!(
        "Audit {} created for {} ({})",
        console::style(audit.id).bold(),
        console::style(&audit.url).cyan(),
        audit.mode.as_str()
    );

    let registry = Arc::new(CheckRegistry::builtin());
    let (executor, ai) = build_executor(config, store.clone(), registry.clone())?;

    let mut workers = config.workers.clone();
    if let Some(count) = args.workers {
        workers.count = count.max(1);
    }

    let cancel = CancellationToken::new();
    let signal = cancel_on_ctrl_c(cancel.clone());
    let pool = WorkerPool::spawn(&workers, store.clone(), executor, cancel.child_token());

    let client = http_client(&config.crawl)?;
    let collaborators = Collaborators {
        crawler: Arc::new(HttpCrawler::new(client.clone(), config.crawl.max_pages)),
        prioritizer: Arc::new(HeuristicPrioritizer::new(config.crawl.max_priority_pages)),
        collector: Arc::new(HttpCollector::new(client)),
        aggregator: Arc::new(ScoreAggregator::new(store.clone())),
        ai,
    };
    let queue: Arc<dyn WorkQueue> = Arc::new(SqliteQueue::new(store.clone()));
    let orchestrator = Orchestrator::new(store.clone(), registry, queue, collaborators, config)
        .with_cancellation(cancel.clone());

    let outcome = orchestrator.run(audit.id).await;
    pool.shutdown().await;
    signal.abort();

    match outcome {
        Ok(audit) => {
            print_outcome(&store, &audit).await?;
            Ok(())
        }
        Err(OrchestratorError::Cancelled { id }) => {
            println!("{} audit {id} cancelled", console::style("!").yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn new_audit(url: &str, args: &RunArgs) -> NewAudit {
    let mode = if args.full_crawl {
        AuditMode::FullCrawl
    } else {
        AuditMode::SinglePage
    };
    let mut new = NewAudit::new(url, mode)
        .with_skipped_checks(args.skip.clone())
        .with_ai_config(AiConfig {
            model: args.model.clone(),
            temperature: args.temperature,
            custom_instructions: args.instructions.clone(),
        });
    if args.no_checks {
        new = new.with_selected_checks(Vec::new());
    } else if !args.checks.is_empty() {
        new = new.with_selected_checks(args.checks.clone());
    }
    new
}

async fn print_outcome(store: &DbHandle, audit: &Audit) -> Result<()> {
    let audit_id = audit.id;
    let (scores, progress) = store
        .call(move |db| {
            Ok((
                db.list_category_scores(audit_id)?,
                db.audit_progress(audit_id)?,
            ))
        })
        .await?;

    println!();
    println!(
        "{} audit {} {}",
        console::style("✓").green().bold(),
        audit.id,
        audit.status
    );
    if let Some(phase) = &audit.current_phase {
        println!("  {}", console::style(phase).dim());
    }
    for score in &scores {
        let counts = progress
            .as_ref()
            .and_then(|p| p.categories.get(&score.category))
            .cloned()
            .unwrap_or_default();
        println!(
            "  {:<14} {:>5.1}  ({} passed, {} failed, {} warnings)",
            score.category, score.score, counts.passed, counts.failed, counts.warning
        );
    }
    if let Some(overall) = audit.overall_score {
        println!("  {:<14} {:>5.1}", "overall", overall);
    }
    if let Some(summary) = &audit.summary {
        println!();
        println!("{summary}");
    }
    if let Some(progress) = progress
        && progress.jobs.queued > 0
    {
        println!();
        println!(
            "{} check jobs still queued; run `siteaudit worker` to finish them",
            progress.jobs.queued
        );
    }
    println!();
    Ok(())
}
