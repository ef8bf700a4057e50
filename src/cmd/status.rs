//! Read-only views: `siteaudit status` and `siteaudit list`.

use anyhow::{Result, bail};
use chrono::{NaiveDateTime, TimeDelta, Utc};
use siteaudit::config::Config;
use siteaudit::store::{AuditProgress, PhaseStatus};
use siteaudit_common::AuditStatus;

use super::open_store;

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub async fn cmd_status(config: &Config, audit_id: i64, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let (progress, phases) = store
        .call(move |db| Ok((db.audit_progress(audit_id)?, db.list_audit_phases(audit_id)?)))
        .await?;
    let Some(progress) = progress else {
        bail!("Audit {audit_id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    print_progress(&progress);
    if !phases.is_empty() {
        println!();
        println!("Phases:");
        for phase in &phases {
            let marker = match phase.status {
                PhaseStatus::Completed => console::style("✓").green(),
                PhaseStatus::Failed => console::style("✗").red(),
                PhaseStatus::Running => console::style("…").yellow(),
            };
            print!("  {marker} {:<13}", phase.phase.as_str());
            if let Some(took) = phase
                .started_at
                .as_deref()
                .and_then(|start| elapsed(start, phase.completed_at.as_deref()))
            {
                print!(" {}", console::style(took).dim());
            }
            if let Some(error) = &phase.error {
                print!("  {}", console::style(error).red());
            }
            println!();
        }
    }
    println!();
    Ok(())
}

/// Wall-clock duration between two SQLite `datetime('now')` stamps, or
/// from `start` until now while the phase is still running.
fn elapsed(start: &str, end: Option<&str>) -> Option<String> {
    let parse = |s: &str| NaiveDateTime::parse_from_str(s, SQLITE_DATETIME).ok();
    let start = parse(start)?;
    let end = match end {
        Some(end) => parse(end)?,
        None => Utc::now().naive_utc(),
    };
    Some(format_duration(end - start))
}

fn format_duration(d: TimeDelta) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn print_progress(progress: &AuditProgress) {
    let status = match progress.status {
        AuditStatus::Complete => console::style(progress.status.as_str()).green(),
        AuditStatus::Failed => console::style(progress.status.as_str()).red(),
        _ => console::style(progress.status.as_str()).yellow(),
    };

    println!();
    println!(
        "Audit {} {} ({})",
        console::style(progress.audit_id).bold(),
        progress.url,
        progress.mode.as_str()
    );
    println!("  Status:  {status}");
    if let Some(phase) = &progress.current_phase {
        println!("  Phase:   {phase}");
    }
    if let Some(score) = progress.overall_score {
        println!("  Score:   {score:.1}");
    }
    if let Some(error) = &progress.error_message {
        println!("  Error:   {}", console::style(error).red());
    }

    let pages: Vec<String> = progress
        .pages_by_testing_status
        .iter()
        .map(|(status, count)| format!("{count} {status}"))
        .collect();
    println!("  Pages:   {} ({})", progress.pages_total, pages.join(", "));
    println!(
        "  Jobs:    {} queued, {} running, {} done, {} failed",
        progress.jobs.queued, progress.jobs.running, progress.jobs.done, progress.jobs.failed
    );

    if !progress.categories.is_empty() {
        println!();
        println!(
            "  {:<14} {:>6} {:>6} {:>8} {:>5}",
            "Category", "Passed", "Failed", "Warnings", "N/A"
        );
        for (category, counts) in &progress.categories {
            println!(
                "  {:<14} {:>6} {:>6} {:>8} {:>5}",
                category, counts.passed, counts.failed, counts.warning, counts.not_applicable
            );
        }
    }
}

pub async fn cmd_list(config: &Config, limit: u32) -> Result<()> {
    let store = open_store(config)?;
    let audits = store.call(move |db| db.list_audits(limit)).await?;

    if audits.is_empty() {
        println!("No audits yet. Start one with `siteaudit run <url>`.");
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<12} {:<12} {:>6}  URL",
        "ID", "Mode", "Status", "Score"
    );
    for audit in &audits {
        let score = audit
            .overall_score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<12} {:<12} {:>6}  {}",
            audit.id,
            audit.mode.as_str(),
            audit.status.as_str(),
            score,
            audit.url
        );
    }
    println!();
    Ok(())
}
