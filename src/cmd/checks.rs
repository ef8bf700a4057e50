//! Check catalog listing and editing: `siteaudit checks`.

use anyhow::{Result, bail};
use siteaudit::config::Config;
use siteaudit::store::DbHandle;
use siteaudit_common::CheckCategory;

use crate::ChecksCommands;
use super::open_store;

pub async fn cmd_checks(
    config: &Config,
    command: Option<ChecksCommands>,
    category: Option<&str>,
) -> Result<()> {
    let store = open_store(config)?;

    match command {
        None => {
            let filter = category.map(str::parse::<CheckCategory>).transpose()?;
            let definitions = store.call(|db| db.list_check_definitions()).await?;

            println!();
            println!(
                "{:<6} {:<22} {:<14} {:<8} Name",
                "Order", "Key", "Category", "Active"
            );
            println!(
                "{:<6} {:<22} {:<14} {:<8} ----",
                "-----", "----------------------", "--------------", "------"
            );
            for def in definitions
                .iter()
                .filter(|d| filter.is_none_or(|c| d.category == c))
            {
                let active = if def.active {
                    console::style("yes").green()
                } else {
                    console::style("no").dim()
                };
                println!(
                    "{:<6} {:<22} {:<14} {:<8} {}",
                    def.position,
                    def.key,
                    def.category.as_str(),
                    active,
                    def.name
                );
            }
            println!();
        }
        Some(ChecksCommands::Enable { key }) => set_active(&store, key, true).await?,
        Some(ChecksCommands::Disable { key }) => set_active(&store, key, false).await?,
        Some(ChecksCommands::Instructions { key, text }) => {
            let target = key.clone();
            if !store
                .call(move |db| db.set_check_instructions(&target, &text))
                .await?
            {
                bail!("Unknown check: {key}");
            }
            println!("Instructions updated for {}", console::style(&key).bold());
        }
    }
    Ok(())
}

async fn set_active(store: &DbHandle, key: String, active: bool) -> Result<()> {
    let target = key.clone();
    if !store
        .call(move |db| db.set_check_active(&target, active))
        .await?
    {
        bail!("Unknown check: {key}");
    }
    println!(
        "Check {} {}",
        console::style(&key).bold(),
        if active { "enabled" } else { "disabled" }
    );
    Ok(())
}
