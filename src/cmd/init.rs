//! `siteaudit init`.

use anyhow::Result;
use siteaudit::config::Config;

use super::open_store;

pub async fn cmd_init(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let definitions = store.call(|db| db.list_check_definitions()).await?;
    let active = definitions.iter().filter(|d| d.active).count();

    println!();
    println!(
        "Database ready at {}",
        console::style(config.database.path.display()).bold()
    );
    println!("{} checks defined ({} active)", definitions.len(), active);
    println!();
    Ok(())
}
