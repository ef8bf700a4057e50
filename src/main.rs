use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use siteaudit::config::Config;
use siteaudit::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "siteaudit")]
#[command(version, about = "Website auditor: crawl, collect and run a battery of checks per page")]
pub struct Cli {
    /// Path to siteaudit.toml (defaults to ./siteaudit.toml when present)
    #[arg(long, global = true, env = "SITEAUDIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path. Overrides the config file and SITEAUDIT_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and seed the check catalog
    Init,
    /// List or edit check definitions
    Checks {
        #[command(subcommand)]
        command: Option<ChecksCommands>,

        /// Only show checks in this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Audit a URL end to end with an in-process worker pool
    Run(RunArgs),
    /// Drain the check queue until interrupted
    Worker {
        /// Number of concurrent workers (overrides workers.count)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Show the progress of an audit
    Status {
        audit_id: i64,

        /// Print the progress as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent audits
    List {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Clone)]
pub enum ChecksCommands {
    /// Activate a check
    Enable { key: String },
    /// Deactivate a check; it is reported as not applicable
    Disable { key: String },
    /// Replace the instructions given to an AI-mediated check
    Instructions { key: String, text: String },
}

#[derive(Args)]
pub struct RunArgs {
    /// URL to audit
    pub url: String,

    /// Crawl the site and audit the priority pages instead of one page
    #[arg(long)]
    pub full_crawl: bool,

    /// Only run these checks (comma-separated keys)
    #[arg(long, value_delimiter = ',', conflicts_with = "no_checks")]
    pub checks: Vec<String>,

    /// Run no checks at all
    #[arg(long)]
    pub no_checks: bool,

    /// Skip these checks (comma-separated keys)
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// AI model for this audit
    #[arg(long)]
    pub model: Option<String>,

    /// AI temperature for this audit
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Extra instructions appended to every AI prompt
    #[arg(long)]
    pub instructions: Option<String>,

    /// Number of in-process workers (overrides workers.count)
    #[arg(short, long)]
    pub workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = Config::resolve(cli.config.as_deref(), &cwd)?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config).await?,
        Commands::Checks { command, category } => {
            cmd::cmd_checks(&config, command.clone(), category.as_deref()).await?
        }
        Commands::Run(args) => cmd::cmd_run(&config, args).await?,
        Commands::Worker { workers } => cmd::cmd_worker(&config, *workers).await?,
        Commands::Status { audit_id, json } => cmd::cmd_status(&config, *audit_id, *json).await?,
        Commands::List { limit } => cmd::cmd_list(&config, *limit).await?,
    }

    Ok(())
}
