//! Configuration for siteaudit.
//!
//! Settings come from `siteaudit.toml` and are layered
//! file → environment → CLI. Every section is optional and falls back to
//! defaults, so an empty file (or none at all) is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = "siteaudit.db"
//!
//! [crawl]
//! max_pages = 25
//! max_priority_pages = 5
//! request_timeout_secs = 20
//!
//! [barrier]
//! idle_interval_ms = 2000
//! active_interval_ms = 500
//! max_attempts = 120
//! max_wait_secs = 120
//! full_crawl = "dispatch_only"
//!
//! [workers]
//! count = 4
//! poll_interval_ms = 250
//! max_job_attempts = 3
//! stale_after_secs = 300
//!
//! [ai]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! temperature = 0.2
//! max_tokens = 1024
//! api_key_env = "SITEAUDIT_AI_API_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "siteaudit.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("siteaudit.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Upper bound on URLs the crawler may return
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// How many pages the prioritizer flags for collection and testing
    #[serde(default = "default_max_priority_pages")]
    pub max_priority_pages: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_pages() -> usize {
    25
}

fn default_max_priority_pages() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    format!("siteaudit/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_priority_pages: default_max_priority_pages(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// What the testing phase does in full-crawl mode after dispatching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullCrawlBarrier {
    /// Dispatch and move on; workers finish independently.
    #[default]
    DispatchOnly,
    /// Run the completion barrier for every priority page.
    Await,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierSection {
    /// Poll cadence while no result has arrived yet
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Poll cadence once at least one result exists
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock ceiling on a single barrier wait
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default)]
    pub full_crawl: FullCrawlBarrier,
}

fn default_idle_interval_ms() -> u64 {
    2000
}

fn default_active_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    120
}

fn default_max_wait_secs() -> u64 {
    120
}

impl Default for BarrierSection {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            active_interval_ms: default_active_interval_ms(),
            max_attempts: default_max_attempts(),
            max_wait_secs: default_max_wait_secs(),
            full_crawl: FullCrawlBarrier::default(),
        }
    }
}

impl BarrierSection {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(self.active_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Sleep between queue polls when no job is available
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A job that keeps failing is given up after this many claims
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
    /// Claimed jobs older than this are assumed orphaned and requeued
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_job_attempts() -> u32 {
    3
}

fn default_stale_after_secs() -> u64 {
    300
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            max_job_attempts: default_max_job_attempts(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl WorkersSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after a transport or HTTP error
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_temperature() -> f32 {
    0.2
}

fn default_ai_max_tokens() -> u32 {
    1024
}

fn default_ai_timeout_secs() -> u64 {
    60
}

fn default_ai_max_retries() -> u32 {
    2
}

fn default_api_key_env() -> String {
    "SITEAUDIT_AI_API_KEY".to_string()
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            temperature: default_ai_temperature(),
            max_tokens: default_ai_max_tokens(),
            timeout_secs: default_ai_timeout_secs(),
            max_retries: default_ai_max_retries(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl AiSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// The complete siteaudit.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub crawl: CrawlSection,
    #[serde(default)]
    pub barrier: BarrierSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub ai: AiSection,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseFailed)
    }

    /// Load the explicit path if given, else `siteaudit.toml` in `dir` when it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    Self::load(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SITEAUDIT_*` overrides using the given lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SITEAUDIT_DB").filter(|v| !v.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("SITEAUDIT_AI_BASE_URL").filter(|v| !v.is_empty()) {
            self.ai.base_url = url;
        }
        if let Some(model) = lookup("SITEAUDIT_AI_MODEL").filter(|v| !v.is_empty()) {
            self.ai.model = model;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.barrier.active_interval_ms > self.barrier.idle_interval_ms {
            warnings.push(format!(
                "barrier.active_interval_ms ({}) is slower than idle_interval_ms ({}); polling will not accelerate",
                self.barrier.active_interval_ms, self.barrier.idle_interval_ms
            ));
        }
        if self.barrier.max_attempts == 0 {
            warnings.push("barrier.max_attempts is 0; every barrier wait times out immediately".to_string());
        }
        if self.workers.count == 0 {
            warnings.push("workers.count is 0; in-process runs will never execute checks".to_string());
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            warnings.push(format!(
                "ai.temperature {} is outside 0.0..=2.0",
                self.ai.temperature
            ));
        }
        if self.crawl.max_priority_pages > self.crawl.max_pages {
            warnings.push(format!(
                "crawl.max_priority_pages ({}) exceeds crawl.max_pages ({})",
                self.crawl.max_priority_pages, self.crawl.max_pages
            ));
        }

        warnings
    }
}
