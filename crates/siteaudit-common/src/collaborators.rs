//! Interfaces of the collaborators the pipeline drives but does not own.
//!
//! Each trait is object-safe so the orchestrator can hold them as
//! `Arc<dyn Trait>` and tests can swap in mocks.

use anyhow::Result;
use async_trait::async_trait;

use crate::artifact::PageArtifact;
use crate::models::{Audit, CategoryScore, ChatRequest, Page, PriorityPage};

/// Discovers URLs under a seed URL. Used once, in the `crawling` phase.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, seed_url: &str) -> Result<Vec<String>>;
}

/// Picks the pages worth collecting and testing in full-crawl mode.
#[async_trait]
pub trait Prioritizer: Send + Sync {
    async fn identify_priority(&self, audit: &Audit, pages: &[Page]) -> Result<Vec<PriorityPage>>;
}

/// Populates a page's artifact. An `Err` is fatal to the audit.
#[async_trait]
pub trait PageCollector: Send + Sync {
    async fn collect(&self, page: &Page) -> Result<PageArtifact>;
}

/// Chat-style AI provider.
///
/// `Ok(None)` means the provider answered with nothing usable and is treated
/// as a soft failure by every caller.
#[async_trait]
pub trait AiInvoker: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<Option<String>>;
}

/// Turns an audit's persisted check results into category scores.
#[async_trait]
pub trait ResultAggregator: Send + Sync {
    async fn synthesize(&self, audit: &Audit) -> Result<Vec<CategoryScore>>;
}
