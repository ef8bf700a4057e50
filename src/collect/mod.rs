//! Default HTTP-only collaborators: crawler, prioritizer and page collector.
//!
//! No browser is involved, so screenshots stay empty and metrics only cover
//! the HTML document itself.

mod collector;
mod crawler;
pub mod html;
mod prioritizer;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::config::CrawlSection;

pub use collector::HttpCollector;
pub use crawler::HttpCrawler;
pub use prioritizer::HeuristicPrioritizer;

/// Client shared by the crawler and the collector.
pub fn http_client(settings: &CrawlSection) -> Result<Client> {
    Client::builder()
        .timeout(settings.request_timeout())
        .user_agent(settings.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("Failed to create HTTP client")
}
