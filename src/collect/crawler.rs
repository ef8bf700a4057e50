use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use siteaudit_common::Crawler;
use tracing::{debug, info, warn};
use url::Url;

use super::html;

/// Extensions that never lead to another HTML page.
const SKIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".json",
    ".xml", ".zip", ".mp4", ".mp3", ".woff", ".woff2",
];

/// Breadth-first, same-host crawler.
pub struct HttpCrawler {
    client: Client,
    max_pages: usize,
}

impl HttpCrawler {
    pub fn new(client: Client, max_pages: usize) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
        }
    }

    /// HTML body of `url`, or `None` for a non-HTML response.
    async fn fetch(&self, url: &Url) -> Result<Option<String>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned {status}");
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| v.contains("html"));
        if !is_html {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {url}"))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    /// An unreachable seed is an error; any other page that fails to load
    /// is logged and kept in the list.
    async fn crawl(&self, seed_url: &str) -> Result<Vec<String>> {
        let mut seed = Url::parse(seed_url).with_context(|| format!("Invalid URL: {seed_url}"))?;
        seed.set_fragment(None);

        let mut seen: HashSet<String> = HashSet::from([seed.to_string()]);
        let mut discovered = vec![seed.to_string()];
        let mut queue = VecDeque::from([seed.clone()]);

        while let Some(url) = queue.pop_front() {
            let body = match self.fetch(&url).await {
                Ok(Some(body)) => body,
                Ok(None) => continue,
                Err(e) if url == seed => return Err(e),
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping page");
                    continue;
                }
            };

            for link in html::links(&url, &body) {
                if !link.internal || discovered.len() >= self.max_pages {
                    continue;
                }
                let Ok(next) = Url::parse(&link.href) else {
                    continue;
                };
                if !html::same_host(&seed, &next) || is_asset(&next) {
                    continue;
                }
                if seen.insert(next.to_string()) {
                    debug!(url = %next, "Discovered page");
                    discovered.push(next.to_string());
                    queue.push_back(next);
                }
            }
        }

        info!(seed = %seed, pages = discovered.len(), "Crawl complete");
        Ok(discovered)
    }
}

fn is_asset(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
