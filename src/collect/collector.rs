use std::time::Instant;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use siteaudit_common::{Page, PageArtifact, PageCollector, PerformanceMetrics};
use tracing::debug;
use url::Url;

use super::html;

/// Fetches one page over HTTP and extracts its artifact.
pub struct HttpCollector {
    client: Client,
}

impl HttpCollector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageCollector for HttpCollector {
    async fn collect(&self, page: &Page) -> Result<PageArtifact> {
        let url = Url::parse(&page.url).with_context(|| format!("Invalid URL: {}", page.url))?;

        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;
        let ttfb = started.elapsed();
        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned {status}");
        }
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {url}"))?;
        let load_time = started.elapsed();

        let mut artifact = html::parse_document(&final_url, &body);
        artifact.url = page.url.clone();
        artifact.metadata.status_code = Some(status.as_u16());

        let external_scripts = artifact.scripts.iter().filter(|s| s.src.is_some()).count();
        let requests = 1 + external_scripts + artifact.images.len() + html::stylesheet_count(&body);
        artifact.performance = PerformanceMetrics {
            load_time_ms: Some(load_time.as_millis() as u64),
            time_to_first_byte_ms: Some(ttfb.as_millis() as u64),
            html_bytes: body.len() as u64,
            request_count: Some(requests as u32),
        };

        debug!(
            page_id = page.id,
            url = %page.url,
            bytes = body.len(),
            load_ms = load_time.as_millis() as u64,
            "Page fetched"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use siteaudit_common::{CollectionStatus, TestingStatus};

    use super::*;
    use crate::collect::test_server;

    fn page(url: String) -> Page {
        Page {
            id: 1,
            audit_id: 1,
            url,
            page_type: None,
            priority_score: None,
            is_priority: true,
            data_collection_status: CollectionStatus::Collecting,
            testing_status: TestingStatus::Pending,
            created_at: String::new(),
        }
    }

    fn collector() -> HttpCollector {
        HttpCollector::new(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_collect_builds_artifact_with_metrics() -> Result<()> {
        let base = test_server::serve(vec![(
            "/",
            200,
            r#"<html lang="en"><head><title>Home</title><script src="/a.js"></script></head>
               <body><h1>Hi</h1><img src="/x.png" alt="x"></body></html>"#,
        )])
        .await;

        let url = format!("{base}/");
        let artifact = collector().collect(&page(url.clone())).await?;
        assert_eq!(artifact.url, url);
        assert_eq!(artifact.title.as_deref(), Some("Home"));
        assert_eq!(artifact.headings.h1, vec!["Hi"]);
        assert_eq!(artifact.metadata.status_code, Some(200));
        assert_eq!(artifact.performance.request_count, Some(3));
        assert!(artifact.performance.html_bytes > 0);
        assert!(artifact.performance.load_time_ms.is_some());
        assert!(artifact.screenshots.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_fatal() -> Result<()> {
        let base = test_server::serve(vec![("/down", 503, "maintenance")]).await;

        let err = collector()
            .collect(&page(format!("{base}/down")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        Ok(())
    }
}
