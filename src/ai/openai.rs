use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use siteaudit_common::{AiInvoker, ChatMessage, ChatRequest};
use tracing::{debug, warn};

use crate::config::AiSection;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiInvoker {
    pub fn new(settings: &AiSection) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to create HTTP client")?;
        let api_key = settings.api_key();
        if api_key.is_none() {
            warn!(
                env = %settings.api_key_env,
                "No AI API key set, requests are sent without authorization"
            );
        }
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: settings.max_retries,
        })
    }

    async fn try_request(&self, request: &ChatRequest) -> Result<CompletionResponse> {
        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach AI provider at {}", self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("AI provider error ({status}): {text}"));
        }
        response
            .json::<CompletionResponse>()
            .await
            .context("Failed to decode AI provider response")
    }
}

#[async_trait]
impl AiInvoker for OpenAiInvoker {
    async fn chat(&self, request: ChatRequest) -> Result<Option<String>> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ...
                tokio::time::sleep(Duration::from_secs(1u64 << (attempt - 1).min(5))).await;
            }
            match self.try_request(&request).await {
                Ok(response) => {
                    debug!(model = %request.model, "AI provider answered");
                    return Ok(first_content(response));
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries + 1,
                        error = %e,
                        "AI request failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("AI request failed")))
    }
}

/// Text of the first choice; blank content counts as no answer.
fn first_content(response: CompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("ping")],
            model: "test-model".into(),
            temperature: 0.1,
            max_tokens: 32,
        }
    }

    /// Serve one canned HTTP response and hand back the raw request head.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> Result<(String, tokio::task::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}/v1", listener.local_addr()?);
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&seen).to_string()
        });
        Ok((base_url, handle))
    }

    fn invoker(base_url: String, max_retries: u32) -> OpenAiInvoker {
        OpenAiInvoker {
            client: Client::builder().no_proxy().build().unwrap(),
            base_url,
            api_key: Some("sk-test".into()),
            max_retries,
        }
    }

    #[test]
    fn test_first_content_skips_blank_answers() -> Result<()> {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#)?;
        assert_eq!(first_content(parsed), None);
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#)?;
        assert_eq!(first_content(parsed), None);
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi"}}]}"#)?;
        assert_eq!(first_content(parsed).as_deref(), Some("hi"));
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_posts_to_completions_with_bearer_key() -> Result<()> {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"pong"}}]}"#,
        )
        .await?;

        let reply = invoker(base_url, 0).chat(request()).await?;
        assert_eq!(reply.as_deref(), Some("pong"));

        let head = server.await?.to_lowercase();
        assert!(head.starts_with("post /v1/chat/completions"));
        assert!(head.contains("authorization: bearer sk-test"));
        Ok(())
    }

    #[tokio::test]
    async fn test_http_error_is_an_error() -> Result<()> {
        let (base_url, server) =
            serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await?;

        let err = invoker(base_url, 0).chat(request()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        server.await?;
        Ok(())
    }
}
