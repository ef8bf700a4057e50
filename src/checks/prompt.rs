//! Prompt construction and verdict parsing for AI-mediated checks.

use serde::Deserialize;
use serde_json::Value;
use siteaudit_common::{AiConfig, ChatMessage, CheckDefinition, CheckStatus};
use thiserror::Error;

use super::context::DataContext;
use super::registry::PromptTemplate;
use crate::util::{extract_json_object, truncate_with_marker};

/// Upper bound on the user message, on top of the per-source limits.
pub const MAX_PROMPT_BYTES: usize = 40_000;

/// How much of an unparseable response is kept as the result summary.
pub const RAW_RESPONSE_SUMMARY_BYTES: usize = 500;

const SYSTEM_PROMPT: &str = "You are an experienced website auditor. You evaluate one aspect \
of one web page at a time using only the data provided. Respond with a single JSON object and \
nothing else:\n\
{\"status\": \"passed\" | \"failed\" | \"warning\" | \"not_applicable\", \
\"summary\": \"one or two sentences\", \
\"score\": 0-100, \
\"details\": {\"issues\": [\"...\"], \"recommendations\": [\"...\"]}}";

pub fn build_messages(
    definition: &CheckDefinition,
    template: &PromptTemplate,
    context: &DataContext,
    page_url: &str,
    ai_config: &AiConfig,
) -> Vec<ChatMessage> {
    let mut user = format!(
        "Check: {} ({})\nCategory: {}\nPage: {}\nFocus: {}\n",
        definition.name, definition.key, definition.category, page_url, template.focus
    );
    if !definition.instructions.trim().is_empty() {
        user.push_str(&format!("\nInstructions:\n{}\n", definition.instructions.trim()));
    }
    if let Some(custom) = ai_config
        .custom_instructions
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        user.push_str(&format!("\nAdditional instructions from the site owner:\n{custom}\n"));
    }
    user.push_str("\nPage data:\n\n");
    user.push_str(&context.format_for_prompt());

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(truncate_with_marker(&user, MAX_PROMPT_BYTES)),
    ]
}

/// Flatten messages into the text kept on the result's AI trace.
pub fn trace_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]\n{}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiVerdict {
    pub status: CheckStatus,
    pub summary: String,
    pub score: Option<f64>,
    pub details: Option<Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum VerdictError {
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response JSON is malformed: {0}")]
    Malformed(String),
    #[error("response has an unrecognised status: {0}")]
    BadStatus(String),
}

#[derive(Deserialize)]
struct RawVerdict {
    status: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    details: Option<Value>,
}

/// Parse the model's answer. The JSON object may be wrapped in prose or a
/// code fence; anything else is an error.
pub fn parse_verdict(response: &str) -> Result<AiVerdict, VerdictError> {
    let json = extract_json_object(response).ok_or(VerdictError::NoJson)?;
    let raw: RawVerdict =
        serde_json::from_str(&json).map_err(|e| VerdictError::Malformed(e.to_string()))?;
    let status = raw
        .status
        .parse::<CheckStatus>()
        .map_err(|_| VerdictError::BadStatus(raw.status.clone()))?;
    let score = match status {
        CheckStatus::NotApplicable => None,
        _ => raw.score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 100.0)),
    };
    Ok(AiVerdict {
        status,
        summary: raw.summary.trim().to_string(),
        score,
        details: raw.details.filter(|d| !d.is_null()),
    })
}

/// Summary used when a response could not be parsed.
pub fn unparseable_summary(response: &str) -> String {
    format!(
        "Unparseable AI response: {}",
        truncate_with_marker(response.trim(), RAW_RESPONSE_SUMMARY_BYTES)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::context::DataContextResolver;
    use siteaudit_common::{CheckCategory, PageArtifact};

    fn definition() -> CheckDefinition {
        CheckDefinition {
            key: "readability".into(),
            name: "Readability".into(),
            category: CheckCategory::Content,
            active: true,
            position: 1,
            instructions: "Short sentences are good.".into(),
            data_sources: vec!["text_content".into()],
        }
    }

    #[test]
    fn test_build_messages_embeds_context_and_instructions() {
        let artifact = PageArtifact {
            text: "We sell widgets.".into(),
            ..Default::default()
        };
        let context = DataContextResolver::resolve(&artifact, &["text_content"]);
        let config = AiConfig {
            custom_instructions: Some("Audience is engineers".into()),
            ..Default::default()
        };
        let messages = build_messages(
            &definition(),
            &PromptTemplate { focus: "readability" },
            &context,
            "https://example.com",
            &config,
        );
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("Short sentences are good."));
        assert!(user.contains("Audience is engineers"));
        assert!(user.contains("We sell widgets."));
        assert!(user.contains("https://example.com"));
        assert!(trace_text(&messages).starts_with("[system]"));
    }

    #[test]
    fn test_prompt_is_bounded() {
        let mut def = definition();
        def.instructions = "x".repeat(MAX_PROMPT_BYTES * 2);
        let messages = build_messages(
            &def,
            &PromptTemplate { focus: "f" },
            &DataContext::default(),
            "https://example.com",
            &AiConfig::default(),
        );
        assert!(messages[1].content.len() <= MAX_PROMPT_BYTES + "… [truncated]".len());
    }

    #[test]
    fn test_parse_verdict_from_fenced_json() {
        let response = "Sure!\n```json\n{\"status\": \"Warning\", \"summary\": \" Dense copy \", \"score\": 140}\n```";
        let verdict = parse_verdict(response).unwrap();
        assert_eq!(verdict.status, CheckStatus::Warning);
        assert_eq!(verdict.summary, "Dense copy");
        assert_eq!(verdict.score, Some(100.0));
        assert_eq!(verdict.details, None);
    }

    #[test]
    fn test_parse_verdict_errors() {
        assert_eq!(parse_verdict("I think it is fine"), Err(VerdictError::NoJson));
        assert!(matches!(
            parse_verdict("{\"summary\": \"no status\"}"),
            Err(VerdictError::Malformed(_))
        ));
        assert_eq!(
            parse_verdict("{\"status\": \"excellent\"}"),
            Err(VerdictError::BadStatus("excellent".into()))
        );
    }

    #[test]
    fn test_not_applicable_verdict_drops_score() {
        let verdict = parse_verdict("{\"status\": \"n/a\", \"score\": 50}").unwrap();
        assert_eq!(verdict.status, CheckStatus::NotApplicable);
        assert_eq!(verdict.score, None);
    }

    #[test]
    fn test_unparseable_summary_truncates_raw_response() {
        let raw = "garbage ".repeat(200);
        let summary = unparseable_summary(&raw);
        assert!(summary.starts_with("Unparseable AI response: garbage"));
        assert!(summary.ends_with("[truncated]"));
        assert!(summary.len() < 600);
    }
}
