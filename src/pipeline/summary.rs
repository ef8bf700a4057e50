//! AI-written executive summary for single-page audits.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use siteaudit_common::{
    AiInvoker, Audit, CategoryScore, ChatMessage, ChatRequest, CheckResult, CheckStatus,
};

use crate::config::AiSection;
use crate::util::truncate_str;

/// Most findings quoted in the prompt.
pub const MAX_FINDINGS: usize = 15;

const FINDING_SUMMARY_BYTES: usize = 300;

const SYSTEM_PROMPT: &str = "You write short executive summaries of website audits for a \
non-technical site owner. Use plain prose, at most three paragraphs, and lead with the most \
important problems. Do not invent findings.";

pub struct ExecutiveSummary {
    ai: Arc<dyn AiInvoker>,
    settings: AiSection,
}

impl ExecutiveSummary {
    pub fn new(ai: Arc<dyn AiInvoker>, settings: AiSection) -> Self {
        Self { ai, settings }
    }

    /// `Ok(None)` when the provider had nothing to say.
    pub async fn generate(
        &self,
        audit: &Audit,
        scores: &[CategoryScore],
        results: &[CheckResult],
    ) -> Result<Option<String>> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(audit, scores, results)),
            ],
            model: audit
                .ai_config
                .model
                .clone()
                .unwrap_or_else(|| self.settings.model.clone()),
            temperature: audit
                .ai_config
                .temperature
                .unwrap_or(self.settings.temperature),
            max_tokens: self.settings.max_tokens,
        };
        let reply = self.ai.chat(request).await?;
        Ok(reply
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }
}

pub fn build_prompt(audit: &Audit, scores: &[CategoryScore], results: &[CheckResult]) -> String {
    let mut prompt = format!("Audit of {}\n", audit.url);
    match super::aggregator::overall_score(scores) {
        Some(overall) => {
            let _ = writeln!(prompt, "Overall score: {overall:.1}/100");
        }
        None => prompt.push_str("Overall score: not available\n"),
    }

    if !scores.is_empty() {
        prompt.push_str("\nCategory scores:\n");
        for score in scores {
            let _ = writeln!(
                prompt,
                "- {}: {:.1} ({} checks)",
                score.category, score.score, score.result_count
            );
        }
    }

    let findings = top_findings(results);
    if findings.is_empty() {
        prompt.push_str("\nNo failed checks or warnings.\n");
    } else {
        prompt.push_str("\nFindings:\n");
        for result in findings {
            let _ = writeln!(
                prompt,
                "- [{}] {} ({}): {}",
                result.status,
                result.check_key,
                result.category,
                truncate_str(&result.summary, FINDING_SUMMARY_BYTES)
            );
        }
    }

    if let Some(custom) = audit.ai_config.custom_instructions.as_deref() {
        let _ = write!(prompt, "\nAdditional instructions:\n{custom}\n");
    }
    prompt
}

/// Failures first, then warnings, capped at [`MAX_FINDINGS`].
fn top_findings(results: &[CheckResult]) -> Vec<&CheckResult> {
    let failed = results.iter().filter(|r| r.status == CheckStatus::Failed);
    let warnings = results.iter().filter(|r| r.status == CheckStatus::Warning);
    failed.chain(warnings).take(MAX_FINDINGS).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use siteaudit_common::{AiConfig, AuditMode, AuditStatus};

    use super::*;

    struct CapturingAi {
        reply: Option<String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl AiInvoker for CapturingAi {
        async fn chat(&self, request: ChatRequest) -> Result<Option<String>> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    fn audit() -> Audit {
        Audit {
            id: 1,
            url: "https://a.test".into(),
            mode: AuditMode::SinglePage,
            status: AuditStatus::Synthesizing,
            current_phase: None,
            selected_checks: None,
            skipped_checks: vec![],
            ai_config: AiConfig {
                model: Some("summary-model".into()),
                ..Default::default()
            },
            summary: None,
            overall_score: None,
            error_message: None,
            created_at: String::new(),
            updated_at: String::new(),
            completed_at: None,
        }
    }

    fn result(key: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            id: 0,
            page_id: 1,
            audit_id: 1,
            check_key: key.into(),
            category: "seo".into(),
            status,
            score: None,
            summary: format!("{key} summary"),
            details: None,
            ai_trace: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_findings_put_failures_first_and_cap_the_list() {
        let mut results: Vec<CheckResult> = (0..20)
            .map(|i| result(&format!("warn_{i}"), CheckStatus::Warning))
            .collect();
        results.push(result("broken", CheckStatus::Failed));
        results.push(result("fine", CheckStatus::Passed));

        let findings = top_findings(&results);
        assert_eq!(findings.len(), MAX_FINDINGS);
        assert_eq!(findings[0].check_key, "broken");
        assert!(findings.iter().all(|r| r.status != CheckStatus::Passed));
    }

    #[test]
    fn test_prompt_lists_scores_and_findings() {
        let scores = vec![CategoryScore {
            category: "seo".into(),
            score: 40.0,
            result_count: 2,
        }];
        let results = vec![
            result("meta_description", CheckStatus::Failed),
            result("page_title", CheckStatus::Passed),
        ];
        let prompt = build_prompt(&audit(), &scores, &results);
        assert!(prompt.contains("Overall score: 40.0/100"));
        assert!(prompt.contains("- seo: 40.0 (2 checks)"));
        assert!(prompt.contains("[failed] meta_description"));
        assert!(!prompt.contains("page_title"));
    }

    #[tokio::test]
    async fn test_generate_uses_audit_model_and_trims_reply() -> Result<()> {
        let ai = Arc::new(CapturingAi {
            reply: Some("  Fix the meta description.  \n".into()),
            seen: Mutex::new(vec![]),
        });
        let summary = ExecutiveSummary::new(ai.clone(), AiSection::default());

        let text = summary.generate(&audit(), &[], &[]).await?;
        assert_eq!(text.as_deref(), Some("Fix the meta description."));
        assert_eq!(ai.seen.lock().unwrap()[0].model, "summary-model");
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_reply_is_none() -> Result<()> {
        let ai = Arc::new(CapturingAi {
            reply: Some("   ".into()),
            seen: Mutex::new(vec![]),
        });
        let summary = ExecutiveSummary::new(ai, AiSection::default());
        assert_eq!(summary.generate(&audit(), &[], &[]).await?, None);
        Ok(())
    }
}
