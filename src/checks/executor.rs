//! Runs one check against one page and persists exactly one result.
//!
//! Whatever goes wrong inside a check (missing data, an AI error, an
//! unparseable answer) becomes a `not_applicable` result, because the
//! completion barrier can only see checks that wrote a row. The only error
//! that escapes is a storage failure, which leaves the job eligible for a
//! queue retry.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use siteaudit_common::{
    AiInvoker, AiTrace, Audit, ChatRequest, CheckDefinition, CheckResult, NewCheckResult, Page,
    PageArtifact,
};
use tracing::{debug, info, warn};

use super::context::{DataContext, DataContextResolver};
use super::prompt::{self, build_messages, parse_verdict, unparseable_summary};
use super::registry::{CheckRegistry, PromptTemplate, Strategy};
use crate::config::AiSection;
use crate::errors::StoreError;
use crate::store::DbHandle;

pub struct CheckExecutor {
    store: DbHandle,
    registry: Arc<CheckRegistry>,
    ai: Arc<dyn AiInvoker>,
    ai_settings: AiSection,
}

impl CheckExecutor {
    pub fn new(
        store: DbHandle,
        registry: Arc<CheckRegistry>,
        ai: Arc<dyn AiInvoker>,
        ai_settings: AiSection,
    ) -> Self {
        Self {
            store,
            registry,
            ai,
            ai_settings,
        }
    }

    /// Entry point for a queued job: re-resolve everything from the key.
    ///
    /// A job whose result already exists (a retried or duplicated job)
    /// returns the stored result without running the check again.
    pub async fn run_job(&self, page_id: i64, check_key: &str) -> Result<CheckResult> {
        let key = check_key.to_string();
        let (page, definition, existing) = self
            .store
            .call(move |db| {
                let page = db.get_page(page_id)?.ok_or_else(|| StoreError::NotFound {
                    entity: "Page",
                    id: page_id.to_string(),
                })?;
                let definition = db.get_check_definition(&key)?;
                let existing = db.get_check_result(page_id, &key)?;
                Ok((page, definition, existing))
            })
            .await?;

        if let Some(existing) = existing {
            debug!(page_id, check_key, "Result already present, skipping");
            return Ok(existing);
        }

        match definition {
            Some(definition) => self.execute(&page, &definition).await,
            None => {
                warn!(page_id, check_key, "Job references an unknown check");
                self.persist(NewCheckResult::not_applicable(
                    &page,
                    check_key,
                    "unknown",
                    "unknown check",
                ))
                .await
            }
        }
    }

    /// Run `check` against `page` and persist the outcome.
    pub async fn execute(&self, page: &Page, check: &CheckDefinition) -> Result<CheckResult> {
        let (page_id, audit_id) = (page.id, page.audit_id);
        let (audit, artifact) = self
            .store
            .call(move |db| Ok((db.get_audit(audit_id)?, db.get_artifact(page_id)?)))
            .await?;

        let outcome = self
            .evaluate(page, check, audit.as_ref(), artifact.unwrap_or_default())
            .await;
        info!(
            page_id,
            check_key = %check.key,
            status = %outcome.status,
            "Check finished"
        );
        self.persist(outcome).await
    }

    async fn persist(&self, result: NewCheckResult) -> Result<CheckResult> {
        self.store
            .call(move |db| db.insert_check_result(&result))
            .await
    }

    async fn evaluate(
        &self,
        page: &Page,
        check: &CheckDefinition,
        audit: Option<&Audit>,
        artifact: PageArtifact,
    ) -> NewCheckResult {
        if !check.active {
            return not_applicable(page, check, "check disabled");
        }
        let Some(strategy) = self.registry.strategy_for(&check.key) else {
            warn!(check_key = %check.key, "No execution strategy registered");
            return not_applicable(page, check, "no execution strategy registered for this check");
        };

        let context = DataContextResolver::resolve(&artifact, &check.data_sources);
        if context.is_unavailable() {
            debug!(page_id = page.id, check_key = %check.key, "Required data unavailable");
            return not_applicable(page, check, "required data unavailable");
        }

        match strategy {
            Strategy::Deterministic(rule) => {
                let outcome = rule(&artifact);
                NewCheckResult {
                    page_id: page.id,
                    audit_id: page.audit_id,
                    check_key: check.key.clone(),
                    category: check.category.as_str().to_string(),
                    status: outcome.status,
                    score: outcome.score,
                    summary: outcome.summary,
                    details: outcome.details,
                    ai_trace: None,
                }
            }
            Strategy::AiDriven(template) => {
                self.run_ai_check(page, check, template, &context, audit)
                    .await
            }
        }
    }

    async fn run_ai_check(
        &self,
        page: &Page,
        check: &CheckDefinition,
        template: &PromptTemplate,
        context: &DataContext,
        audit: Option<&Audit>,
    ) -> NewCheckResult {
        let ai_config = audit.map(|a| a.ai_config.clone()).unwrap_or_default();
        let messages = build_messages(check, template, context, &page.url, &ai_config);
        let trace_prompt = prompt::trace_text(&messages);
        let request = ChatRequest {
            messages,
            model: ai_config
                .model
                .clone()
                .unwrap_or_else(|| self.ai_settings.model.clone()),
            temperature: ai_config
                .temperature
                .unwrap_or(self.ai_settings.temperature),
            max_tokens: self.ai_settings.max_tokens,
        };

        let response = match self.ai.chat(request).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(page_id = page.id, check_key = %check.key, "AI provider returned nothing");
                return not_applicable(page, check, "AI provider returned no response")
                    .with_trace(trace_prompt, None);
            }
            Err(e) => {
                warn!(page_id = page.id, check_key = %check.key, error = %e, "AI call failed");
                return not_applicable(page, check, &format!("AI call failed: {e:#}"))
                    .with_trace(trace_prompt, None);
            }
        };

        match parse_verdict(&response) {
            Ok(verdict) => {
                let summary = if verdict.summary.is_empty() {
                    "No summary provided".to_string()
                } else {
                    verdict.summary
                };
                NewCheckResult {
                    page_id: page.id,
                    audit_id: page.audit_id,
                    check_key: check.key.clone(),
                    category: check.category.as_str().to_string(),
                    status: verdict.status,
                    score: verdict.score,
                    summary,
                    details: verdict.details,
                    ai_trace: Some(AiTrace {
                        prompt: trace_prompt,
                        response: Some(response),
                    }),
                }
            }
            Err(e) => {
                warn!(page_id = page.id, check_key = %check.key, error = %e, "Unparseable AI verdict");
                let mut result = not_applicable(page, check, &unparseable_summary(&response));
                result.details = Some(json!({ "parse_error": e.to_string() }));
                result.with_trace(trace_prompt, Some(response))
            }
        }
    }
}

fn not_applicable(page: &Page, check: &CheckDefinition, reason: &str) -> NewCheckResult {
    NewCheckResult::not_applicable(page, &check.key, check.category.as_str(), reason)
}

trait WithTrace {
    fn with_trace(self, prompt: String, response: Option<String>) -> Self;
}

impl WithTrace for NewCheckResult {
    fn with_trace(mut self, prompt: String, response: Option<String>) -> Self {
        self.ai_trace = Some(AiTrace { prompt, response });
        self
    }
}
