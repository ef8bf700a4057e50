use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored string did not match any variant of a status/kind enum.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid {kind}: {value}")]
pub struct InvalidValue {
    pub kind: &'static str,
    pub value: String,
}

impl InvalidValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    SinglePage,
    FullCrawl,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePage => "single_page",
            Self::FullCrawl => "full_crawl",
        }
    }

    /// Phases this mode walks through, in order, excluding `pending`.
    pub fn phases(&self) -> &'static [AuditStatus] {
        match self {
            Self::SinglePage => &[
                AuditStatus::Collecting,
                AuditStatus::Testing,
                AuditStatus::Synthesizing,
                AuditStatus::Complete,
            ],
            Self::FullCrawl => &[
                AuditStatus::Crawling,
                AuditStatus::Prioritizing,
                AuditStatus::Collecting,
                AuditStatus::Testing,
                AuditStatus::Synthesizing,
                AuditStatus::Complete,
            ],
        }
    }
}

impl FromStr for AuditMode {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_page" => Ok(Self::SinglePage),
            "full_crawl" => Ok(Self::FullCrawl),
            _ => Err(InvalidValue::new("audit mode", s)),
        }
    }
}

/// Phase state of an audit.
///
/// Forward-only: a status may only move to a later phase, or to `Failed`
/// from any non-terminal phase. `Complete` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Crawling,
    Prioritizing,
    Collecting,
    Testing,
    Synthesizing,
    Complete,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::Prioritizing => "prioritizing",
            Self::Collecting => "collecting",
            Self::Testing => "testing",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Crawling => 1,
            Self::Prioritizing => 2,
            Self::Collecting => 3,
            Self::Testing => 4,
            Self::Synthesizing => 5,
            Self::Complete => 6,
            Self::Failed => u8::MAX,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn can_advance_to(&self, to: AuditStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Failed => true,
            _ => to.rank() > self.rank(),
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "crawling" => Ok(Self::Crawling),
            "prioritizing" => Ok(Self::Prioritizing),
            "collecting" => Ok(Self::Collecting),
            "testing" => Ok(Self::Testing),
            "synthesizing" => Ok(Self::Synthesizing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(InvalidValue::new("audit status", s)),
        }
    }
}

/// Per-audit AI settings. Unset fields fall back to the process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub id: i64,
    pub url: String,
    pub mode: AuditMode,
    pub status: AuditStatus,
    pub current_phase: Option<String>,
    /// `None` runs every active check; `Some(vec![])` runs none.
    pub selected_checks: Option<Vec<String>>,
    pub skipped_checks: Vec<String>,
    pub ai_config: AiConfig,
    pub summary: Option<String>,
    pub overall_score: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAudit {
    pub url: String,
    pub mode: AuditMode,
    pub selected_checks: Option<Vec<String>>,
    #[serde(default)]
    pub skipped_checks: Vec<String>,
    #[serde(default)]
    pub ai_config: AiConfig,
}

impl NewAudit {
    pub fn new(url: &str, mode: AuditMode) -> Self {
        Self {
            url: url.to_string(),
            mode,
            selected_checks: None,
            skipped_checks: Vec::new(),
            ai_config: AiConfig::default(),
        }
    }

    pub fn with_selected_checks(mut self, keys: Vec<String>) -> Self {
        self.selected_checks = Some(keys);
        self
    }

    pub fn with_skipped_checks(mut self, keys: Vec<String>) -> Self {
        self.skipped_checks = keys;
        self
    }

    pub fn with_ai_config(mut self, ai_config: AiConfig) -> Self {
        self.ai_config = ai_config;
        self
    }
}

// ── Page ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Pending,
    Collecting,
    Complete,
    Failed,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for CollectionStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "collecting" => Ok(Self::Collecting),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(InvalidValue::new("data collection status", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestingStatus {
    Pending,
    Testing,
    Complete,
    Failed,
}

impl TestingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Testing => "testing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for TestingStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "testing" => Ok(Self::Testing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(InvalidValue::new("testing status", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub audit_id: i64,
    pub url: String,
    pub page_type: Option<String>,
    pub priority_score: Option<f64>,
    pub is_priority: bool,
    pub data_collection_status: CollectionStatus,
    pub testing_status: TestingStatus,
    pub created_at: String,
}

/// One entry of the prioritizer's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityPage {
    pub url: String,
    pub page_type: String,
    pub priority_score: f64,
}

// ── Checks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Seo,
    Accessibility,
    Performance,
    Security,
    Content,
    Design,
    Ux,
    Conversion,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 8] = [
        Self::Seo,
        Self::Accessibility,
        Self::Performance,
        Self::Security,
        Self::Content,
        Self::Design,
        Self::Ux,
        Self::Conversion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seo => "seo",
            Self::Accessibility => "accessibility",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Content => "content",
            Self::Design => "design",
            Self::Ux => "ux",
            Self::Conversion => "conversion",
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckCategory {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seo" => Ok(Self::Seo),
            "accessibility" => Ok(Self::Accessibility),
            "performance" => Ok(Self::Performance),
            "security" => Ok(Self::Security),
            "content" => Ok(Self::Content),
            "design" => Ok(Self::Design),
            "ux" => Ok(Self::Ux),
            "conversion" => Ok(Self::Conversion),
            _ => Err(InvalidValue::new("check category", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Warning,
    NotApplicable,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Warning => "warning",
            Self::NotApplicable => "not_applicable",
        }
    }

    /// Score used when a result carries none of its own.
    pub fn default_score(&self) -> Option<f64> {
        match self {
            Self::Passed => Some(100.0),
            Self::Warning => Some(50.0),
            Self::Failed => Some(0.0),
            Self::NotApplicable => None,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "passed" | "pass" => Ok(Self::Passed),
            "failed" | "fail" => Ok(Self::Failed),
            "warning" | "warn" => Ok(Self::Warning),
            "not_applicable" | "n/a" | "na" => Ok(Self::NotApplicable),
            _ => Err(InvalidValue::new("check status", s)),
        }
    }
}

/// A named, orderable, toggleable evaluation unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckDefinition {
    pub key: String,
    pub name: String,
    pub category: CheckCategory,
    pub active: bool,
    pub position: i32,
    /// Free-text guidance, only read by AI-mediated checks.
    pub instructions: String,
    /// Symbolic artifact fields the check wants (see `DataSource`).
    pub data_sources: Vec<String>,
}

/// Prompt/response pair kept on a result for debugging AI-mediated checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiTrace {
    pub prompt: String,
    pub response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub page_id: i64,
    pub audit_id: i64,
    pub check_key: String,
    pub category: String,
    pub status: CheckStatus,
    pub score: Option<f64>,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub ai_trace: Option<AiTrace>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCheckResult {
    pub page_id: i64,
    pub audit_id: i64,
    pub check_key: String,
    pub category: String,
    pub status: CheckStatus,
    pub score: Option<f64>,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub ai_trace: Option<AiTrace>,
}

impl NewCheckResult {
    /// A `not_applicable` outcome carrying only a reason.
    pub fn not_applicable(page: &Page, check_key: &str, category: &str, reason: &str) -> Self {
        Self {
            page_id: page.id,
            audit_id: page.audit_id,
            check_key: check_key.to_string(),
            category: category.to_string(),
            status: CheckStatus::NotApplicable,
            score: None,
            summary: reason.to_string(),
            details: None,
            ai_trace: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
    pub result_count: u32,
}

// ── AI messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}
