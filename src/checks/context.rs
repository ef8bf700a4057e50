//! Extraction of the artifact fields a check asks for.
//!
//! Every source has a fixed truncation limit so the size of an AI prompt is
//! bounded no matter how large the collected page is.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};
use siteaudit_common::PageArtifact;

use crate::util::truncate_with_marker;

pub const HTML_MAX_BYTES: usize = 15_000;
pub const TEXT_MAX_BYTES: usize = 8_000;
pub const MAX_IMAGES: usize = 20;
pub const MAX_LINKS: usize = 50;
pub const MAX_SCRIPTS: usize = 30;
pub const MAX_FONTS: usize = 20;
pub const MAX_COLORS: usize = 30;
pub const MAX_SCREENSHOTS: usize = 3;
pub const MAX_HEADINGS_PER_LEVEL: usize = 20;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

/// Symbolic names a check may list in its data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataSource {
    HtmlContent,
    TextContent,
    Title,
    Headings,
    Images,
    Fonts,
    Colors,
    Scripts,
    Links,
    Performance,
    Screenshots,
    Metadata,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HtmlContent => "html_content",
            Self::TextContent => "text_content",
            Self::Title => "title",
            Self::Headings => "headings",
            Self::Images => "images",
            Self::Fonts => "fonts",
            Self::Colors => "colors",
            Self::Scripts => "scripts",
            Self::Links => "links",
            Self::Performance => "performance",
            Self::Screenshots => "screenshots",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html_content" => Ok(Self::HtmlContent),
            "text_content" => Ok(Self::TextContent),
            "title" => Ok(Self::Title),
            "headings" => Ok(Self::Headings),
            "images" => Ok(Self::Images),
            "fonts" => Ok(Self::Fonts),
            "colors" => Ok(Self::Colors),
            "scripts" => Ok(Self::Scripts),
            "links" => Ok(Self::Links),
            "performance" => Ok(Self::Performance),
            "screenshots" => Ok(Self::Screenshots),
            "metadata" => Ok(Self::Metadata),
            _ => Err(format!("Unknown data source: {}", s)),
        }
    }
}

/// Resolved values keyed by the requested source name. Absent or empty
/// fields, and names that match no source, resolve to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    values: BTreeMap<String, Option<Value>>,
}

impl DataContext {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(Option::as_ref)
    }

    /// True when no requested source produced anything.
    pub fn is_unavailable(&self) -> bool {
        self.values.values().all(Option::is_none)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Render the context as markdown sections for a prompt. Missing
    /// sources are listed so the model knows they were asked for.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.values {
            out.push_str(&format!("### {name}\n"));
            match value {
                Some(Value::String(s)) => out.push_str(s),
                Some(v) => out.push_str(
                    &serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
                ),
                None => out.push_str("(not available)"),
            }
            out.push_str("\n\n");
        }
        out
    }
}

pub struct DataContextResolver;

impl DataContextResolver {
    pub fn resolve<S: AsRef<str>>(artifact: &PageArtifact, names: &[S]) -> DataContext {
        let values = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let value = DataSource::from_str(name)
                    .ok()
                    .and_then(|source| Self::extract(artifact, source));
                (name.to_string(), value)
            })
            .collect();
        DataContext { values }
    }

    fn extract(artifact: &PageArtifact, source: DataSource) -> Option<Value> {
        match source {
            DataSource::HtmlContent => {
                let html = elide_inline_code(&artifact.html);
                let html = html.trim();
                (!html.is_empty()).then(|| Value::String(truncate_with_marker(html, HTML_MAX_BYTES)))
            }
            DataSource::TextContent => {
                let text = artifact.text.trim();
                (!text.is_empty()).then(|| Value::String(truncate_with_marker(text, TEXT_MAX_BYTES)))
            }
            DataSource::Title => artifact
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Value::String(t.to_string())),
            DataSource::Headings => {
                if artifact.headings.is_empty() {
                    return None;
                }
                let mut map = serde_json::Map::new();
                for (level, texts) in artifact.headings.levels() {
                    if !texts.is_empty() {
                        let capped: Vec<&str> = texts
                            .iter()
                            .take(MAX_HEADINGS_PER_LEVEL)
                            .map(String::as_str)
                            .collect();
                        map.insert(format!("h{level}"), json!(capped));
                    }
                }
                Some(Value::Object(map))
            }
            DataSource::Images => capped_list(&artifact.images, MAX_IMAGES),
            DataSource::Fonts => capped_list(&artifact.fonts, MAX_FONTS),
            DataSource::Colors => capped_list(&artifact.colors, MAX_COLORS),
            DataSource::Scripts => capped_list(&artifact.scripts, MAX_SCRIPTS),
            DataSource::Links => capped_list(&artifact.links, MAX_LINKS),
            DataSource::Screenshots => capped_list(&artifact.screenshots, MAX_SCREENSHOTS),
            DataSource::Performance => (!artifact.performance.is_empty())
                .then(|| serde_json::to_value(&artifact.performance).ok())
                .flatten(),
            DataSource::Metadata => (!artifact.metadata.is_empty())
                .then(|| serde_json::to_value(&artifact.metadata).ok())
                .flatten(),
        }
    }
}

fn capped_list<T: serde::Serialize>(items: &[T], max: usize) -> Option<Value> {
    if items.is_empty() {
        return None;
    }
    serde_json::to_value(&items[..items.len().min(max)]).ok()
}

/// Replace inline `<script>`/`<style>` bodies and comments with short
/// placeholders.
pub fn elide_inline_code(html: &str) -> String {
    let html = SCRIPT_BLOCK.replace_all(html, "<script>…</script>");
    let html = STYLE_BLOCK.replace_all(&html, "<style>…</style>");
    HTML_COMMENT.replace_all(&html, "").into_owned()
}
