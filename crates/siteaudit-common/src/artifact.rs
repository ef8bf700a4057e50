//! Structured data collected for one page.
//!
//! Produced by a `PageCollector`, stored as a JSON blob next to the page and
//! read back (never mutated) by the check pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageArtifact {
    pub url: String,
    /// Raw HTML snapshot.
    #[serde(default)]
    pub html: String,
    /// Visible text with markup removed.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub headings: Headings,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    #[serde(default)]
    pub fonts: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<ScriptInfo>,
    #[serde(default)]
    pub links: Vec<LinkInfo>,
    #[serde(default)]
    pub performance: PerformanceMetrics,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Headings {
    #[serde(default)]
    pub h1: Vec<String>,
    #[serde(default)]
    pub h2: Vec<String>,
    #[serde(default)]
    pub h3: Vec<String>,
    #[serde(default)]
    pub h4: Vec<String>,
    #[serde(default)]
    pub h5: Vec<String>,
    #[serde(default)]
    pub h6: Vec<String>,
}

impl Headings {
    pub fn is_empty(&self) -> bool {
        self.levels().iter().all(|(_, items)| items.is_empty())
    }

    /// `(level, headings)` pairs from h1 to h6.
    pub fn levels(&self) -> [(u8, &Vec<String>); 6] {
        [
            (1, &self.h1),
            (2, &self.h2),
            (3, &self.h3),
            (4, &self.h4),
            (5, &self.h5),
            (6, &self.h6),
        ]
    }

    pub fn push(&mut self, level: u8, text: String) {
        match level {
            1 => self.h1.push(text),
            2 => self.h2.push(text),
            3 => self.h3.push(text),
            4 => self.h4.push(text),
            5 => self.h5.push(text),
            _ => self.h6.push(text),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageInfo {
    pub src: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ImageInfo {
    pub fn has_alt(&self) -> bool {
        self.alt.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScriptInfo {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkInfo {
    pub href: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    #[serde(default)]
    pub load_time_ms: Option<u64>,
    #[serde(default)]
    pub time_to_first_byte_ms: Option<u64>,
    #[serde(default)]
    pub html_bytes: u64,
    #[serde(default)]
    pub request_count: Option<u32>,
}

impl PerformanceMetrics {
    pub fn is_empty(&self) -> bool {
        self.load_time_ms.is_none()
            && self.time_to_first_byte_ms.is_none()
            && self.html_bytes == 0
            && self.request_count.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Screenshot {
    pub viewport: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub canonical: Option<String>,
    #[serde(default)]
    pub viewport: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub robots: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Open Graph properties keyed without the `og:` prefix.
    #[serde(default)]
    pub open_graph: BTreeMap<String, String>,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.canonical.is_none()
            && self.viewport.is_none()
            && self.lang.is_none()
            && self.robots.is_none()
            && self.status_code.is_none()
            && self.open_graph.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_deserializes_with_missing_fields() {
        let artifact: PageArtifact =
            serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(artifact.url, "https://example.com");
        assert!(artifact.headings.is_empty());
        assert!(artifact.metadata.is_empty());
        assert!(artifact.performance.is_empty());
    }

    #[test]
    fn test_headings_push_routes_by_level() {
        let mut headings = Headings::default();
        headings.push(1, "Welcome".into());
        headings.push(3, "Details".into());
        headings.push(9, "Overflow".into());
        assert_eq!(headings.h1, vec!["Welcome"]);
        assert_eq!(headings.h3, vec!["Details"]);
        assert_eq!(headings.h6, vec!["Overflow"]);
        assert!(!headings.is_empty());
    }

    #[test]
    fn test_image_blank_alt_counts_as_missing() {
        let img = ImageInfo {
            src: "/a.png".into(),
            alt: Some("   ".into()),
            ..Default::default()
        };
        assert!(!img.has_alt());
    }
}
