//! Deterministic checks: pure functions over a collected artifact.

use serde_json::{Value, json};
use siteaudit_common::{CheckStatus, PageArtifact};

/// What a rule decided. Persisted as-is by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub status: CheckStatus,
    pub score: Option<f64>,
    pub summary: String,
    pub details: Option<Value>,
}

impl RuleOutcome {
    fn new(status: CheckStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            score: status.default_score(),
            summary: summary.into(),
            details: None,
        }
    }

    fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 100.0));
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type RuleFn = fn(&PageArtifact) -> RuleOutcome;

/// Share of images with a non-empty alt attribute.
pub fn image_alt_text(artifact: &PageArtifact) -> RuleOutcome {
    let total = artifact.images.len();
    if total == 0 {
        return RuleOutcome::new(CheckStatus::NotApplicable, "No images on the page");
    }
    let missing: Vec<&str> = artifact
        .images
        .iter()
        .filter(|img| !img.has_alt())
        .map(|img| img.src.as_str())
        .collect();
    let ratio = missing.len() as f64 / total as f64;
    let score = (1.0 - ratio) * 100.0;

    let status = if missing.is_empty() {
        CheckStatus::Passed
    } else if ratio < 0.25 {
        CheckStatus::Warning
    } else {
        CheckStatus::Failed
    };
    let summary = if missing.is_empty() {
        format!("All {total} images have alt text")
    } else {
        format!("{} of {total} images are missing alt text", missing.len())
    };
    RuleOutcome::new(status, summary)
        .with_score(score)
        .with_details(json!({ "missing": missing.iter().take(10).collect::<Vec<_>>() }))
}

/// Exactly one h1, and no skipped levels below it.
pub fn heading_structure(artifact: &PageArtifact) -> RuleOutcome {
    let h1_count = artifact.headings.h1.len();
    // A level is skipped when it is used but the level above it is not.
    let mut skipped: Vec<u8> = Vec::new();
    let mut previous_present = true;
    for (level, items) in artifact.headings.levels() {
        let present = !items.is_empty();
        if present && !previous_present {
            skipped.push(level);
        }
        previous_present = present;
    }
    let details = json!({ "h1_count": h1_count, "skipped_levels": skipped });

    match h1_count {
        0 => RuleOutcome::new(CheckStatus::Failed, "Page has no h1 heading").with_details(details),
        1 if skipped.is_empty() => {
            RuleOutcome::new(CheckStatus::Passed, "Single h1 and a continuous heading outline")
                .with_details(details)
        }
        1 => RuleOutcome::new(
            CheckStatus::Warning,
            format!("Heading levels are skipped at {:?}", skipped),
        )
        .with_details(details),
        n => RuleOutcome::new(CheckStatus::Warning, format!("Page has {n} h1 headings"))
            .with_details(details),
    }
}

pub fn meta_description(artifact: &PageArtifact) -> RuleOutcome {
    let Some(description) = artifact
        .metadata
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    else {
        return RuleOutcome::new(CheckStatus::Failed, "No meta description");
    };
    let len = description.chars().count();
    let details = json!({ "length": len });
    if (50..=160).contains(&len) {
        RuleOutcome::new(CheckStatus::Passed, format!("Meta description is {len} characters"))
            .with_details(details)
    } else {
        RuleOutcome::new(
            CheckStatus::Warning,
            format!("Meta description is {len} characters, expected 50-160"),
        )
        .with_details(details)
    }
}

pub fn page_title(artifact: &PageArtifact) -> RuleOutcome {
    let Some(title) = artifact
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return RuleOutcome::new(CheckStatus::Failed, "Page has no title");
    };
    let len = title.chars().count();
    let outcome = if (10..=60).contains(&len) {
        RuleOutcome::new(CheckStatus::Passed, format!("Title is {len} characters"))
    } else {
        RuleOutcome::new(
            CheckStatus::Warning,
            format!("Title is {len} characters, expected 10-60"),
        )
    };
    outcome.with_details(json!({ "title": title, "length": len }))
}

fn count_band(count: usize, pass_max: usize, warn_max: usize) -> CheckStatus {
    if count <= pass_max {
        CheckStatus::Passed
    } else if count <= warn_max {
        CheckStatus::Warning
    } else {
        CheckStatus::Failed
    }
}

pub fn font_consistency(artifact: &PageArtifact) -> RuleOutcome {
    let count = artifact.fonts.len();
    RuleOutcome::new(
        count_band(count, 3, 5),
        format!("{count} distinct font families in use"),
    )
    .with_details(json!({ "fonts": artifact.fonts }))
}

pub fn color_palette(artifact: &PageArtifact) -> RuleOutcome {
    let count = artifact.colors.len();
    RuleOutcome::new(
        count_band(count, 8, 12),
        format!("{count} distinct colors declared"),
    )
    .with_details(json!({ "count": count }))
}

pub fn script_weight(artifact: &PageArtifact) -> RuleOutcome {
    let external = artifact.scripts.iter().filter(|s| !s.inline).count();
    let inline_bytes: usize = artifact
        .scripts
        .iter()
        .filter(|s| s.inline)
        .map(|s| s.bytes)
        .sum();

    let by_count = count_band(external, 10, 20);
    let by_bytes = count_band(inline_bytes, 50_000, 150_000);
    let status = worst(by_count, by_bytes);
    RuleOutcome::new(
        status,
        format!("{external} external scripts, {inline_bytes} bytes of inline script"),
    )
    .with_details(json!({ "external": external, "inline_bytes": inline_bytes }))
}

pub fn page_load_time(artifact: &PageArtifact) -> RuleOutcome {
    let Some(ms) = artifact.performance.load_time_ms else {
        return RuleOutcome::new(CheckStatus::NotApplicable, "No load timing recorded");
    };
    let status = if ms <= 2_500 {
        CheckStatus::Passed
    } else if ms <= 4_000 {
        CheckStatus::Warning
    } else {
        CheckStatus::Failed
    };
    // Linear from 100 at 1s down to 0 at 6s.
    let score = 100.0 - ((ms as f64 - 1_000.0) / 50.0);
    RuleOutcome::new(status, format!("Page loaded in {ms} ms"))
        .with_score(score)
        .with_details(json!({ "load_time_ms": ms }))
}

/// Plain-http subresources on an https page.
pub fn mixed_content(artifact: &PageArtifact) -> RuleOutcome {
    if !artifact.url.starts_with("https://") {
        return RuleOutcome::new(CheckStatus::NotApplicable, "Page is not served over https");
    }
    let insecure: Vec<&str> = artifact
        .images
        .iter()
        .map(|i| i.src.as_str())
        .chain(artifact.scripts.iter().filter_map(|s| s.src.as_deref()))
        .filter(|src| src.starts_with("http://"))
        .collect();
    if insecure.is_empty() {
        RuleOutcome::new(CheckStatus::Passed, "No insecure subresources")
    } else {
        RuleOutcome::new(
            CheckStatus::Failed,
            format!("{} subresources are loaded over plain http", insecure.len()),
        )
        .with_details(json!({ "insecure": insecure.iter().take(10).collect::<Vec<_>>() }))
    }
}

pub fn empty_links(artifact: &PageArtifact) -> RuleOutcome {
    let empty = artifact
        .links
        .iter()
        .filter(|l| {
            let href = l.href.trim();
            href.is_empty() || href == "#" || href.starts_with("javascript:")
        })
        .count();
    RuleOutcome::new(
        count_band(empty, 0, 3),
        format!("{empty} of {} links have no real destination", artifact.links.len()),
    )
    .with_details(json!({ "empty": empty, "total": artifact.links.len() }))
}

fn worst(a: CheckStatus, b: CheckStatus) -> CheckStatus {
    let rank = |s: CheckStatus| match s {
        CheckStatus::Failed => 2,
        CheckStatus::Warning => 1,
        _ => 0,
    };
    if rank(a) >= rank(b) { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteaudit_common::{ImageInfo, LinkInfo, PerformanceMetrics, ScriptInfo};

    fn image(src: &str, alt: Option<&str>) -> ImageInfo {
        ImageInfo {
            src: src.to_string(),
            alt: alt.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_alt_text_thresholds() {
        let mut a = PageArtifact::default();
        assert_eq!(image_alt_text(&a).status, CheckStatus::NotApplicable);

        a.images = vec![image("/a.png", Some("A")), image("/b.png", Some("B"))];
        let outcome = image_alt_text(&a);
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.score, Some(100.0));

        a.images = (0..10)
            .map(|i| image(&format!("/{i}.png"), (i > 0).then_some("x")))
            .collect();
        assert_eq!(image_alt_text(&a).status, CheckStatus::Warning);

        a.images = vec![image("/a.png", None), image("/b.png", Some("B"))];
        let outcome = image_alt_text(&a);
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.score, Some(50.0));
    }

    #[test]
    fn test_heading_structure() {
        let mut a = PageArtifact::default();
        assert_eq!(heading_structure(&a).status, CheckStatus::Failed);

        a.headings.push(1, "Title".into());
        a.headings.push(2, "Section".into());
        assert_eq!(heading_structure(&a).status, CheckStatus::Passed);

        a.headings.push(4, "Deep".into());
        let outcome = heading_structure(&a);
        assert_eq!(outcome.status, CheckStatus::Warning);
        assert_eq!(outcome.details.unwrap()["skipped_levels"], json!([4]));

        let mut b = PageArtifact::default();
        b.headings.push(1, "One".into());
        b.headings.push(1, "Two".into());
        assert_eq!(heading_structure(&b).status, CheckStatus::Warning);
    }

    #[test]
    fn test_meta_description_length() {
        let mut a = PageArtifact::default();
        assert_eq!(meta_description(&a).status, CheckStatus::Failed);
        a.metadata.description = Some("Too short".into());
        assert_eq!(meta_description(&a).status, CheckStatus::Warning);
        a.metadata.description = Some("x".repeat(120));
        assert_eq!(meta_description(&a).status, CheckStatus::Passed);
    }

    #[test]
    fn test_page_title_length() {
        let mut a = PageArtifact::default();
        assert_eq!(page_title(&a).status, CheckStatus::Failed);
        a.title = Some("Acme Widgets | Home".into());
        assert_eq!(page_title(&a).status, CheckStatus::Passed);
        a.title = Some("x".repeat(80));
        assert_eq!(page_title(&a).status, CheckStatus::Warning);
    }

    #[test]
    fn test_font_and_color_bands() {
        let mut a = PageArtifact::default();
        a.fonts = vec!["Inter".into(), "Georgia".into()];
        assert_eq!(font_consistency(&a).status, CheckStatus::Passed);
        a.fonts = (0..6).map(|i| format!("Font{i}")).collect();
        assert_eq!(font_consistency(&a).status, CheckStatus::Failed);

        a.colors = (0..10).map(|i| format!("#00000{i}")).collect();
        assert_eq!(color_palette(&a).status, CheckStatus::Warning);
    }

    #[test]
    fn test_script_weight_takes_worst_dimension() {
        let mut a = PageArtifact::default();
        a.scripts = vec![ScriptInfo {
            src: None,
            inline: true,
            bytes: 200_000,
        }];
        assert_eq!(script_weight(&a).status, CheckStatus::Failed);

        a.scripts = vec![ScriptInfo {
            src: Some("/app.js".into()),
            inline: false,
            bytes: 0,
        }];
        assert_eq!(script_weight(&a).status, CheckStatus::Passed);
    }

    #[test]
    fn test_page_load_time() {
        let mut a = PageArtifact::default();
        assert_eq!(page_load_time(&a).status, CheckStatus::NotApplicable);
        a.performance = PerformanceMetrics {
            load_time_ms: Some(800),
            ..Default::default()
        };
        let outcome = page_load_time(&a);
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.score, Some(100.0));
        a.performance.load_time_ms = Some(5_000);
        assert_eq!(page_load_time(&a).status, CheckStatus::Failed);
    }

    #[test]
    fn test_mixed_content() {
        let mut a = PageArtifact {
            url: "http://plain.test".into(),
            ..Default::default()
        };
        assert_eq!(mixed_content(&a).status, CheckStatus::NotApplicable);

        a.url = "https://secure.test".into();
        a.images = vec![image("https://cdn.test/a.png", None)];
        assert_eq!(mixed_content(&a).status, CheckStatus::Passed);

        a.scripts.push(ScriptInfo {
            src: Some("http://cdn.test/x.js".into()),
            inline: false,
            bytes: 0,
        });
        assert_eq!(mixed_content(&a).status, CheckStatus::Failed);
    }

    #[test]
    fn test_empty_links() {
        let link = |href: &str| LinkInfo {
            href: href.to_string(),
            text: "x".into(),
            internal: true,
        };
        let mut a = PageArtifact::default();
        a.links = vec![link("/about"), link("/pricing")];
        assert_eq!(empty_links(&a).status, CheckStatus::Passed);
        a.links.push(link("#"));
        assert_eq!(empty_links(&a).status, CheckStatus::Warning);
        a.links.extend([link(""), link("javascript:void(0)"), link("#")]);
        assert_eq!(empty_links(&a).status, CheckStatus::Failed);
    }
}
