//! Regex-based extraction of page structure from raw HTML.
//!
//! Good enough for well-formed marketing pages; there is no DOM and no
//! script execution.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use siteaudit_common::{Headings, ImageInfo, LinkInfo, PageArtifact, PageMetadata, ScriptInfo};
use url::Url;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").unwrap());
static META: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b([^>]*)>").unwrap());
static LINK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\b([^>]*)>").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<html\b([^>]*)>").unwrap());
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap());
static IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b([^>]*)>").unwrap());
static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").unwrap());
static STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static FONT_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)font-family\s*:\s*([^;}<>]+)").unwrap());
static COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#(?:[0-9a-f]{6}|[0-9a-f]{3})\b|rgba?\([^)]*\)|hsla?\([^)]*\)").unwrap()
});

/// Lowercased attribute map of one tag's attribute text.
pub fn attributes(tag_body: &str) -> BTreeMap<String, String> {
    ATTR.captures_iter(tag_body)
        .map(|c| {
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            (c[1].to_ascii_lowercase(), value)
        })
        .collect()
}

/// Strip tags and collapse whitespace.
pub fn inner_text(fragment: &str) -> String {
    let without_tags = TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(decoded.trim(), " ").to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Resolve `href` against `base`, dropping the fragment.
///
/// Non-http(s) targets (`mailto:`, `javascript:`, `tel:`) resolve to `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

pub fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Every `<a href>` on the page, resolved against `base`.
pub fn links(base: &Url, html: &str) -> Vec<LinkInfo> {
    ANCHOR
        .captures_iter(html)
        .filter_map(|c| {
            let attrs = attributes(&c[1]);
            let raw = attrs.get("href")?;
            let (href, internal) = match resolve_link(base, raw) {
                Some(url) => {
                    let internal = same_host(base, &url);
                    (url.to_string(), internal)
                }
                None => (raw.clone(), false),
            };
            let mut text = inner_text(&c[2]);
            if text.is_empty()
                && let Some(label) = attrs.get("aria-label").or_else(|| attrs.get("title"))
            {
                text = label.trim().to_string();
            }
            Some(LinkInfo {
                href,
                text,
                internal,
            })
        })
        .collect()
}

/// Build an artifact from raw HTML. Performance metrics are left for the
/// caller, which owns the timing.
pub fn parse_document(base: &Url, html: &str) -> PageArtifact {
    let without_scripts = SCRIPT.replace_all(html, " ");
    let without_styles = STYLE.replace_all(&without_scripts, " ");
    let visible = COMMENT.replace_all(&without_styles, " ");

    PageArtifact {
        url: base.to_string(),
        html: html.to_string(),
        text: inner_text(&visible),
        title: TITLE
            .captures(html)
            .map(|c| inner_text(&c[1]))
            .filter(|t| !t.is_empty()),
        headings: headings(&visible),
        images: images(base, html),
        fonts: fonts(html),
        colors: colors(&without_scripts),
        scripts: scripts(html),
        links: links(base, &visible),
        performance: Default::default(),
        screenshots: Vec::new(),
        metadata: metadata(base, html),
    }
}

fn headings(html: &str) -> Headings {
    let mut headings = Headings::default();
    for c in HEADING.captures_iter(html) {
        let level = c[1].parse::<u8>().unwrap_or(6);
        let text = inner_text(&c[2]);
        if !text.is_empty() {
            headings.push(level, text);
        }
    }
    headings
}

fn images(base: &Url, html: &str) -> Vec<ImageInfo> {
    IMG.captures_iter(html)
        .filter_map(|c| {
            let attrs = attributes(&c[1]);
            let src = attrs.get("src").or_else(|| attrs.get("data-src"))?;
            let src = base
                .join(src)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| src.clone());
            Some(ImageInfo {
                src,
                alt: attrs.get("alt").cloned(),
                width: attrs.get("width").and_then(|w| w.parse().ok()),
                height: attrs.get("height").and_then(|h| h.parse().ok()),
            })
        })
        .collect()
}

fn scripts(html: &str) -> Vec<ScriptInfo> {
    SCRIPT
        .captures_iter(html)
        .filter_map(|c| {
            let attrs = attributes(&c[1]);
            let kind = attrs.get("type").map(|t| t.to_ascii_lowercase());
            // JSON-LD and templates are data, not code.
            if kind.as_deref().is_some_and(|t| t.contains("json") || t.contains("template")) {
                return None;
            }
            let body = c[2].trim();
            Some(ScriptInfo {
                src: attrs.get("src").cloned(),
                inline: !attrs.contains_key("src"),
                bytes: body.len(),
            })
        })
        .collect()
}

fn fonts(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    FONT_FAMILY
        .captures_iter(html)
        .filter_map(|c| {
            let first = c[1].split(',').next()?.trim();
            // Inline style attributes run on past the closing quote.
            let name = first
                .trim_start_matches(['\'', '"'])
                .split(['\'', '"'])
                .next()?
                .trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .filter(|name| seen.insert(name.to_ascii_lowercase()))
        .collect()
}

fn colors(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    COLOR
        .find_iter(html)
        .map(|m| WHITESPACE.replace_all(&m.as_str().to_ascii_lowercase(), "").to_string())
        .filter(|color| seen.insert(color.clone()))
        .collect()
}

fn metadata(base: &Url, html: &str) -> PageMetadata {
    let mut meta = PageMetadata::default();
    for c in META.captures_iter(html) {
        let attrs = attributes(&c[1]);
        let Some(content) = attrs.get("content").map(|v| v.trim().to_string()) else {
            continue;
        };
        if let Some(property) = attrs.get("property")
            && let Some(key) = property.strip_prefix("og:")
        {
            meta.open_graph.insert(key.to_string(), content);
            continue;
        }
        match attrs.get("name").map(|n| n.to_ascii_lowercase()).as_deref() {
            Some("description") => meta.description = Some(content),
            Some("viewport") => meta.viewport = Some(content),
            Some("robots") => meta.robots = Some(content),
            _ => {}
        }
    }
    for c in LINK_TAG.captures_iter(html) {
        let attrs = attributes(&c[1]);
        if attrs
            .get("rel")
            .is_some_and(|rel| rel.eq_ignore_ascii_case("canonical"))
            && let Some(href) = attrs.get("href")
        {
            meta.canonical = resolve_link(base, href).map(|u| u.to_string());
        }
    }
    meta.lang = HTML_TAG
        .captures(html)
        .and_then(|c| attributes(&c[1]).remove("lang"))
        .filter(|l| !l.is_empty());
    meta
}

/// Stylesheets referenced by `<link rel="stylesheet">`.
pub fn stylesheet_count(html: &str) -> usize {
    LINK_TAG
        .captures_iter(html)
        .filter(|c| {
            attributes(&c[1])
                .get("rel")
                .is_some_and(|rel| rel.eq_ignore_ascii_case("stylesheet"))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!doctype html>
<html lang="en">
<head>
  <title>Acme &amp; Co | Home</title>
  <meta name="description" content="Tools for builders.">
  <meta name="viewport" content="width=device-width">
  <meta property="og:title" content="Acme">
  <link rel="canonical" href="/">
  <link rel="stylesheet" href="/site.css">
  <style>body { font-family: "Inter", sans-serif; color: #333333; } h1 { font-family: Georgia; background: rgb(255, 0, 0); }</style>
  <script type="application/ld+json">{"@type": "Organization"}</script>
  <script src="/app.js"></script>
</head>
<body>
  <!-- hero -->
  <h1>Build faster</h1>
  <h3>Why <em>Acme</em></h3>
  <img src="/hero.png" alt="Hero shot" width="800">
  <img src="logo.svg">
  <p>We make tools.</p>
  <a href="/pricing#plans">Pricing</a>
  <a href="https://other.test/x">Elsewhere</a>
  <a href="mailto:hi@acme.test">Mail</a>
  <a href="/about" aria-label="About us"><img src="/i.png" alt=""></a>
  <script>console.log("#ff00ff")</script>
</body>
</html>"##;

    fn base() -> Url {
        Url::parse("https://acme.test/").unwrap()
    }

    #[test]
    fn test_parse_document_extracts_structure() {
        let artifact = parse_document(&base(), PAGE);

        assert_eq!(artifact.title.as_deref(), Some("Acme & Co | Home"));
        assert_eq!(artifact.headings.h1, vec!["Build faster"]);
        assert_eq!(artifact.headings.h3, vec!["Why Acme"]);
        assert_eq!(artifact.images.len(), 3);
        assert_eq!(artifact.images[0].src, "https://acme.test/hero.png");
        assert_eq!(artifact.images[0].width, Some(800));
        assert!(!artifact.images[1].has_alt());
        assert_eq!(artifact.fonts, vec!["Inter", "Georgia"]);
        assert_eq!(artifact.colors, vec!["#333333", "rgb(255,0,0)"]);
        assert!(artifact.text.contains("We make tools."));
        assert!(!artifact.text.contains("console.log"));
        assert!(!artifact.text.contains("hero"));
    }

    #[test]
    fn test_scripts_skip_json_ld() {
        let artifact = parse_document(&base(), PAGE);
        assert_eq!(artifact.scripts.len(), 2);
        assert_eq!(artifact.scripts[0].src.as_deref(), Some("/app.js"));
        assert!(!artifact.scripts[0].inline);
        assert!(artifact.scripts[1].inline);
        assert!(artifact.scripts[1].bytes > 0);
    }

    #[test]
    fn test_metadata_and_canonical() {
        let meta = parse_document(&base(), PAGE).metadata;
        assert_eq!(meta.description.as_deref(), Some("Tools for builders."));
        assert_eq!(meta.viewport.as_deref(), Some("width=device-width"));
        assert_eq!(meta.canonical.as_deref(), Some("https://acme.test/"));
        assert_eq!(meta.lang.as_deref(), Some("en"));
        assert_eq!(meta.open_graph.get("title").map(String::as_str), Some("Acme"));
        assert_eq!(stylesheet_count(PAGE), 1);
    }

    #[test]
    fn test_links_resolve_and_classify() {
        let links = parse_document(&base(), PAGE).links;
        assert_eq!(links.len(), 4);
        assert_eq!(links[0].href, "https://acme.test/pricing");
        assert!(links[0].internal);
        assert!(!links[1].internal);
        assert_eq!(links[2].href, "mailto:hi@acme.test");
        assert!(!links[2].internal);
        assert_eq!(links[3].text, "About us");
    }

    #[test]
    fn test_resolve_link_rejects_non_http_and_fragments() {
        assert_eq!(resolve_link(&base(), "#top"), None);
        assert_eq!(resolve_link(&base(), "javascript:void(0)"), None);
        assert_eq!(
            resolve_link(&base(), "blog/post?id=1#c").map(|u| u.to_string()),
            Some("https://acme.test/blog/post?id=1".to_string())
        );
    }
}
