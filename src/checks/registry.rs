//! Check key → execution strategy table, and the built-in catalog.
//!
//! The registry is immutable once built and is handed to the dispatcher and
//! executor explicitly. Lookups of unknown keys return `None`; callers treat
//! that as "not applicable" rather than an error.

use std::collections::HashMap;

use siteaudit_common::{CheckCategory, CheckDefinition};

use super::context::DataSource;
use super::rules::{self, RuleFn};

/// What an AI-mediated check asks the model to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub focus: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum Strategy {
    Deterministic(RuleFn),
    AiDriven(PromptTemplate),
}

impl Strategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deterministic(_) => "deterministic",
            Self::AiDriven(_) => "ai",
        }
    }
}

struct BuiltinCheck {
    key: &'static str,
    name: &'static str,
    category: CheckCategory,
    sources: &'static [DataSource],
    instructions: &'static str,
    strategy: Strategy,
}

use CheckCategory as C;
use DataSource as D;

const fn rule(f: RuleFn) -> Strategy {
    Strategy::Deterministic(f)
}

const fn ai(focus: &'static str) -> Strategy {
    Strategy::AiDriven(PromptTemplate { focus })
}

const BUILTIN: &[BuiltinCheck] = &[
    BuiltinCheck {
        key: "page_title",
        name: "Page title",
        category: C::Seo,
        sources: &[D::Title],
        instructions: "",
        strategy: rule(rules::page_title),
    },
    BuiltinCheck {
        key: "meta_description",
        name: "Meta description",
        category: C::Seo,
        sources: &[D::Metadata],
        instructions: "",
        strategy: rule(rules::meta_description),
    },
    BuiltinCheck {
        key: "heading_structure",
        name: "Heading structure",
        category: C::Seo,
        sources: &[D::Headings],
        instructions: "",
        strategy: rule(rules::heading_structure),
    },
    BuiltinCheck {
        key: "image_alt_text",
        name: "Image alt text",
        category: C::Accessibility,
        sources: &[D::Images],
        instructions: "",
        strategy: rule(rules::image_alt_text),
    },
    BuiltinCheck {
        key: "accessible_language",
        name: "Accessible language",
        category: C::Accessibility,
        sources: &[D::TextContent],
        instructions: "Flag jargon, undefined acronyms and idioms that make the copy hard \
                       for non-native readers or people using assistive technology.",
        strategy: ai("plain, inclusive language"),
    },
    BuiltinCheck {
        key: "page_load_time",
        name: "Page load time",
        category: C::Performance,
        sources: &[D::Performance],
        instructions: "",
        strategy: rule(rules::page_load_time),
    },
    BuiltinCheck {
        key: "script_weight",
        name: "Script weight",
        category: C::Performance,
        sources: &[D::Scripts],
        instructions: "",
        strategy: rule(rules::script_weight),
    },
    BuiltinCheck {
        key: "mixed_content",
        name: "Mixed content",
        category: C::Security,
        sources: &[D::Images, D::Scripts],
        instructions: "",
        strategy: rule(rules::mixed_content),
    },
    BuiltinCheck {
        key: "content_clarity",
        name: "Content clarity",
        category: C::Content,
        sources: &[D::TextContent, D::Headings],
        instructions: "Judge whether a first-time visitor understands what the page is about \
                       within a few seconds of reading.",
        strategy: ai("clarity of the page's message"),
    },
    BuiltinCheck {
        key: "readability",
        name: "Readability",
        category: C::Content,
        sources: &[D::TextContent],
        instructions: "Consider sentence length, paragraph density and vocabulary. \
                       Aim for copy a general audience reads comfortably.",
        strategy: ai("readability of the body copy"),
    },
    BuiltinCheck {
        key: "font_consistency",
        name: "Font consistency",
        category: C::Design,
        sources: &[D::Fonts],
        instructions: "",
        strategy: rule(rules::font_consistency),
    },
    BuiltinCheck {
        key: "color_palette",
        name: "Color palette",
        category: C::Design,
        sources: &[D::Colors],
        instructions: "",
        strategy: rule(rules::color_palette),
    },
    BuiltinCheck {
        key: "visual_hierarchy",
        name: "Visual hierarchy",
        category: C::Design,
        sources: &[D::Headings, D::Screenshots, D::Fonts, D::Colors],
        instructions: "Assess whether headings, type scale and color guide the eye from the \
                       most to the least important content.",
        strategy: ai("visual hierarchy"),
    },
    BuiltinCheck {
        key: "empty_links",
        name: "Empty links",
        category: C::Ux,
        sources: &[D::Links],
        instructions: "",
        strategy: rule(rules::empty_links),
    },
    BuiltinCheck {
        key: "navigation_clarity",
        name: "Navigation clarity",
        category: C::Ux,
        sources: &[D::Links, D::Headings],
        instructions: "Check that navigation labels are descriptive and that the key \
                       sections of the site are reachable from this page.",
        strategy: ai("navigation labels and structure"),
    },
    BuiltinCheck {
        key: "call_to_action",
        name: "Call to action",
        category: C::Conversion,
        sources: &[D::Links, D::TextContent, D::Screenshots],
        instructions: "Identify the primary call to action. It should be visible, specific \
                       and consistent with the page's purpose.",
        strategy: ai("calls to action"),
    },
    BuiltinCheck {
        key: "trust_signals",
        name: "Trust signals",
        category: C::Conversion,
        sources: &[D::TextContent, D::Links, D::Images],
        instructions: "Look for testimonials, customer logos, certifications, guarantees, \
                       contact details and policy links.",
        strategy: ai("trust signals"),
    },
    BuiltinCheck {
        key: "value_proposition",
        name: "Value proposition",
        category: C::Conversion,
        sources: &[D::Title, D::Headings, D::TextContent, D::Metadata],
        instructions: "State the value proposition you find and judge whether it is specific \
                       and differentiated.",
        strategy: ai("the value proposition"),
    },
];

#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    strategies: HashMap<String, Strategy>,
}

impl CheckRegistry {
    /// A registry with no checks. Tests register their own.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in check.
    pub fn builtin() -> Self {
        let strategies = BUILTIN
            .iter()
            .map(|c| (c.key.to_string(), c.strategy))
            .collect();
        Self { strategies }
    }

    pub fn with(mut self, key: impl Into<String>, strategy: Strategy) -> Self {
        self.strategies.insert(key.into(), strategy);
        self
    }

    pub fn strategy_for(&self, key: &str) -> Option<&Strategy> {
        self.strategies.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.strategies.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Definitions to seed the store with, in catalog order.
    pub fn catalog() -> Vec<CheckDefinition> {
        BUILTIN
            .iter()
            .enumerate()
            .map(|(i, c)| CheckDefinition {
                key: c.key.to_string(),
                name: c.name.to_string(),
                category: c.category,
                active: true,
                position: (i as i32 + 1) * 10,
                instructions: c.instructions.to_string(),
                data_sources: c.sources.iter().map(|s| s.as_str().to_string()).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_unknown_key_has_no_strategy() {
        let registry = CheckRegistry::builtin();
        assert!(registry.strategy_for("does_not_exist").is_none());
        assert!(!registry.contains("does_not_exist"));
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = CheckRegistry::builtin();
        assert_eq!(registry.len(), 18);
        assert!(matches!(
            registry.strategy_for("image_alt_text"),
            Some(Strategy::Deterministic(_))
        ));
        match registry.strategy_for("readability") {
            Some(Strategy::AiDriven(template)) => assert!(template.focus.contains("readability")),
            other => panic!("Expected AI strategy, got {other:?}"),
        }
    }

    #[test]
    fn test_catalog_matches_registry() {
        let registry = CheckRegistry::builtin();
        let catalog = CheckRegistry::catalog();
        let keys: HashSet<&str> = catalog.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys.len(), catalog.len(), "keys must be unique");
        for def in &catalog {
            assert!(registry.contains(&def.key));
            assert!(!def.data_sources.is_empty(), "{} declares no sources", def.key);
            if registry.strategy_for(&def.key).map(Strategy::kind) == Some("ai") {
                assert!(!def.instructions.is_empty(), "{} has no instructions", def.key);
            }
        }
        let positions: Vec<i32> = catalog.iter().map(|d| d.position).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_catalog_covers_every_category() {
        let catalog = CheckRegistry::catalog();
        for category in CheckCategory::ALL {
            assert!(
                catalog.iter().any(|d| d.category == category),
                "no check in {category}"
            );
        }
    }

    #[test]
    fn test_with_overrides_strategy() {
        let registry = CheckRegistry::empty().with(
            "custom",
            Strategy::AiDriven(PromptTemplate { focus: "anything" }),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.strategy_for("custom").map(Strategy::kind), Some("ai"));
    }
}
