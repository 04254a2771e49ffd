use crate::model::{Page, PageType};

const DEFAULT_FULL_TEMPLATE: &str = include_str!("../templates/full.txt");
const DEFAULT_SHORT_TEMPLATE: &str = include_str!("../templates/short.txt");

/// Interpolates page content, page type, full outline, and user topic into
/// one of two templates. Both templates are loaded once at construction;
/// overrides can be supplied (e.g. from configuration) in place of the
/// built-in defaults.
#[derive(Debug, Clone)]
pub struct PromptTemplater {
    full: String,
    short: String,
}

impl PromptTemplater {
    pub fn new(full_override: Option<String>, short_override: Option<String>) -> Self {
        Self {
            full: full_override.unwrap_or_else(|| DEFAULT_FULL_TEMPLATE.to_string()),
            short: short_override.unwrap_or_default(),
        }
    }

    pub fn render(&self, page: &Page, full_outline: &str, user_topic: &str, short_prompt: bool) -> String {
        let template = if short_prompt && !self.short.is_empty() {
            &self.short
        } else {
            &self.full
        };

        interpolate(template, page, full_outline, user_topic)
    }
}

impl Default for PromptTemplater {
    fn default() -> Self {
        Self::new(None, Some(DEFAULT_SHORT_TEMPLATE.to_string()))
    }
}

fn interpolate(template: &str, page: &Page, full_outline: &str, user_topic: &str) -> String {
    template
        .replace("{page_content}", &page.content)
        .replace("{page_type}", page_type_str(page.page_type))
        .replace("{full_outline}", full_outline)
        .replace("{user_topic}", user_topic)
}

fn page_type_str(page_type: PageType) -> &'static str {
    match page_type {
        PageType::Cover => "cover",
        PageType::Content => "content",
        PageType::Ending => "ending",
    }
}
