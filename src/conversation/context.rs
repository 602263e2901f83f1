//! Prompt context assembly
//!
//! Combines fixed assistant instructions, a bounded snapshot of the site's
//! pages/posts/products and the rolling history into the text handed to the
//! completion capability.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::history::{ConversationHistory, ConversationTurn};
use crate::Result;

/// Default per-entry character budget
pub const DEFAULT_CONTENT_BUDGET: usize = 500;

/// Instructions prepended to every prompt
pub const SYSTEM_INSTRUCTIONS: &str = "\
You are the voice assistant for this website. Keep replies brief and \
conversational: they will be spoken aloud.
When the visitor wants to go somewhere, prefer the site's Pages, Posts and \
Products over the text of the current page.
To send the visitor to a page, answer with JSON: \
{\"response\": \"<what to say>\", \"redirect_url\": \"<url>\"}. \
Otherwise answer with plain text.";

/// One page, post or product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Snapshot of the site the assistant can talk about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteContent {
    #[serde(default)]
    pub pages: Vec<SiteEntry>,
    #[serde(default)]
    pub posts: Vec<SiteEntry>,
    #[serde(default)]
    pub products: Vec<SiteEntry>,
    /// The page the visitor is currently on
    #[serde(default)]
    pub current_page: Option<SiteEntry>,
}

impl SiteContent {
    /// Load a snapshot from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let site: Self = serde_json::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            pages = site.pages.len(),
            posts = site.posts.len(),
            products = site.products.len(),
            "loaded site content"
        );
        Ok(site)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
            && self.posts.is_empty()
            && self.products.is_empty()
            && self.current_page.is_none()
    }
}

/// Assembled prompt, ready to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    /// Fixed assistant instructions
    pub system: String,
    /// Truncated site catalogue
    pub site_context: String,
    /// Text of the page the visitor is on
    pub current_page: String,
    /// Retained turns, oldest first; the last one is the pending user turn
    pub history: Vec<ConversationTurn>,
}

impl PromptContext {
    /// Render as a single prompt string
    #[must_use]
    pub fn render(&self) -> String {
        let mut parts = vec![format!("<instructions>\n{}\n</instructions>", self.system)];

        if !self.site_context.is_empty() {
            parts.push(format!("<site-content>\n{}\n</site-content>", self.site_context));
        }

        if !self.current_page.is_empty() {
            parts.push(format!("<current-page>\n{}\n</current-page>", self.current_page));
        }

        if !self.history.is_empty() {
            let turns: Vec<String> = self
                .history
                .iter()
                .map(|t| format!("<{role}>\n{}\n</{role}>", t.content(), role = t.role()))
                .collect();
            parts.push(format!(
                "<conversation-history>\n{}\n</conversation-history>",
                turns.join("\n")
            ));
        }

        parts.join("\n\n")
    }
}

/// Builds bounded prompt contexts
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    site_name: String,
    content_budget: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(String::new(), DEFAULT_CONTENT_BUDGET)
    }
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(site_name: String, content_budget: usize) -> Self {
        Self {
            site_name,
            content_budget,
        }
    }

    /// Build a prompt context from history and site content
    #[must_use]
    pub fn build(&self, history: &ConversationHistory, site: &SiteContent) -> PromptContext {
        let mut system = SYSTEM_INSTRUCTIONS.to_string();
        if !self.site_name.is_empty() {
            let _ = write!(system, "\nThe website is called {}.", self.site_name);
        }

        let mut sections = Vec::new();
        for (label, entries) in [
            ("Pages", &site.pages),
            ("Posts", &site.posts),
            ("Products", &site.products),
        ] {
            if entries.is_empty() {
                continue;
            }
            let lines: Vec<String> = entries.iter().map(|e| self.format_entry(e)).collect();
            sections.push(format!("{label}:\n{}", lines.join("\n")));
        }

        let current_page = site
            .current_page
            .as_ref()
            .map(|e| self.format_entry(e))
            .unwrap_or_default();

        PromptContext {
            system,
            site_context: sections.join("\n\n"),
            current_page,
            history: history.turns().cloned().collect(),
        }
    }

    fn format_entry(&self, entry: &SiteEntry) -> String {
        let body = truncate_chars(entry.content.trim(), self.content_budget);
        let mut line = format!("- {}", entry.title.trim());
        if !entry.url.is_empty() {
            let _ = write!(line, " ({})", entry.url);
        }
        if !body.is_empty() {
            line.push_str(": ");
            line.push_str(body);
        }
        line
    }
}

/// Cut a string to at most `budget` characters on a char boundary
fn truncate_chars(text: &str, budget: usize) -> &str {
    text.char_indices()
        .nth(budget)
        .map_or(text, |(idx, _)| &text[..idx])
}
