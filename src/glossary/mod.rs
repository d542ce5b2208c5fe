/*!
 * Glossary (domain term list) shared by all translation calls of a job.
 *
 * - `extraction`: two-pass, concurrency-bounded term extraction from sample chunks
 * - `state`: resolve-once shared future consumed by independent chunk workers
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod extraction;
pub mod state;

pub use extraction::{ChunkGlossary, GlossaryExtractionResult, GlossaryExtractor, GlossaryReviewer, TermConfidence};
pub use state::GlossaryState;

/// A term and its enforced translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryItem {
    /// Source-language term
    pub term: String,
    /// Required target-language rendering
    pub translation: String,
    /// Optional usage note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl GlossaryItem {
    /// Create a new glossary item
    pub fn new(term: &str, translation: &str) -> Self {
        Self { term: term.trim().to_string(), translation: translation.trim().to_string(), notes: None }
    }

    /// Attach a usage note
    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    /// Key used for uniqueness
    pub fn key(&self) -> String {
        self.term.trim().to_lowercase()
    }
}

/// Merge term lists in priority order, keeping the first occurrence of each term.
pub fn merge_unique<'a, I>(sources: I) -> Vec<GlossaryItem>
where
    I: IntoIterator<Item = &'a GlossaryItem>,
{
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|item| !item.term.trim().is_empty() && !item.translation.trim().is_empty())
        .filter(|item| seen.insert(item.key()))
        .cloned()
        .collect()
}

/// Render a glossary as prompt lines
pub fn format_for_prompt(items: &[GlossaryItem]) -> String {
    items
        .iter()
        .map(|item| match &item.notes {
            Some(notes) if !notes.trim().is_empty() => format!("- {} -> {} ({})", item.term, item.translation, notes),
            _ => format!("- {} -> {}", item.term, item.translation),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
