//! Regex heuristic: does a question probably need live web data?
//!
//! Advisory only. A match drives the "verify with web" suggestion after an
//! ungrounded answer; it never forces a search by itself.

use crate::{Error, Result};
use regex::{RegexSet, RegexSetBuilder};

/// Recency words, tax terms, Ugandan tax acronyms, and years 2023-2039.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"\b(latest|current|this year|updated|new)\b",
    r"\b(rate|threshold|penalt(y|ies)|deadline|due date|gazette|practice note)\b",
    r"\b(VAT|PAYE|WHT|Excise|EFRIS)\b",
    r"\b20(2[3-9]|3[0-9])\b",
];

#[derive(Debug, Clone)]
pub struct Classifier {
    set: RegexSet,
}

impl Classifier {
    /// Compile a pattern list. Matching is always case-insensitive.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidPattern(e.to_string()))?;
        Ok(Self { set })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Indices of the patterns that fired, for logging.
    pub fn matching_patterns(&self, text: &str) -> Vec<usize> {
        self.set.matches(text).into_iter().collect()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS).expect("built-in classifier patterns compile")
    }
}
