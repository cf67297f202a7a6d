//! Operation-exclusion rule matching
//!
//! Rules identify operations that must never be recorded or replayed. Three
//! pattern shapes are supported: exact strings, prefix wildcards
//! (`"/api/v1/*"`), and suffix wildcards (`"*_info"`). An empty identifier is
//! never matched by content rules; callers treat "don't exclude" as the safe
//! default for missing data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One exclusion pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionPattern {
    Exact(String),
    /// Matches identifiers starting with the stem (`"/api/v1/*"` keeps stem
    /// `"/api/v1/"`).
    Prefix(String),
    /// Matches identifiers ending with the stem (`"*_info"` keeps stem
    /// `"_info"`).
    Suffix(String),
}

impl ExclusionPattern {
    /// Parse a raw pattern string. A trailing `*` yields a prefix pattern, a
    /// leading `*` a suffix pattern, anything else an exact match.
    pub fn parse(raw: &str) -> Self {
        if let Some(stem) = raw.strip_suffix('*') {
            return ExclusionPattern::Prefix(stem.to_string());
        }
        if let Some(stem) = raw.strip_prefix('*') {
            return ExclusionPattern::Suffix(stem.to_string());
        }
        ExclusionPattern::Exact(raw.to_string())
    }

    /// Whether this pattern matches a non-empty identifier.
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            ExclusionPattern::Exact(pattern) => identifier == pattern,
            ExclusionPattern::Prefix(stem) => identifier.starts_with(stem),
            ExclusionPattern::Suffix(stem) => identifier.ends_with(stem),
        }
    }
}

impl fmt::Display for ExclusionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionPattern::Exact(pattern) => f.write_str(pattern),
            ExclusionPattern::Prefix(stem) => write!(f, "{}*", stem),
            ExclusionPattern::Suffix(stem) => write!(f, "*{}", stem),
        }
    }
}

/// An ordered set of exclusion patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRules {
    patterns: Vec<ExclusionPattern>,
}

impl ExclusionRules {
    /// Create an empty rule set, which matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a collection of raw pattern strings. Blank entries are dropped.
    pub fn from_patterns<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = raw
            .into_iter()
            .filter(|p| !p.as_ref().is_empty())
            .map(|p| ExclusionPattern::parse(p.as_ref()))
            .collect();
        Self { patterns }
    }

    /// Whether any pattern matches the identifier.
    ///
    /// An empty identifier never matches: "can't evaluate" is a decision
    /// (do not exclude), not an error.
    pub fn matches(&self, identifier: &str) -> bool {
        if identifier.is_empty() {
            return false;
        }
        self.patterns.iter().any(|p| p.matches(identifier))
    }

    pub fn patterns(&self) -> &[ExclusionPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
