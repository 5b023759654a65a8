//! Pattern matching for blocklist names and publishers
//!
//! Supports both exact matching and glob pattern matching with
//! auto-detection based on pattern characters. Both are ASCII
//! case-insensitive: executable names and publisher strings are not
//! reliably cased across platforms.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Check if a filter string contains glob pattern characters
pub fn is_glob_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?') || filter.contains('[')
}

/// Compiled name or publisher pattern
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(String),
    Glob(Pattern),
}

impl NamePattern {
    /// Compile a pattern. Invalid globs fall back to exact matching.
    pub fn new(pattern: &str) -> Self {
        if is_glob_pattern(pattern) {
            if let Ok(glob) = Pattern::new(pattern) {
                return NamePattern::Glob(glob);
            }
        }
        NamePattern::Exact(pattern.to_string())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => exact.eq_ignore_ascii_case(candidate),
            NamePattern::Glob(glob) => glob.matches_with(candidate, MATCH_OPTIONS),
        }
    }
}

/// Validate that a pattern is a syntactically correct glob, if it is one
pub fn validate_pattern(pattern: &str) -> Result<(), glob::PatternError> {
    if is_glob_pattern(pattern) {
        Pattern::new(pattern)?;
    }
    Ok(())
}
