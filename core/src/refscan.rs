//! Work item reference extraction from commit messages.

use regex_lite::Regex;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid reference pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex_lite::Error,
    },
}

/// Extracts work item tokens from commit messages using configured
/// patterns. Each pattern contributes the text of its first capture
/// group, or the whole match when it has no groups.
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    patterns: Vec<Regex>,
}

impl ReferenceScanner {
    /// Compile `patterns`, rejecting the first invalid one.
    pub fn new(patterns: &[String]) -> Result<Self, ScanError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ScanError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The stock pattern: `#123` style references.
    pub fn default_patterns() -> Vec<String> {
        vec![r"#(\d+)".to_string()]
    }

    /// All distinct tokens in `message`, in order of first appearance.
    pub fn scan(&self, message: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for pattern in &self.patterns {
            for captures in pattern.captures_iter(message) {
                let matched = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string());
                if let Some(token) = matched {
                    if !token.is_empty() && !tokens.contains(&token) {
                        tokens.push(token);
                    }
                }
            }
        }
        tokens
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for ReferenceScanner {
    /// Scanner over [`ReferenceScanner::default_patterns`]; the stock
    /// pattern always compiles.
    fn default() -> Self {
        Self::new(&Self::default_patterns()).unwrap_or(Self { patterns: Vec::new() })
    }
}
