//! Glob matching for `applyTo` patterns and ignore lists.
//!
//! Semantics are POSIX shell globbing plus `**` for recursive segments,
//! matched case-sensitively against forward-slash paths relative to the
//! project root. A pattern without `/` matches at any depth.

use crate::error::ApmError;
use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

/// Compiled matcher for a single `applyTo` pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    matcher: GlobMatcher,
}

impl PatternMatcher {
    /// Compile a pattern. Bare patterns (no `/`) are anchored at any depth,
    /// equivalent to `**/<pattern>`.
    pub fn new(pattern: &str) -> Result<Self, ApmError> {
        let effective = if pattern.contains('/') {
            pattern.to_string()
        } else {
            format!("**/{}", pattern)
        };
        let glob = GlobBuilder::new(&effective)
            .literal_separator(true)
            .case_insensitive(false)
            .build()
            .map_err(|e| ApmError::InvalidGlob {
                pattern: pattern.to_string(),
                reason: e.kind().to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// The original (un-normalized) pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match a root-relative path. Backslashes are normalized so Windows
    /// paths compare the same as POSIX ones.
    pub fn matches_rel(&self, rel_path: &Path) -> bool {
        let normalized = rel_path.to_string_lossy().replace('\\', "/");
        self.matcher.is_match(normalized.as_str())
    }

    /// Match a string path already using forward slashes.
    pub fn matches_str(&self, rel_path: &str) -> bool {
        self.matcher.is_match(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn recursive_star_star() {
        let m = PatternMatcher::new("docs/**/*.md").unwrap();
        assert!(m.matches_str("docs/a.md"));
        assert!(m.matches_str("docs/deep/nested/b.md"));
        assert!(!m.matches_str("src/a.md"));
    }

    #[test]
    fn bare_pattern_matches_any_depth() {
        let m = PatternMatcher::new("*.py").unwrap();
        assert!(m.matches_str("main.py"));
        assert!(m.matches_str("src/pkg/util.py"));
        assert!(!m.matches_str("src/pkg/util.rs"));
    }

    #[test]
    fn single_star_does_not_cross_separators() {
        let m = PatternMatcher::new("src/*.py").unwrap();
        assert!(m.matches_str("src/main.py"));
        assert!(!m.matches_str("src/pkg/util.py"));
    }

    #[test]
    fn brace_sets() {
        let m = PatternMatcher::new("**/*.{ts,tsx}").unwrap();
        assert!(m.matches_str("src/app.ts"));
        assert!(m.matches_str("frontend/Button.tsx"));
        assert!(!m.matches_str("src/app.js"));
    }

    #[test]
    fn case_sensitive() {
        let m = PatternMatcher::new("**/*.MD").unwrap();
        assert!(m.matches_str("README.MD"));
        assert!(!m.matches_str("README.md"));
    }

    #[test]
    fn unbalanced_bracket_is_invalid() {
        let err = PatternMatcher::new("src/[abc.py").unwrap_err();
        assert!(matches!(err, ApmError::InvalidGlob { .. }));
    }

    #[test]
    fn backslash_paths_normalized() {
        let m = PatternMatcher::new("docs/**/*.md").unwrap();
        assert!(m.matches_rel(&PathBuf::from("docs\\guide\\intro.md")));
    }
}
