//! Include/exclude filter chains
//!
//! A chain is an ordered list of units. A path passes the chain only if
//! every unit accepts it:
//!
//! 1. Include units hold any number of patterns and accept a path when one
//!    of them matches the path or one of its ancestors (relative or absolute)
//! 2. Exclude units hold exactly one pattern and reject a path when it
//!    matches the path, an ancestor, the absolute form or an ancestor of it,
//!    or the bare leaf name
//!
//! Patterns are shell globs: `*` and `?` never cross a `/`, `[...]` is a
//! character class.

use globset::{GlobBuilder, GlobMatcher};
use keepsake_core::paths;
use keepsake_core::{Error, Result};
use std::fmt;
use std::path::Path;
use tracing::trace;

/// A compiled glob, remembering its source text
#[derive(Clone)]
pub struct Pattern {
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let glob = GlobBuilder::new(source)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::Pattern {
                pattern: source.to_string(),
                reason: e.kind().to_string(),
            })?;
        Ok(Self {
            source: source.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn is_match(&self, path: &Path) -> bool {
        self.matcher.is_match(path)
    }

    /// Matches the path itself or any proper ancestor of it
    fn matches_ancestry(&self, path: &Path) -> bool {
        path.ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .any(|p| self.is_match(p))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// One unit of a filter chain
#[derive(Debug, Clone)]
pub enum FilterUnit {
    /// Accepts a path when any pattern matches it or an ancestor
    Include(Vec<Pattern>),
    /// Rejects a path when the pattern matches it, an ancestor, or its leaf
    Exclude(Pattern),
}

impl FilterUnit {
    fn accepts(&self, path: &Path, absolute: &Path) -> bool {
        match self {
            FilterUnit::Include(patterns) => patterns
                .iter()
                .any(|p| p.matches_ancestry(path) || p.matches_ancestry(absolute)),
            FilterUnit::Exclude(pattern) => {
                let leaf_hit = path
                    .file_name()
                    .is_some_and(|leaf| pattern.is_match(Path::new(leaf)));
                !(leaf_hit || pattern.matches_ancestry(path) || pattern.matches_ancestry(absolute))
            }
        }
    }
}

/// An ordered filter chain
#[derive(Debug, Clone, Default)]
pub struct Filters {
    units: Vec<FilterUnit>,
}

impl Filters {
    /// An empty chain, which accepts every path
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include pattern
    ///
    /// The pattern joins every existing include unit; a new include unit is
    /// created only when there is none yet. Empty patterns are ignored.
    pub fn add_include(&mut self, pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Ok(());
        }
        let compiled = Pattern::new(pattern)?;

        let mut added = false;
        for unit in &mut self.units {
            if let FilterUnit::Include(patterns) = unit {
                patterns.push(compiled.clone());
                added = true;
            }
        }
        if !added {
            self.units.push(FilterUnit::Include(vec![compiled]));
        }
        trace!(pattern, "added include pattern");
        Ok(())
    }

    /// Append an exclude unit; empty patterns are ignored
    pub fn add_exclude(&mut self, pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Ok(());
        }
        self.units.push(FilterUnit::Exclude(Pattern::new(pattern)?));
        trace!(pattern, "added exclude pattern");
        Ok(())
    }

    /// A copy of this chain with extra include patterns; `self` is unchanged
    pub fn with_includes<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Self> {
        let mut out = self.clone();
        for pattern in patterns {
            out.add_include(pattern.as_ref())?;
        }
        Ok(out)
    }

    /// A copy of this chain with extra exclude units; `self` is unchanged
    pub fn with_excludes<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Self> {
        let mut out = self.clone();
        for pattern in patterns {
            out.add_exclude(pattern.as_ref())?;
        }
        Ok(out)
    }

    pub fn has_includes(&self) -> bool {
        self.units
            .iter()
            .any(|unit| matches!(unit, FilterUnit::Include(_)))
    }

    pub fn units(&self) -> &[FilterUnit] {
        &self.units
    }

    /// Whether `path` passes every unit of the chain
    pub fn include(&self, path: &Path) -> bool {
        if self.units.is_empty() {
            return true;
        }
        let absolute = paths::absolute(path);
        self.units.iter().all(|unit| unit.accepts(path, &absolute))
    }
}

/// Turn a literal path into a pattern that matches only that path
pub fn escape_pattern(literal: &str) -> String {
    globset::escape(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(includes: &[&str], excludes: &[&str]) -> Filters {
        Filters::new()
            .with_includes(includes)
            .unwrap()
            .with_excludes(excludes)
            .unwrap()
    }

    #[test]
    fn test_empty_chain_accepts_everything() {
        let filters = Filters::new();
        assert!(filters.include(Path::new("/anything/at/all")));
        assert!(!filters.has_includes());
    }

    #[test]
    fn test_include_matches_ancestor() {
        let filters = chain(&["a/b"], &[]);
        assert!(filters.include(Path::new("a/b/c/d")));
        assert!(filters.include(Path::new("a/b")));
        assert!(!filters.include(Path::new("a/bc/d")));
        assert!(!filters.include(Path::new("x/a/b")));
    }

    #[test]
    fn test_include_tests_absolute_form() -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let pattern = format!("{}/*", escape_pattern(&cwd.to_string_lossy()));
        let filters = chain(&[pattern.as_str()], &[]);
        assert!(filters.include(Path::new("relative/file")));
        Ok(())
    }

    #[test]
    fn test_include_patterns_are_ored() {
        let filters = chain(&["/srv/*", "/home/*"], &[]);
        assert!(filters.include(Path::new("/srv/www/index.html")));
        assert!(filters.include(Path::new("/home/kim/notes")));
        assert!(!filters.include(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let filters = chain(&[], &["/data/*.log"]);
        assert!(!filters.include(Path::new("/data/run.log")));
        // The leaf `run.log` does not match `/data/*.log`; the full path does not either.
        assert!(filters.include(Path::new("/data/sub/run.log")));
    }

    #[test]
    fn test_exclude_leaf_anywhere() {
        let filters = chain(&[], &["*.tmp"]);
        assert!(!filters.include(Path::new("/x/y/z.tmp")));
        assert!(!filters.include(Path::new("y/z.tmp")));
        assert!(!filters.include(Path::new("z.tmp")));
        assert!(filters.include(Path::new("/x/y/z.txt")));
    }

    #[test]
    fn test_exclude_covers_subtree() {
        let filters = chain(&[], &["/data/cache"]);
        assert!(!filters.include(Path::new("/data/cache")));
        assert!(!filters.include(Path::new("/data/cache/blob/1")));
        assert!(filters.include(Path::new("/data/cached")));
    }

    #[test]
    fn test_every_unit_must_accept() {
        let filters = chain(&["/data"], &["*.bak"]);
        assert!(filters.include(Path::new("/data/a.txt")));
        assert!(!filters.include(Path::new("/data/a.bak")));
        assert!(!filters.include(Path::new("/other/a.txt")));
    }

    #[test]
    fn test_add_include_joins_existing_unit() -> anyhow::Result<()> {
        let mut filters = Filters::new();
        filters.add_include("/a")?;
        filters.add_exclude("*.o")?;
        filters.add_include("/b")?;

        assert_eq!(filters.units().len(), 2);
        match &filters.units()[0] {
            FilterUnit::Include(patterns) => {
                let sources: Vec<_> = patterns.iter().map(Pattern::as_str).collect();
                assert_eq!(sources, vec!["/a", "/b"]);
            }
            other => panic!("unexpected unit {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_empty_patterns_ignored() -> anyhow::Result<()> {
        let mut filters = Filters::new();
        filters.add_include("")?;
        filters.add_exclude("")?;
        assert!(filters.units().is_empty());
        Ok(())
    }

    #[test]
    fn test_with_variants_leave_receiver_unchanged() -> anyhow::Result<()> {
        let base = chain(&["/a"], &[]);
        let wider = base.with_includes(&["/b"])?;
        let narrower = base.with_excludes(&["*.x"])?;

        assert!(!base.include(Path::new("/b/file")));
        assert!(wider.include(Path::new("/b/file")));
        assert!(base.include(Path::new("/a/file.x")));
        assert!(!narrower.include(Path::new("/a/file.x")));
        Ok(())
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut filters = Filters::new();
        assert!(matches!(
            filters.add_exclude("[unclosed"),
            Err(Error::Pattern { .. })
        ));
    }

    #[test]
    fn test_escape_pattern_is_literal() -> anyhow::Result<()> {
        let literal = "/backups/job_[1]*?.tar.gz.asc";
        let escaped = escape_pattern(literal);
        let filters = chain(&[], &[escaped.as_str()]);
        assert!(!filters.include(Path::new(literal)));
        assert!(filters.include(Path::new("/backups/job_1x.tar.gz.asc")));
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_include_is_pure(segments in proptest::collection::vec("[a-z]{1,4}", 1..5)) {
            let filters = chain(&["/a*"], &["*.tmp"]);
            let path = format!("/{}", segments.join("/"));
            let first = filters.include(Path::new(&path));
            prop_assert_eq!(first, filters.include(Path::new(&path)));
        }

        #[test]
        fn prop_tmp_leaf_always_excluded(dirs in proptest::collection::vec("[a-z]{1,4}", 0..4), absolute in any::<bool>()) {
            let filters = chain(&[], &["*.tmp"]);
            let mut path = dirs.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str("z.tmp");
            if absolute {
                path.insert(0, '/');
            }
            prop_assert!(!filters.include(Path::new(&path)));
        }
    }
}
