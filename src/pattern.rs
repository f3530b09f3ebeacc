//! Include/exclude matching over root-relative paths.
//!
//! Paths are POSIX style, relative to the ingestion root and never start
//! with a slash. Globs are anchored to the whole path: `*` and `?` stay
//! inside one component, `**` crosses separators.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

/// Excludes applied to every query on top of its own exclude patterns.
///
/// Dotfiles and dot-directories (`.git`, `.svn`, `.hg`, `.venv`, `.idea`,
/// `.env`, ...) plus common VCS and dependency directories.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.*",
    "**/.*/**",
    "**/CVS",
    "**/CVS/**",
    "**/_darcs",
    "**/_darcs/**",
    "**/node_modules",
    "**/node_modules/**",
    "**/bower_components",
    "**/bower_components/**",
    "**/__pycache__",
    "**/__pycache__/**",
    "**/venv",
    "**/venv/**",
];

/// Outcome of testing one path against a [`PatternMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// No exclude matched and the include set is empty or matched
    Included,
    /// At least one exclude matched
    Excluded,
    /// No exclude matched, but the include set is non-empty and missed
    NotIncluded,
}

impl MatchDecision {
    /// Returns true for [`MatchDecision::Included`].
    #[must_use]
    pub const fn is_included(self) -> bool {
        matches!(self, Self::Included)
    }
}

/// Compiled include/exclude predicate.
///
/// Built once per query and shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PatternMatcher {
    /// Compiles the query's patterns together with a baseline exclude set.
    ///
    /// Blank patterns are ignored and a leading `/` is stripped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for the first malformed glob.
    pub fn new(include: &[String], exclude: &[String], baseline: &[&str]) -> Result<Self> {
        let include_patterns = normalize(include.iter().map(String::as_str));
        let include = if include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&include_patterns)?)
        };

        let mut exclude_patterns = normalize(baseline.iter().copied());
        exclude_patterns.extend(normalize(exclude.iter().map(String::as_str)));
        let exclude = build_globset(&exclude_patterns)?;

        debug!(
            "Compiled {} include and {} exclude patterns",
            include_patterns.len(),
            exclude_patterns.len()
        );

        Ok(Self { include, exclude })
    }

    /// Decides whether a file path is included.
    #[must_use]
    pub fn decide(&self, relative_path: &str) -> MatchDecision {
        if self.is_excluded(relative_path, false) {
            return MatchDecision::Excluded;
        }

        match &self.include {
            None => MatchDecision::Included,
            Some(set) if set.is_match(relative_path) => MatchDecision::Included,
            Some(_) => MatchDecision::NotIncluded,
        }
    }

    /// Returns true if the directory is excluded and must not be descended into.
    ///
    /// The directory is tested both bare and with a trailing separator, so
    /// `build/`, `build` and `build/**` all prune `build`.
    #[must_use]
    pub fn is_pruned(&self, relative_dir: &str) -> bool {
        self.is_excluded(relative_dir, true)
    }

    /// Returns true if an include pattern names the directory itself.
    #[must_use]
    pub fn includes_dir(&self, relative_dir: &str) -> bool {
        self.include.as_ref().is_some_and(|set| {
            set.is_match(relative_dir) || set.is_match(format!("{relative_dir}/"))
        })
    }

    fn is_excluded(&self, relative_path: &str, is_dir: bool) -> bool {
        self.exclude.is_match(relative_path)
            || (is_dir && self.exclude.is_match(format!("{relative_path}/")))
    }
}

fn normalize<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<String> {
    patterns
        .map(str::trim)
        .map(|p| p.strip_prefix('/').unwrap_or(p))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::invalid_pattern(pattern, e.kind().to_string()))?;
        builder.add(glob);
    }

    builder
        .build()
        .map_err(|e| Error::invalid_pattern(patterns.join(", "), e.to_string()))
}
