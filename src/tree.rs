use crate::{
    classify::FileClassifier,
    error::{Error, Result},
    node::{Node, ScanStats, SkipReason},
    pattern::{MatchDecision, PatternMatcher, DEFAULT_EXCLUDES},
    query::IngestionQuery,
};
use ignore::{DirEntry, WalkBuilder};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

/// Walks the ingestion root and builds the ordered [`Node`] tree.
///
/// Directories are listed by a single [`ignore`] walker started at the
/// query's `root_dir`, so `.gitignore` files apply from the repository root
/// down even when ingestion starts at a subpath. In parallel mode the
/// classification of files and the assembly of directory subtrees run
/// fork-join on a worker pool.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    root: PathBuf,
    scope: Scope,
    matcher: Arc<PatternMatcher>,
    max_file_size: u64,
    parallel: bool,
    respect_gitignore: bool,
}

impl TreeBuilder {
    /// Creates a tree builder from a query, compiling its patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if a pattern fails to compile.
    pub fn new(query: &IngestionQuery) -> Result<Self> {
        let matcher = PatternMatcher::new(
            &query.include_patterns,
            &query.exclude_patterns,
            DEFAULT_EXCLUDES,
        )?;

        Ok(Self {
            root: query.ingest_root(),
            scope: Scope::new(&query.root_dir, query.subpath.as_deref()),
            matcher: Arc::new(matcher),
            max_file_size: query.max_file_size,
            parallel: query.parallel,
            respect_gitignore: query.respect_gitignore,
        })
    }

    /// Walks the root and returns the root directory node.
    ///
    /// The root node is always present, even when nothing was included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRoot`] if the root is missing, is not a
    /// directory or cannot be listed.
    pub fn build(&self) -> Result<Node> {
        let root_real = fs::canonicalize(&self.root)
            .map_err(|e| Error::invalid_root(&self.root, e.to_string()))?;

        if !root_real.is_dir() {
            return Err(Error::invalid_root(&self.root, "not a directory"));
        }

        debug!(
            "Walking {} ({})",
            root_real.display(),
            if self.parallel { "parallel" } else { "sequential" }
        );

        let filter = Arc::new(EntryFilter {
            matcher: Arc::clone(&self.matcher),
            scope: self.scope.clone(),
            root_real: root_real.clone(),
            rejected: Mutex::default(),
        });
        let pending = self.collect(&filter, &root_real)?;
        let rejected =
            std::mem::take(&mut *filter.rejected.lock().unwrap_or_else(PoisonError::into_inner));

        let assembly = Assembly {
            matcher: self.matcher.as_ref(),
            classifier: FileClassifier::new(root_real.clone(), self.max_file_size),
            root_real: &root_real,
            rejected,
            parallel: self.parallel,
        };

        let root = if self.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_cpus::get())
                .build()
                .map_err(|e| Error::task(format!("cannot start worker pool: {e}")))?;
            pool.install(|| assembly.directory(pending))
        } else {
            assembly.directory(pending)
        };

        if let Some(stats) = root.stats() {
            debug!(
                "Walk complete: {} scanned, {} text, {} binary, {} skipped, {} dirs pruned",
                stats.files_scanned,
                stats.text_files,
                stats.binary_files,
                stats.skipped(),
                stats.dirs_pruned
            );
        }

        Ok(root)
    }

    /// Lists everything below the ingestion root, in name order.
    fn collect(&self, filter: &Arc<EntryFilter>, root_real: &Path) -> Result<PendingDir> {
        let entry_filter = Arc::clone(filter);
        let walker = WalkBuilder::new(&self.scope.walk_root)
            .standard_filters(false)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .require_git(false)
            .follow_links(true)
            .skip_stdout(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| entry_filter.admit(entry))
            .build();

        let mut stack: Vec<PendingDir> = Vec::new();
        for result in walker {
            match result {
                Ok(entry) => self.push_entry(&mut stack, entry, root_real),
                Err(err) => record_walk_error(&mut stack, &err),
            }
        }

        unwind(&mut stack, 1);
        let root = stack.pop().ok_or_else(|| {
            Error::invalid_root(&self.root, "excluded by ignore rules or not listable")
        })?;

        if let Some(reason) = &root.unreadable {
            return Err(Error::invalid_root(&self.root, format!("cannot list: {reason}")));
        }

        Ok(root)
    }

    fn push_entry(&self, stack: &mut Vec<PendingDir>, entry: DirEntry, root_real: &Path) {
        let rel = match self.scope.locate(entry.path()) {
            Location::Above | Location::Outside => return,
            Location::Root => {
                if stack.is_empty() {
                    let name = entry_name(root_real);
                    stack.push(PendingDir::new(name, String::new(), entry.into_path()));
                }
                return;
            }
            Location::Inside(rel) => rel,
        };

        unwind(stack, rel.split('/').count());

        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        let is_symlink = entry.path_is_symlink();
        let path = entry.into_path();

        if is_dir {
            stack.push(PendingDir::new(name, rel, path));
        } else if let Some(parent) = stack.last_mut() {
            parent.children.push(Pending::File(PendingFile {
                name,
                rel,
                path,
                is_symlink,
            }));
        }
    }
}

/// Where the ingestion root sits below the directory the walker starts at.
#[derive(Debug, Clone)]
struct Scope {
    walk_root: PathBuf,
    base: Vec<OsString>,
}

/// Position of a walked path relative to the ingestion root.
enum Location {
    /// A directory on the way down to the ingestion root
    Above,
    /// The ingestion root itself
    Root,
    /// Below the ingestion root, with its root-relative POSIX path
    Inside(String),
    /// Beside the way down; never part of the digest
    Outside,
}

impl Scope {
    fn new(root_dir: &Path, subpath: Option<&str>) -> Self {
        let base = subpath
            .map(|subpath| {
                Path::new(subpath)
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(name) => Some(name.to_os_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            walk_root: root_dir.to_path_buf(),
            base,
        }
    }

    fn locate(&self, path: &Path) -> Location {
        let Ok(rest) = path.strip_prefix(&self.walk_root) else {
            return Location::Outside;
        };

        let parts: Vec<&OsStr> = rest.iter().collect();
        let shared = parts.len().min(self.base.len());
        if parts[..shared]
            .iter()
            .zip(&self.base)
            .any(|(part, base)| *part != base.as_os_str())
        {
            return Location::Outside;
        }

        match parts.len().cmp(&self.base.len()) {
            Ordering::Less => Location::Above,
            Ordering::Equal => Location::Root,
            Ordering::Greater => Location::Inside(
                parts[self.base.len()..]
                    .iter()
                    .map(|part| part.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            ),
        }
    }
}

/// Why the entry filter refused to descend into a directory.
#[derive(Debug, Clone, Copy)]
enum Rejection {
    Pruned,
    Skipped(SkipReason),
}

impl Rejection {
    fn record(self, stats: &mut ScanStats) {
        match self {
            Self::Pruned => stats.dirs_pruned += 1,
            Self::Skipped(reason) => stats.record_skip(reason),
        }
    }
}

/// Descent decisions taken inside the walker, before a directory is read.
///
/// Refused directories are counted per parent directory and merged into
/// the tree once the walk is over.
struct EntryFilter {
    matcher: Arc<PatternMatcher>,
    scope: Scope,
    root_real: PathBuf,
    rejected: Mutex<HashMap<PathBuf, ScanStats>>,
}

impl EntryFilter {
    fn admit(&self, entry: &DirEntry) -> bool {
        let rel = match self.scope.locate(entry.path()) {
            Location::Above | Location::Root => return true,
            Location::Outside => return false,
            Location::Inside(rel) => rel,
        };

        // Files are always listed; they are classified after the walk.
        if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            return true;
        }

        let Some(rejection) = self.check_dir(entry, &rel) else {
            return true;
        };

        let parent = entry
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        rejection.record(rejected.entry(parent).or_default());
        false
    }

    fn check_dir(&self, entry: &DirEntry, rel: &str) -> Option<Rejection> {
        if self.matcher.is_pruned(rel) {
            trace!("Pruned directory: {}", rel);
            return Some(Rejection::Pruned);
        }

        if !entry.path_is_symlink() {
            return None;
        }

        let real = match fs::canonicalize(entry.path()) {
            Ok(real) => real,
            Err(e) => {
                warn!("Cannot resolve {}: {}", entry.path().display(), e);
                return Some(Rejection::Skipped(SkipReason::Unreadable));
            }
        };

        if !real.starts_with(&self.root_real) {
            debug!("Skipping {}: resolves outside the root", rel);
            return Some(Rejection::Skipped(SkipReason::SymlinkEscape));
        }

        let target = posix_relative(&real, &self.root_real);
        if !target.is_empty() && self.matcher.is_pruned(&target) {
            debug!("Pruned directory {}: target {} is excluded", rel, target);
            return Some(Rejection::Pruned);
        }

        None
    }
}

/// A directory listed by the walker whose children are not classified yet.
struct PendingDir {
    name: String,
    rel: String,
    path: PathBuf,
    children: Vec<Pending>,
    stats: ScanStats,
    unreadable: Option<String>,
}

impl PendingDir {
    fn new(name: String, rel: String, path: PathBuf) -> Self {
        Self {
            name,
            rel,
            path,
            children: Vec::new(),
            stats: ScanStats::default(),
            unreadable: None,
        }
    }
}

struct PendingFile {
    name: String,
    rel: String,
    path: PathBuf,
    is_symlink: bool,
}

enum Pending {
    Dir(PendingDir),
    File(PendingFile),
}

/// Attaches finished directories to their parents until `depth` remain.
fn unwind(stack: &mut Vec<PendingDir>, depth: usize) {
    while stack.len() > depth.max(1) {
        let Some(done) = stack.pop() else { break };
        if let Some(parent) = stack.last_mut() {
            parent.children.push(Pending::Dir(done));
        }
    }
}

/// Records a per-entry walk error against the directory it belongs to.
fn record_walk_error(stack: &mut [PendingDir], err: &ignore::Error) {
    let Some(path) = error_path(err) else {
        warn!("Walk error: {}", err);
        return;
    };

    if is_loop(err) {
        if let Some(parent) = owning_dir(stack, path) {
            debug!("Skipping {}: symlink loop", path.display());
            parent.stats.record_skip(SkipReason::SymlinkLoop);
        }
        return;
    }

    if err.io_error().is_none() {
        warn!("Walk error: {}", err);
        return;
    }

    if let Some(dir) = stack.iter_mut().rev().find(|dir| dir.path.as_path() == path) {
        warn!("Cannot list {}: {}", path.display(), err);
        dir.unreadable = Some(err.to_string());
    } else if let Some(parent) = owning_dir(stack, path) {
        warn!("Cannot read {}: {}", path.display(), err);
        parent.stats.record_skip(SkipReason::Unreadable);
    } else {
        warn!("Walk error: {}", err);
    }
}

fn owning_dir<'s>(stack: &'s mut [PendingDir], path: &Path) -> Option<&'s mut PendingDir> {
    stack
        .iter_mut()
        .rev()
        .find(|dir| dir.path.as_path() != path && path.starts_with(&dir.path))
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

fn is_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop(err),
        _ => false,
    }
}

/// Outcome of visiting one directory entry.
struct Visit {
    node: Option<Node>,
    stats: ScanStats,
}

impl Visit {
    fn dropped(reason: SkipReason) -> Self {
        let mut stats = ScanStats::default();
        stats.record_skip(reason);
        Self { node: None, stats }
    }
}

/// Classifies listed files and finalizes directories bottom-up.
///
/// Shared read-only by every worker; a directory node is only built after
/// all of its children are done.
struct Assembly<'a> {
    matcher: &'a PatternMatcher,
    classifier: FileClassifier,
    root_real: &'a Path,
    rejected: HashMap<PathBuf, ScanStats>,
    parallel: bool,
}

impl Assembly<'_> {
    fn directory(&self, dir: PendingDir) -> Node {
        let mut stats = dir.stats;
        if let Some(rejected) = self.rejected.get(&dir.path) {
            stats.merge(rejected);
        }

        let visits: Vec<Visit> = if self.parallel {
            dir.children
                .into_par_iter()
                .map(|child| self.visit(child))
                .collect()
        } else {
            dir.children
                .into_iter()
                .map(|child| self.visit(child))
                .collect()
        };

        let mut children = Vec::with_capacity(visits.len());
        for visit in visits {
            stats.merge(&visit.stats);
            children.extend(visit.node);
        }

        Node::directory(dir.name, dir.rel, children, stats)
    }

    fn visit(&self, pending: Pending) -> Visit {
        match pending {
            Pending::Dir(dir) => self.visit_dir(dir),
            Pending::File(file) => self.visit_file(file),
        }
    }

    fn visit_dir(&self, dir: PendingDir) -> Visit {
        if dir.unreadable.is_some() {
            return Visit::dropped(SkipReason::Unreadable);
        }

        let rel = dir.rel.clone();
        let node = self.directory(dir);

        let stats = node.stats().copied().unwrap_or_default();
        let keep =
            node.children().iter().any(Node::is_rendered) || self.matcher.includes_dir(&rel);
        if !keep {
            trace!("Dropping directory without included files: {}", rel);
        }

        Visit {
            node: keep.then_some(node),
            stats,
        }
    }

    fn visit_file(&self, file: PendingFile) -> Visit {
        let decision = self.decide(&file);
        trace!("Classifying {} ({:?})", file.rel, decision);

        let classification = self.classifier.classify(&file.path, decision);
        let size = classification.size();
        let kind = classification.into_node_kind();

        let mut stats = ScanStats::default();
        stats.record_file(&kind, size);

        Visit {
            node: Some(Node::file(file.name, file.rel, size, kind)),
            stats,
        }
    }

    /// Matches the file's own path and, for a symlink, its target's path.
    ///
    /// Includes are decided by the link name; an excluded target always
    /// excludes the link.
    fn decide(&self, file: &PendingFile) -> MatchDecision {
        let decision = self.matcher.decide(&file.rel);
        if !file.is_symlink || !decision.is_included() {
            return decision;
        }

        let target = fs::canonicalize(&file.path)
            .ok()
            .filter(|real| real.starts_with(self.root_real))
            .map(|real| posix_relative(&real, self.root_real));

        match target {
            Some(target) if self.matcher.decide(&target) == MatchDecision::Excluded => {
                debug!("Excluding {}: target {} is excluded", file.rel, target);
                MatchDecision::Excluded
            }
            _ => decision,
        }
    }
}

/// Returns `path` relative to `base` as a POSIX string.
fn posix_relative(path: &Path, base: &Path) -> String {
    pathdiff::diff_paths(path, base)
        .unwrap_or_else(|| path.to_path_buf())
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::query::IngestionQueryBuilder;
    use assert_fs::prelude::*;

    fn build(
        temp: &assert_fs::TempDir,
        configure: impl FnOnce(IngestionQueryBuilder) -> IngestionQueryBuilder,
    ) -> Node {
        let query = configure(IngestionQuery::builder().root_dir(temp.path()))
            .build()
            .unwrap();
        TreeBuilder::new(&query).unwrap().build().unwrap()
    }

    fn paths(node: &Node) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(node, &mut out);
        out
    }

    fn collect_paths(node: &Node, out: &mut Vec<String>) {
        for child in node.children() {
            if child.is_rendered() {
                out.push(child.path.clone());
            }
            collect_paths(child, out);
        }
    }

    #[test]
    fn test_walk_is_sorted_and_nested() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("src/main.rs").write_str("fn main() {}").unwrap();
        temp.child("src/lib.rs").write_str("pub fn test() {}").unwrap();
        temp.child("tests/test.rs").write_str("#[test]\nfn test() {}").unwrap();
        temp.child("Cargo.toml").write_str("[package]").unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(
            paths(&root),
            vec![
                "Cargo.toml",
                "src",
                "src/lib.rs",
                "src/main.rs",
                "tests",
                "tests/test.rs"
            ]
        );
        assert_eq!(root.path, "");
        assert_eq!(root.stats().unwrap().text_files, 4);
    }

    #[test]
    fn test_directory_size_sums_included_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.txt").write_str("12345").unwrap();
        temp.child("sub/b.txt").write_str("123").unwrap();
        temp.child("sub/big.txt").write_str(&"x".repeat(200)).unwrap();

        let root = build(&temp, |b| b.max_file_size(100));

        assert_eq!(root.size, 8);
        let sub = &root.children()[1];
        assert_eq!(sub.name, "sub");
        assert_eq!(sub.size, 3);
        assert_eq!(root.stats().unwrap().oversized, 1);
    }

    #[test]
    fn test_default_excludes_prune_directories() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".git/config").write_str("[core]").unwrap();
        temp.child("node_modules/pkg/index.js").write_str("x").unwrap();
        temp.child("main.py").write_str("print()").unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(paths(&root), vec!["main.py"]);
        let stats = root.stats().unwrap();
        assert_eq!(stats.dirs_pruned, 2);
        assert_eq!(stats.files_scanned, 1);
    }

    #[test]
    fn test_directory_with_only_skipped_files_is_dropped() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("keep.txt").write_str("keep").unwrap();
        temp.child("logs/a.log").write_str("a").unwrap();
        temp.child("big/huge.txt").write_str(&"x".repeat(200)).unwrap();

        let root = build(&temp, |b| b.exclude("*.log").exclude("**/*.log").max_file_size(100));

        assert_eq!(paths(&root), vec!["keep.txt"]);
        let stats = root.stats().unwrap();
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.oversized, 1);
    }

    #[test]
    fn test_skipped_files_are_attached_but_not_rendered() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.txt").write_str("a").unwrap();
        temp.child("b.md").write_str("b").unwrap();

        let root = build(&temp, |b| b.include("*.txt"));

        let children = root.children();
        assert_eq!(children.len(), 2);
        assert!(matches!(
            children[1].kind,
            NodeKind::Skipped(SkipReason::NotIncluded)
        ));
        assert_eq!(paths(&root), vec!["a.txt"]);
    }

    #[test]
    fn test_explicitly_included_empty_directory_is_kept() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs").create_dir_all().unwrap();
        temp.child("other").create_dir_all().unwrap();

        let root = build(&temp, |b| b.include("docs"));

        assert_eq!(paths(&root), vec!["docs"]);
    }

    #[test]
    fn test_gitignore_is_respected() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".gitignore").write_str("ignored.rs\ndist/\n").unwrap();
        temp.child("included.rs").write_str("fn main() {}").unwrap();
        temp.child("ignored.rs").write_str("fn test() {}").unwrap();
        temp.child("dist/out.js").write_str("x").unwrap();

        let root = build(&temp, |b| b);
        assert_eq!(paths(&root), vec!["included.rs"]);

        let root = build(&temp, |b| b.respect_gitignore(false));
        assert_eq!(paths(&root), vec!["dist", "dist/out.js", "ignored.rs", "included.rs"]);
    }

    #[test]
    fn test_subpath_becomes_the_root() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("README.md").write_str("readme").unwrap();
        temp.child("pkg/core/lib.rs").write_str("lib").unwrap();

        let root = build(&temp, |b| b.subpath("pkg"));

        assert_eq!(root.name, "pkg");
        assert_eq!(paths(&root), vec!["core", "core/lib.rs"]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let temp = assert_fs::TempDir::new().unwrap();
        for dir in ["a", "b", "c/d", "c/e"] {
            for file in ["1.txt", "2.txt", "3.bin"] {
                temp.child(format!("{dir}/{file}")).write_str(file).unwrap();
            }
        }

        let sequential = build(&temp, |b| b);
        let parallel = build(&temp, |b| b.parallel(true));

        assert_eq!(paths(&sequential), paths(&parallel));
        assert_eq!(sequential.stats(), parallel.stats());
        assert_eq!(sequential.size, parallel.size);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_skipped() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("dir/file.txt").write_str("x").unwrap();
        std::os::unix::fs::symlink(temp.path(), temp.child("dir/back").path()).unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(paths(&root), vec!["dir", "dir/file.txt"]);
        assert_eq!(root.stats().unwrap().symlinks_skipped, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_symlink_inside_root_is_followed() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("real/file.txt").write_str("x").unwrap();
        std::os::unix::fs::symlink(temp.child("real").path(), temp.child("alias").path()).unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(
            paths(&root),
            vec!["alias", "alias/file.txt", "real", "real/file.txt"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_symlink_outside_root_is_skipped() {
        let outside = assert_fs::TempDir::new().unwrap();
        outside.child("secret.txt").write_str("secret").unwrap();

        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.txt").write_str("a").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.child("escape").path()).unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(paths(&root), vec!["a.txt"]);
        assert_eq!(root.stats().unwrap().symlinks_skipped, 1);
    }

    #[test]
    fn test_invalid_pattern_fails_before_walking() {
        let temp = assert_fs::TempDir::new().unwrap();
        let query = IngestionQuery::builder()
            .root_dir(temp.path())
            .include("src/[")
            .build()
            .unwrap();

        assert!(TreeBuilder::new(&query).unwrap_err().is_invalid_pattern());
    }

    #[test]
    fn test_removed_root_is_invalid_root() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("gone").create_dir_all().unwrap();
        let query = IngestionQuery::builder()
            .root_dir(temp.child("gone").path())
            .build()
            .unwrap();
        let builder = TreeBuilder::new(&query).unwrap();

        fs::remove_dir(temp.child("gone").path()).unwrap();
        assert!(builder.build().unwrap_err().is_invalid_root());
    }

    #[test]
    fn test_repository_gitignore_applies_below_subpath() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".gitignore").write_str("*.log\n").unwrap();
        temp.child("README.md").write_str("readme").unwrap();
        temp.child("pkg/a.log").write_str("log").unwrap();
        temp.child("pkg/b.rs").write_str("fn b() {}").unwrap();

        let root = build(&temp, |b| b.subpath("pkg"));

        assert_eq!(root.name, "pkg");
        assert_eq!(paths(&root), vec!["b.rs"]);
        // Siblings of the subpath are never scanned.
        assert_eq!(root.stats().unwrap().files_scanned, 1);
    }

    #[test]
    fn test_nested_gitignore_is_respected() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("pkg/.gitignore").write_str("gen/\n*.tmp\n").unwrap();
        temp.child("pkg/gen/out.rs").write_str("generated").unwrap();
        temp.child("pkg/scratch.tmp").write_str("tmp").unwrap();
        temp.child("pkg/lib.rs").write_str("lib").unwrap();
        temp.child("other/scratch.tmp").write_str("kept").unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(
            paths(&root),
            vec!["other", "other/scratch.tmp", "pkg", "pkg/lib.rs"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_excluded_target_is_excluded() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".env").write_str("API_KEY=secret").unwrap();
        temp.child("node_modules/x.js").write_str("nm").unwrap();
        temp.child("a.txt").write_str("a").unwrap();
        std::os::unix::fs::symlink(temp.child(".env").path(), temp.child("env.txt").path())
            .unwrap();
        std::os::unix::fs::symlink(
            temp.child("node_modules").path(),
            temp.child("deps").path(),
        )
        .unwrap();

        let root = build(&temp, |b| b);

        assert_eq!(paths(&root), vec!["a.txt"]);
        assert!(root
            .content_files()
            .iter()
            .all(|file| file.text().is_none_or(|text| !text.contains("secret"))));

        let env = root.children().iter().find(|c| c.name == "env.txt").unwrap();
        assert!(matches!(env.kind, NodeKind::Skipped(SkipReason::Excluded)));

        let stats = root.stats().unwrap();
        assert_eq!(stats.excluded, 2);
        assert_eq!(stats.dirs_pruned, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_is_unreadable_and_walk_continues() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.txt").write_str("a").unwrap();
        let _listener =
            std::os::unix::net::UnixListener::bind(temp.child("app.sock").path()).unwrap();

        for parallel in [false, true] {
            let root = build(&temp, |b| b.parallel(parallel));

            assert_eq!(paths(&root), vec!["a.txt"]);
            let stats = root.stats().unwrap();
            assert_eq!(stats.unreadable, 1);
            assert_eq!(stats.text_files, 1);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unlistable_directory_is_unreadable_and_walk_continues() {
        use std::os::unix::fs::PermissionsExt;

        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.txt").write_str("a").unwrap();
        temp.child("locked/inner.txt").write_str("inner").unwrap();
        let locked = temp.child("locked");
        fs::set_permissions(locked.path(), fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not stop a privileged user.
        if fs::read_dir(locked.path()).is_ok() {
            fs::set_permissions(locked.path(), fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let root = build(&temp, |b| b);
        fs::set_permissions(locked.path(), fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(paths(&root), vec!["a.txt"]);
        let stats = root.stats().unwrap();
        assert_eq!(stats.unreadable, 1);
        assert_eq!(stats.text_files, 1);
    }
}
