use serde::Serialize;

/// Why a file contributed no content to the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Matched an exclude pattern (or the default baseline)
    Excluded,
    /// Missed a non-empty include set
    NotIncluded,
    /// Larger than the query's max file size
    Oversized,
    /// Probing failed with an I/O or permission error
    Unreadable,
    /// Symlink resolving outside the ingestion root
    SymlinkEscape,
    /// Directory symlink pointing back at one of its ancestors
    SymlinkLoop,
}

/// Inclusion decision recorded for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    /// Directory or text file present in the digest
    Included,
    /// Pattern, symlink or baseline exclusion
    ExcludedByPattern,
    /// Over the size limit
    ExcludedBySize,
    /// Content replaced by the binary placeholder
    ExcludedBinary,
    /// I/O failure while probing
    ExcludedUnreadable,
}

/// Counters collected while walking a subtree.
///
/// Every directory node carries the stats of its whole subtree, including
/// entries that were dropped from the tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Files reached by the walk (pruned directories are not entered)
    pub files_scanned: usize,

    /// Files included with their text
    pub text_files: usize,

    /// Files included as binary placeholders
    pub binary_files: usize,

    /// Files skipped by patterns
    pub excluded: usize,

    /// Files skipped for size
    pub oversized: usize,

    /// Entries that could not be read
    pub unreadable: usize,

    /// Symlinks leaving the root or looping
    pub symlinks_skipped: usize,

    /// Directories skipped without descending
    pub dirs_pruned: usize,

    /// Bytes of text and binary files present in the digest
    pub included_bytes: u64,
}

impl ScanStats {
    /// Records the outcome of a single file.
    pub fn record_file(&mut self, kind: &NodeKind, size: u64) {
        self.files_scanned += 1;
        match kind {
            NodeKind::TextFile { .. } => {
                self.text_files += 1;
                self.included_bytes += size;
            }
            NodeKind::BinaryPlaceholder => {
                self.binary_files += 1;
                self.included_bytes += size;
            }
            NodeKind::Skipped(reason) => self.record_skip(*reason),
            NodeKind::Directory { .. } => {}
        }
    }

    /// Records a skipped entry.
    pub fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Excluded | SkipReason::NotIncluded => self.excluded += 1,
            SkipReason::Oversized => self.oversized += 1,
            SkipReason::Unreadable => self.unreadable += 1,
            SkipReason::SymlinkEscape | SkipReason::SymlinkLoop => self.symlinks_skipped += 1,
        }
    }

    /// Adds the counters of a finished subtree.
    pub fn merge(&mut self, other: &Self) {
        self.files_scanned += other.files_scanned;
        self.text_files += other.text_files;
        self.binary_files += other.binary_files;
        self.excluded += other.excluded;
        self.oversized += other.oversized;
        self.unreadable += other.unreadable;
        self.symlinks_skipped += other.symlinks_skipped;
        self.dirs_pruned += other.dirs_pruned;
        self.included_bytes += other.included_bytes;
    }

    /// Total number of skipped entries across all categories.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.excluded + self.oversized + self.unreadable + self.symlinks_skipped
    }
}

/// What a node is.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Directory with children sorted by name
    Directory {
        /// Attached children
        children: Vec<Node>,
        /// Counters of the whole subtree
        stats: ScanStats,
    },
    /// File included with its decoded text
    TextFile {
        /// Decoded file content
        content: String,
    },
    /// File included as a placeholder
    BinaryPlaceholder,
    /// File that contributes no content
    Skipped(SkipReason),
}

/// One entry of the ingested tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// File or directory name; the root uses the ingestion root's name
    pub name: String,

    /// Root-relative POSIX path; empty for the root
    pub path: String,

    /// File size, or the sum of included descendant files for directories
    pub size: u64,

    /// Node kind
    pub kind: NodeKind,
}

impl Node {
    /// Creates a directory node, sorting its children and summing their size.
    #[must_use]
    pub fn directory(
        name: impl Into<String>,
        path: impl Into<String>,
        mut children: Vec<Self>,
        stats: ScanStats,
    ) -> Self {
        children.sort_by(|a, b| a.name.cmp(&b.name));
        let size = children
            .iter()
            .filter(|child| child.is_rendered())
            .map(|child| child.size)
            .sum();

        Self {
            name: name.into(),
            path: path.into(),
            size,
            kind: NodeKind::Directory { children, stats },
        }
    }

    /// Creates a file node.
    #[must_use]
    pub fn file(
        name: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        kind: NodeKind,
    ) -> Self {
        debug_assert!(!matches!(kind, NodeKind::Directory { .. }));
        Self {
            name: name.into(),
            path: path.into(),
            size,
            kind,
        }
    }

    /// Returns true if this is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Returns true if this node shows up in the tree diagram.
    #[must_use]
    pub const fn is_rendered(&self) -> bool {
        !matches!(self.kind, NodeKind::Skipped(_))
    }

    /// Returns true if this file contributes to the content artifact.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::TextFile { .. } | NodeKind::BinaryPlaceholder
        )
    }

    /// Returns the inclusion decision for this node.
    #[must_use]
    pub const fn inclusion(&self) -> Inclusion {
        match &self.kind {
            NodeKind::Directory { .. } | NodeKind::TextFile { .. } => Inclusion::Included,
            NodeKind::BinaryPlaceholder => Inclusion::ExcludedBinary,
            NodeKind::Skipped(reason) => match reason {
                SkipReason::Excluded
                | SkipReason::NotIncluded
                | SkipReason::SymlinkEscape
                | SkipReason::SymlinkLoop => Inclusion::ExcludedByPattern,
                SkipReason::Oversized => Inclusion::ExcludedBySize,
                SkipReason::Unreadable => Inclusion::ExcludedUnreadable,
            },
        }
    }

    /// Returns the children of a directory; files have none.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match &self.kind {
            NodeKind::Directory { children, .. } => children,
            _ => &[],
        }
    }

    /// Returns the subtree counters of a directory.
    #[must_use]
    pub const fn stats(&self) -> Option<&ScanStats> {
        match &self.kind {
            NodeKind::Directory { stats, .. } => Some(stats),
            _ => None,
        }
    }

    /// Returns the text of an included text file.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::TextFile { content } => Some(content),
            _ => None,
        }
    }

    /// Collects files with content in depth-first, name-sorted order.
    #[must_use]
    pub fn content_files(&self) -> Vec<&Self> {
        let mut files = Vec::new();
        self.collect_content_files(&mut files);
        files
    }

    fn collect_content_files<'a>(&'a self, files: &mut Vec<&'a Self>) {
        for child in self.children() {
            if child.is_dir() {
                child.collect_content_files(files);
            } else if child.has_content() {
                files.push(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(name: &str, content: &str) -> Node {
        Node::file(
            name,
            name,
            content.len() as u64,
            NodeKind::TextFile {
                content: content.to_string(),
            },
        )
    }

    #[test]
    fn test_directory_sorts_children_and_sums_size() {
        let oversized = NodeKind::Skipped(SkipReason::Oversized);
        let skipped = Node::file("big.txt", "big.txt", 5000, oversized);
        let dir = Node::directory(
            "root",
            "",
            vec![text("b.txt", "bb"), skipped, text("a.txt", "a")],
            ScanStats::default(),
        );

        let names: Vec<_> = dir.children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "big.txt"]);
        assert_eq!(dir.size, 3);
    }

    #[test]
    fn test_inclusion_mapping() {
        assert_eq!(text("a", "x").inclusion(), Inclusion::Included);
        let bin = Node::file("b", "b", 4, NodeKind::BinaryPlaceholder);
        assert_eq!(bin.inclusion(), Inclusion::ExcludedBinary);
        assert!(bin.has_content());

        let cases = [
            (SkipReason::Excluded, Inclusion::ExcludedByPattern),
            (SkipReason::NotIncluded, Inclusion::ExcludedByPattern),
            (SkipReason::SymlinkEscape, Inclusion::ExcludedByPattern),
            (SkipReason::Oversized, Inclusion::ExcludedBySize),
            (SkipReason::Unreadable, Inclusion::ExcludedUnreadable),
        ];
        for (reason, expected) in cases {
            let node = Node::file("f", "f", 0, NodeKind::Skipped(reason));
            assert_eq!(node.inclusion(), expected);
            assert!(!node.is_rendered());
            assert!(node.children().is_empty());
        }
    }

    #[test]
    fn test_stats_record_and_merge() {
        let mut stats = ScanStats::default();
        stats.record_file(&NodeKind::TextFile { content: String::new() }, 10);
        stats.record_file(&NodeKind::BinaryPlaceholder, 4);
        stats.record_file(&NodeKind::Skipped(SkipReason::Oversized), 5000);
        stats.record_skip(SkipReason::SymlinkLoop);

        let mut total = ScanStats {
            dirs_pruned: 1,
            ..ScanStats::default()
        };
        total.merge(&stats);

        assert_eq!(total.files_scanned, 3);
        assert_eq!(total.text_files, 1);
        assert_eq!(total.binary_files, 1);
        assert_eq!(total.oversized, 1);
        assert_eq!(total.symlinks_skipped, 1);
        assert_eq!(total.dirs_pruned, 1);
        assert_eq!(total.included_bytes, 14);
        assert_eq!(total.skipped(), 2);
    }

    #[test]
    fn test_content_files_order() {
        let sub = Node::directory("sub", "sub", vec![text("sub/c.txt", "c")], ScanStats::default());
        let root = Node::directory(
            "root",
            "",
            vec![sub, text("z.txt", "z"), text("a.txt", "a")],
            ScanStats::default(),
        );

        let paths: Vec<_> = root.content_files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/c.txt", "z.txt"]);
    }
}
