//! Rendering of the summary, tree and content artifacts.
//!
//! Output depends only on the node tree and the query: no timestamps and no
//! absolute paths, so the same tree always renders to the same bytes.

use crate::{
    classify::BINARY_PLACEHOLDER,
    error::{Error, Result},
    node::{Node, NodeKind, ScanStats},
    query::{IngestionQuery, OutputFormat},
    template::{FileView, TemplateContext, TemplateEngine, CUSTOM_TEMPLATE, XML_TEMPLATE},
    token::{format_token_count, TokenEstimator},
};
use serde::Serialize;
use std::fmt::Write as _;

const SEPARATOR: &str = "================================================";

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

/// Result of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Human readable (or JSON) summary
    pub summary: String,

    /// Directory tree diagram
    pub tree: String,

    /// Concatenated file contents
    pub content: String,

    /// Files reached by the walk
    pub files_scanned: usize,

    /// Files included with their text
    pub files_included: usize,

    /// Bytes of all files present in the digest
    pub total_bytes: u64,

    /// Token estimate for `tree` plus `content`
    pub estimated_tokens: usize,

    /// Counters of the whole walk
    pub stats: ScanStats,
}

impl Digest {
    /// Returns the persisted form of the digest: tree, a blank line, content.
    #[must_use]
    pub fn to_text(&self) -> String {
        format!("{}\n{}", self.tree, self.content)
    }
}

#[derive(Serialize)]
struct SummaryView<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subpath: Option<&'a str>,
    files_included: usize,
    binary_placeholders: usize,
    total_bytes: u64,
    estimated_tokens: usize,
    stats: &'a ScanStats,
}

/// Renders a node tree into a [`Digest`].
pub struct DigestRenderer {
    format: OutputFormat,
    source: String,
    branch: Option<String>,
    subpath: Option<String>,
    tokenizer: Box<dyn TokenEstimator>,
    templates: TemplateEngine,
}

impl std::fmt::Debug for DigestRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestRenderer")
            .field("format", &self.format)
            .field("source", &self.source)
            .field("branch", &self.branch)
            .field("subpath", &self.subpath)
            .finish_non_exhaustive()
    }
}

impl DigestRenderer {
    /// Creates a renderer for the query's format.
    ///
    /// # Errors
    ///
    /// Returns an error if the custom template cannot be compiled.
    pub fn new(query: &IngestionQuery) -> Result<Self> {
        let custom = match query.format {
            OutputFormat::Custom => Some(
                query
                    .template_path
                    .as_deref()
                    .ok_or_else(|| Error::config("Custom format requires template_path"))?,
            ),
            _ => None,
        };

        Ok(Self {
            format: query.format,
            source: query.source_name(),
            branch: query.branch.clone(),
            subpath: query.subpath.clone(),
            tokenizer: query.tokenizer.create(),
            templates: TemplateEngine::new(custom)?,
        })
    }

    /// Renders the three artifacts for `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a template or JSON serialization fails.
    pub fn render(&self, root: &Node) -> Result<Digest> {
        let stats = root.stats().copied().unwrap_or_default();
        let tree = render_tree(root);
        let files = file_views(root);

        let content = match self.format {
            OutputFormat::Text => render_text_content(&files),
            OutputFormat::Json => serde_json::to_string_pretty(&files)?,
            OutputFormat::Xml => self.render_template(XML_TEMPLATE, &tree, &files, &stats)?,
            OutputFormat::Custom => self.render_template(CUSTOM_TEMPLATE, &tree, &files, &stats)?,
        };

        let estimated_tokens = self.tokenizer.estimate(&format!("{tree}\n{content}"));

        let summary = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&SummaryView {
                source: &self.source,
                branch: self.branch.as_deref(),
                subpath: self.subpath.as_deref(),
                files_included: stats.text_files,
                binary_placeholders: stats.binary_files,
                total_bytes: stats.included_bytes,
                estimated_tokens,
                stats: &stats,
            })?,
            _ => self.render_summary(&stats, estimated_tokens),
        };

        Ok(Digest {
            summary,
            tree,
            content,
            files_scanned: stats.files_scanned,
            files_included: stats.text_files,
            total_bytes: stats.included_bytes,
            estimated_tokens,
            stats,
        })
    }

    fn render_summary(&self, stats: &ScanStats, estimated_tokens: usize) -> String {
        let mut summary = format!("Source: {}\n", self.source);
        if let Some(branch) = &self.branch {
            let _ = writeln!(summary, "Branch: {branch}");
        }
        if let Some(subpath) = &self.subpath {
            let _ = writeln!(summary, "Subpath: {subpath}");
        }

        let _ = writeln!(summary, "Files included: {}", stats.text_files);
        let _ = writeln!(summary, "Binary placeholders: {}", stats.binary_files);
        let _ = writeln!(summary, "Total bytes: {}", stats.included_bytes);
        let _ = writeln!(
            summary,
            "Skipped: {} excluded, {} oversized, {} unreadable, {} symlinks, {} directories pruned",
            stats.excluded,
            stats.oversized,
            stats.unreadable,
            stats.symlinks_skipped,
            stats.dirs_pruned
        );
        let _ = writeln!(
            summary,
            "Estimated tokens: {}",
            format_token_count(estimated_tokens)
        );

        summary
    }

    fn render_template(
        &self,
        template: &str,
        tree: &str,
        files: &[FileView<'_>],
        stats: &ScanStats,
    ) -> Result<String> {
        let ctx = TemplateContext {
            source: &self.source,
            branch: self.branch.as_deref(),
            subpath: self.subpath.as_deref(),
            tree,
            files,
            stats,
        };
        self.templates.render(template, &ctx)
    }
}

fn file_views(root: &Node) -> Vec<FileView<'_>> {
    root.content_files()
        .into_iter()
        .map(|file| FileView {
            path: &file.path,
            size: file.size,
            binary: matches!(file.kind, NodeKind::BinaryPlaceholder),
            content: file.text().unwrap_or(BINARY_PLACEHOLDER),
        })
        .collect()
}

/// Draws the rendered nodes below `root`, one per line.
pub(crate) fn render_tree(root: &Node) -> String {
    let mut out = format!("{}/\n", root.name);
    render_children(root, "", &mut out);
    out
}

fn render_children(node: &Node, prefix: &str, out: &mut String) {
    let visible: Vec<&Node> = node.children().iter().filter(|c| c.is_rendered()).collect();

    for (i, child) in visible.iter().enumerate() {
        let last = i + 1 == visible.len();
        out.push_str(prefix);
        out.push_str(if last { LAST_BRANCH } else { BRANCH });
        out.push_str(&child.name);

        if child.is_dir() {
            out.push_str("/\n");
            let next = format!("{prefix}{}", if last { SPACE } else { PIPE });
            render_children(child, &next, out);
        } else {
            out.push('\n');
        }
    }
}

fn render_text_content(files: &[FileView<'_>]) -> String {
    let mut out = String::new();

    for file in files {
        out.push_str("FILE: ");
        out.push_str(file.path);
        out.push('\n');
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str(file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(SEPARATOR);
        out.push_str("\n\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SkipReason;
    use assert_fs::prelude::*;

    fn text(path: &str, content: &str) -> Node {
        let name = path.rsplit('/').next().unwrap();
        Node::file(
            name,
            path,
            content.len() as u64,
            NodeKind::TextFile {
                content: content.to_string(),
            },
        )
    }

    fn sample_tree() -> Node {
        let mut stats = ScanStats::default();
        stats.record_file(&NodeKind::TextFile { content: String::new() }, 6);
        stats.record_file(&NodeKind::BinaryPlaceholder, 3);
        stats.record_file(&NodeKind::TextFile { content: String::new() }, 2);
        stats.record_file(&NodeKind::Skipped(SkipReason::Oversized), 5000);

        let sub = Node::directory(
            "sub",
            "sub",
            vec![
                text("sub/c.txt", "c\n"),
                Node::file(
                    "big.txt",
                    "sub/big.txt",
                    5000,
                    NodeKind::Skipped(SkipReason::Oversized),
                ),
            ],
            ScanStats::default(),
        );
        Node::directory(
            "repo",
            "",
            vec![
                text("a.txt", "hello\n"),
                Node::file("b.bin", "b.bin", 3, NodeKind::BinaryPlaceholder),
                sub,
            ],
            stats,
        )
    }

    fn renderer(temp: &assert_fs::TempDir, format: OutputFormat) -> DigestRenderer {
        let query = IngestionQuery::builder()
            .root_dir(temp.path())
            .source("octo/repo")
            .format(format)
            .build()
            .unwrap();
        DigestRenderer::new(&query).unwrap()
    }

    #[test]
    fn test_render_tree() {
        let tree = render_tree(&sample_tree());
        assert_eq!(tree, "repo/\n├── a.txt\n├── b.bin\n└── sub/\n    └── c.txt\n");
    }

    #[test]
    fn test_render_nested_tree_connectors() {
        let stats = ScanStats::default();
        let inner = Node::directory("lib", "src/lib", vec![text("src/lib/x.rs", "x")], stats);
        let src = Node::directory("src", "src", vec![inner, text("src/main.rs", "m")], stats);
        let root = Node::directory("proj", "", vec![src, text("z.md", "z")], stats);

        assert_eq!(
            render_tree(&root),
            "proj/\n├── src/\n│   ├── lib/\n│   │   └── x.rs\n│   └── main.rs\n└── z.md\n"
        );
    }

    #[test]
    fn test_render_empty_tree() {
        let temp = assert_fs::TempDir::new().unwrap();
        let root = Node::directory("empty", "", Vec::new(), ScanStats::default());

        let digest = renderer(&temp, OutputFormat::Text).render(&root).unwrap();
        assert_eq!(digest.tree, "empty/\n");
        assert_eq!(digest.content, "");
        assert_eq!(digest.files_included, 0);
    }

    #[test]
    fn test_render_text_content() {
        let temp = assert_fs::TempDir::new().unwrap();
        let digest = renderer(&temp, OutputFormat::Text).render(&sample_tree()).unwrap();

        let sep = "=".repeat(48);
        let expected = format!(
            "FILE: a.txt\n{sep}\nhello\n{sep}\n\n\
             FILE: b.bin\n{sep}\n[Binary file]\n{sep}\n\n\
             FILE: sub/c.txt\n{sep}\nc\n{sep}\n\n"
        );
        assert_eq!(digest.content, expected);
        assert!(!digest.content.contains("big.txt"));
        assert_eq!(digest.to_text(), format!("{}\n{}", digest.tree, expected));
    }

    #[test]
    fn test_render_text_summary() {
        let temp = assert_fs::TempDir::new().unwrap();
        let digest = renderer(&temp, OutputFormat::Text).render(&sample_tree()).unwrap();

        assert!(digest.summary.starts_with("Source: octo/repo\n"));
        assert!(!digest.summary.contains("Branch:"));
        assert!(digest.summary.contains("Files included: 2\n"));
        assert!(digest.summary.contains("Binary placeholders: 1\n"));
        assert!(digest.summary.contains("Total bytes: 11\n"));
        assert!(digest.summary.contains(
            "Skipped: 0 excluded, 1 oversized, 0 unreadable, 0 symlinks, 0 directories pruned\n"
        ));
        assert!(digest.summary.contains("Estimated tokens: "));
        assert_eq!(digest.files_scanned, 4);
        assert_eq!(digest.total_bytes, 11);
        assert!(digest.estimated_tokens > 0);
    }

    #[test]
    fn test_render_json() {
        let temp = assert_fs::TempDir::new().unwrap();
        let digest = renderer(&temp, OutputFormat::Json).render(&sample_tree()).unwrap();

        let summary: serde_json::Value = serde_json::from_str(&digest.summary).unwrap();
        assert_eq!(summary["source"], "octo/repo");
        assert_eq!(summary["files_included"], 2);
        assert_eq!(summary["stats"]["oversized"], 1);
        assert_eq!(summary["stats"]["text_files"], 2);
        assert!(summary.get("skipped").is_none());
        assert!(summary.get("branch").is_none());

        let files: serde_json::Value = serde_json::from_str(&digest.content).unwrap();
        let files = files.as_array().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0]["path"], "a.txt");
        assert_eq!(files[0]["content"], "hello\n");
        assert_eq!(files[1]["binary"], true);
        assert_eq!(files[1]["content"], BINARY_PLACEHOLDER);

        assert_eq!(digest.tree, render_tree(&sample_tree()));
    }

    #[test]
    fn test_render_xml() {
        let temp = assert_fs::TempDir::new().unwrap();
        let digest = renderer(&temp, OutputFormat::Xml).render(&sample_tree()).unwrap();

        assert!(digest.content.contains(r#"<file path="sub/c.txt""#));
        assert!(digest.content.contains(r#"binary="true">[Binary file]</file>"#));
        assert!(digest.summary.starts_with("Source: octo/repo\n"));
    }

    #[test]
    fn test_render_custom() {
        let temp = assert_fs::TempDir::new().unwrap();
        let template = temp.child("digest.tera");
        template
            .write_str("{% for file in ctx.files %}{{ file.path }}\n{% endfor %}")
            .unwrap();

        let query = IngestionQuery::builder()
            .root_dir(temp.path())
            .format(OutputFormat::Custom)
            .template_path(template.path())
            .branch("main")
            .build()
            .unwrap();
        let digest = DigestRenderer::new(&query).unwrap().render(&sample_tree()).unwrap();

        assert_eq!(digest.content, "a.txt\nb.bin\nsub/c.txt\n");
        assert!(digest.summary.contains("Branch: main\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let temp = assert_fs::TempDir::new().unwrap();
        let r = renderer(&temp, OutputFormat::Text);
        assert_eq!(r.render(&sample_tree()).unwrap(), r.render(&sample_tree()).unwrap());
    }
}
