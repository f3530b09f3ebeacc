//! # repo-digest
//!
//! Turns a source tree into a single deterministic text digest for feeding
//! into a language model.
//!
//! ## Features
//!
//! - Include/exclude globs with a built-in baseline of ignored directories
//! - `.gitignore` support, nested files included
//! - Size limits and binary detection before any content is read
//! - Byte-identical output across runs, sequential or parallel
//! - Text, JSON, XML or custom Tera output
//!
//! ## Quick Start
//!
//! ```no_run
//! use repo_digest::{IngestionQuery, OutputFormat};
//!
//! # fn main() -> anyhow::Result<()> {
//! let query = IngestionQuery::builder()
//!     .root_dir("./my-project")
//!     .exclude("**/*.lock")
//!     .format(OutputFormat::Text)
//!     .build()?;
//!
//! let digest = repo_digest::ingest(query)?;
//! println!("{}", digest.summary);
//! println!("{}", digest.to_text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **`PatternMatcher`**: decides inclusion for a relative path
//! 2. **`FileClassifier`**: skips, reads as text or marks as binary
//! 3. **`TreeBuilder`**: walks the root into an ordered node tree
//! 4. **`DigestRenderer`**: renders summary, tree and content

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod classify;
mod error;
mod node;
mod pattern;
mod pipeline;
mod query;
mod render;
mod template;
mod template_validator;
mod token;
mod tree;
mod writer;

pub use classify::{Classification, FileClassifier, BINARY_PLACEHOLDER};
pub use error::{Error, Result};
pub use node::{Inclusion, Node, NodeKind, ScanStats, SkipReason};
pub use pattern::{MatchDecision, PatternMatcher, DEFAULT_EXCLUDES};
pub use pipeline::Pipeline;
pub use query::{IngestionQuery, IngestionQueryBuilder, OutputFormat, DEFAULT_MAX_FILE_SIZE};
pub use render::{Digest, DigestRenderer};
pub use token::{format_token_count, TokenEstimator, TokenizerKind};
pub use tree::TreeBuilder;
pub use writer::write_digest;

/// Ingests the query's root and returns the rendered digest.
///
/// This is the main entry point for the library.
///
/// # Errors
///
/// Returns an error if:
/// - The query is invalid
/// - A pattern or template fails to compile
/// - The root cannot be listed
///
/// # Examples
///
/// ```no_run
/// use repo_digest::{ingest, IngestionQuery};
///
/// # fn main() -> anyhow::Result<()> {
/// let query = IngestionQuery::builder()
///     .root_dir(".")
///     .include("src/**/*.rs")
///     .build()?;
///
/// let digest = ingest(query)?;
/// assert!(digest.tree.ends_with('\n'));
/// # Ok(())
/// # }
/// ```
pub fn ingest(query: IngestionQuery) -> Result<Digest> {
    Pipeline::new(query)?.run()
}

/// Runs [`ingest`] on tokio's blocking pool.
///
/// # Errors
///
/// Returns the errors of [`ingest`], or [`Error::Task`] if the blocking
/// task panicked or was cancelled.
#[cfg(feature = "async")]
pub async fn ingest_async(query: IngestionQuery) -> Result<Digest> {
    tokio::task::spawn_blocking(move || ingest(query))
        .await
        .map_err(|e| Error::task(e.to_string()))?
}
