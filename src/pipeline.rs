use crate::{
    error::Result,
    query::IngestionQuery,
    render::{Digest, DigestRenderer},
    tree::TreeBuilder,
};
use std::time::Instant;
use tracing::{info, instrument};

/// Runs one ingestion: walk the root, then render the digest.
///
/// Either a complete [`Digest`] or an error comes out; there is no partial
/// output.
#[derive(Debug)]
pub struct Pipeline {
    query: IngestionQuery,
    tree_builder: TreeBuilder,
    renderer: DigestRenderer,
}

impl Pipeline {
    /// Creates a new pipeline for the given query.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Query validation fails
    /// - A pattern fails to compile
    /// - The custom template fails to compile
    pub fn new(query: IngestionQuery) -> Result<Self> {
        query.validate()?;

        let tree_builder = TreeBuilder::new(&query)?;
        let renderer = DigestRenderer::new(&query)?;

        Ok(Self {
            query,
            tree_builder,
            renderer,
        })
    }

    /// Returns the query this pipeline runs.
    #[must_use]
    pub const fn query(&self) -> &IngestionQuery {
        &self.query
    }

    /// Executes the pipeline and returns the digest.
    ///
    /// # Process
    ///
    /// 1. **Walk**: builds the node tree below the ingestion root
    /// 2. **Render**: produces the summary, tree and content artifacts
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed or rendering fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use repo_digest::{IngestionQuery, Pipeline};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let query = IngestionQuery::builder()
    ///     .root_dir("./src")
    ///     .build()?;
    ///
    /// let digest = Pipeline::new(query)?.run()?;
    /// println!("{}", digest.summary);
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self), fields(root_dir = %self.query.ingest_root().display()))]
    pub fn run(self) -> Result<Digest> {
        let start_time = Instant::now();

        info!("Stage 1/2: Walking directory tree...");
        let walk_start = Instant::now();
        let root = self.tree_builder.build()?;
        let stats = root.stats().copied().unwrap_or_default();
        info!(
            "✓ Walked {} files ({} text, {} binary, {} skipped) in {:.2}s",
            stats.files_scanned,
            stats.text_files,
            stats.binary_files,
            stats.skipped(),
            walk_start.elapsed().as_secs_f64()
        );

        info!("Stage 2/2: Rendering digest ({})...", self.query.format.as_str());
        let render_start = Instant::now();
        let digest = self.renderer.render(&root)?;
        info!(
            "✓ Rendered {} bytes of content in {:.2}s",
            digest.content.len(),
            render_start.elapsed().as_secs_f64()
        );

        info!(
            "✓ Ingestion completed in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(digest)
    }
}
