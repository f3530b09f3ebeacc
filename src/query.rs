use crate::error::{Error, Result};
use crate::template_validator::TemplateValidator;
use crate::token::TokenizerKind;
use std::path::{Component, Path, PathBuf};

/// Default maximum size of a single ingested file (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Output format of the rendered digest.
///
/// Formats only change how the three artifacts are wrapped and escaped;
/// the set of files and their order are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain text with stable delimiters
    #[default]
    Text,
    /// JSON summary object and JSON file array
    Json,
    /// XML `<files>` document
    Xml,
    /// User supplied Tera template
    Custom,
}

impl OutputFormat {
    /// Returns the lowercase name of this format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Custom => "custom",
        }
    }
}

/// Resolved parameters of a single ingestion run.
///
/// Use [`IngestionQuery::builder()`] to construct a validated query. The
/// engine only ever reads it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct IngestionQuery {
    /// Resolved local directory (a clone or a plain directory)
    pub root_dir: PathBuf,

    /// Directory below `root_dir` where ingestion starts
    pub subpath: Option<String>,

    /// Include globs, OR-ed; empty means everything
    pub include_patterns: Vec<String>,

    /// Exclude globs, OR-ed; always win over includes
    pub exclude_patterns: Vec<String>,

    /// Files larger than this many bytes are skipped
    pub max_file_size: u64,

    /// Output format
    pub format: OutputFormat,

    /// Template used by [`OutputFormat::Custom`]
    pub template_path: Option<PathBuf>,

    /// Opaque source identity shown in the summary
    pub source: Option<String>,

    /// Opaque branch identity shown in the summary
    pub branch: Option<String>,

    /// Tokenizer used for the summary's token estimate
    pub tokenizer: TokenizerKind,

    /// Classify files and assemble subtrees on a worker pool
    pub parallel: bool,

    /// Skip paths ignored by `.gitignore` files from `root_dir` down
    pub respect_gitignore: bool,
}

impl IngestionQuery {
    /// Creates a new query builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use repo_digest::IngestionQuery;
    ///
    /// let query = IngestionQuery::builder()
    ///     .root_dir("./my-project")
    ///     .include("src/**")
    ///     .exclude("**/*.lock")
    ///     .max_file_size(512 * 1024)
    ///     .build()
    ///     .expect("valid query");
    /// ```
    #[must_use]
    pub fn builder() -> IngestionQueryBuilder {
        IngestionQueryBuilder::default()
    }

    /// Validates the query.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Root directory doesn't exist or is not a directory
    /// - The subpath escapes the root or doesn't exist
    /// - `max_file_size` is zero
    /// - Custom format is selected without a valid template
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.exists() {
            return Err(Error::invalid_root(&self.root_dir, "does not exist"));
        }

        if !self.root_dir.is_dir() {
            return Err(Error::invalid_root(&self.root_dir, "not a directory"));
        }

        if let Some(subpath) = &self.subpath {
            let escapes = Path::new(subpath)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(Error::config(format!(
                    "subpath must stay inside the root: {subpath}"
                )));
            }

            let ingest_root = self.ingest_root();
            if !ingest_root.is_dir() {
                return Err(Error::invalid_root(ingest_root, "subpath is not a directory"));
            }
        }

        if self.max_file_size == 0 {
            return Err(Error::config("max_file_size must be greater than 0"));
        }

        match (self.format, &self.template_path) {
            (OutputFormat::Custom, None) => {
                return Err(Error::config(
                    "Custom format requires template_path. \
                    Use IngestionQuery::builder().template_path(\"./digest.tera\")",
                ));
            }
            (OutputFormat::Custom, Some(path)) => TemplateValidator::validate_template(path)?,
            (_, Some(_)) => {
                tracing::warn!(
                    "template_path is only used with OutputFormat::Custom. Current format: {}",
                    self.format.as_str()
                );
            }
            (_, None) => {}
        }

        Ok(())
    }

    /// Returns the directory where traversal starts.
    #[must_use]
    pub fn ingest_root(&self) -> PathBuf {
        match &self.subpath {
            Some(subpath) => self.root_dir.join(subpath),
            None => self.root_dir.clone(),
        }
    }

    /// Returns the source identity shown in the summary.
    ///
    /// Falls back to the root directory name when no identity was supplied.
    #[must_use]
    pub fn source_name(&self) -> String {
        if let Some(source) = &self.source {
            return source.clone();
        }

        self.root_dir
            .canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map_or_else(
                || self.root_dir.display().to_string(),
                |name| name.to_string_lossy().into_owned(),
            )
    }
}

/// Builder for creating an [`IngestionQuery`].
#[derive(Debug, Default)]
pub struct IngestionQueryBuilder {
    root_dir: Option<PathBuf>,
    subpath: Option<String>,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    max_file_size: Option<u64>,
    format: Option<OutputFormat>,
    template_path: Option<PathBuf>,
    source: Option<String>,
    branch: Option<String>,
    tokenizer: Option<TokenizerKind>,
    parallel: bool,
    respect_gitignore: Option<bool>,
}

impl IngestionQueryBuilder {
    /// Sets the root directory to ingest.
    #[must_use]
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(path.into());
        self
    }

    /// Restricts ingestion to a directory below the root.
    ///
    /// Leading and trailing slashes are ignored; `"/"` means the whole root.
    #[must_use]
    pub fn subpath(mut self, subpath: impl Into<String>) -> Self {
        let subpath = subpath.into();
        let trimmed = subpath.trim_matches('/');
        self.subpath = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Adds an include pattern.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    /// Adds several include patterns.
    #[must_use]
    pub fn include_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Adds an exclude pattern.
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Adds several exclude patterns.
    #[must_use]
    pub fn exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Sets the maximum file size in bytes.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the path to an external Tera template.
    ///
    /// Required by [`OutputFormat::Custom`]; the template renders the content
    /// artifact and sees the digest under `ctx`.
    #[must_use]
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Sets the source identity shown in the summary.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the branch identity shown in the summary.
    #[must_use]
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the tokenizer used for the token estimate.
    #[must_use]
    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = Some(kind);
        self
    }

    /// Enables or disables parallel traversal.
    #[must_use]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Enables or disables `.gitignore` handling.
    #[must_use]
    pub fn respect_gitignore(mut self, enabled: bool) -> Self {
        self.respect_gitignore = Some(enabled);
        self
    }

    /// Builds the query.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<IngestionQuery> {
        let query = IngestionQuery {
            root_dir: self.root_dir.unwrap_or_else(|| PathBuf::from(".")),
            subpath: self.subpath,
            include_patterns: self.include_patterns,
            exclude_patterns: self.exclude_patterns,
            max_file_size: self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
            format: self.format.unwrap_or_default(),
            template_path: self.template_path,
            source: self.source,
            branch: self.branch,
            tokenizer: self.tokenizer.unwrap_or(TokenizerKind::Simple),
            parallel: self.parallel,
            respect_gitignore: self.respect_gitignore.unwrap_or(true),
        };

        query.validate()?;
        Ok(query)
    }
}
