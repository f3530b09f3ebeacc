use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use repo_digest::{IngestionQuery, OutputFormat, TokenizerKind, DEFAULT_MAX_FILE_SIZE};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "repo-digest",
    version,
    author,
    about = "Turn a source tree into a single text digest for LLM prompts",
    long_about = "Turn a source tree into a single text digest for LLM prompts.\n\n\
    The digest has three parts: a summary, a directory tree and the concatenated \
    contents of every included file. Output is deterministic: the same tree always \
    produces the same bytes.\n\n\
    USAGE EXAMPLES:\n  \
      # Digest the current directory to stdout\n  \
      repo-digest\n\n  \
      # Only Python sources, without tests, written to a file\n  \
      repo-digest ./project -i '**/*.py' -e '**/test_*.py' -o digest.txt\n\n  \
      # Compressed JSON digest of a subdirectory\n  \
      repo-digest ./project --subpath src -f json -o digest.json --compress"
)]
struct Cli {
    /// Directory to ingest
    #[arg(default_value = ".", value_name = "SOURCE")]
    source: PathBuf,

    /// Include pattern (repeatable); only matching files are ingested
    #[arg(short, long = "include", value_name = "PATTERN")]
    include: Vec<String>,

    /// Exclude pattern (repeatable); always wins over includes
    #[arg(short, long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Maximum size of a single file in bytes
    #[arg(short = 's', long, default_value_t = DEFAULT_MAX_FILE_SIZE, value_name = "BYTES")]
    max_size: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: CliFormat,

    /// Path to a Tera template (requires --format custom)
    ///
    /// The template renders the content part and sees the digest under
    /// `ctx`: `ctx.files` (path, size, binary, content), `ctx.tree`,
    /// `ctx.source`, `ctx.branch`, `ctx.subpath` and `ctx.stats`.
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Write the digest to a file instead of stdout ("-" means stdout)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Gzip the output file (not available with "-o -")
    #[arg(long, requires = "output")]
    compress: bool,

    /// Process directory subtrees on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Branch name shown in the summary
    #[arg(long, value_name = "NAME")]
    branch: Option<String>,

    /// Start ingestion at this directory below SOURCE
    #[arg(long, value_name = "PATH")]
    subpath: Option<String>,

    /// Source name shown in the summary (defaults to the directory name)
    #[arg(long, value_name = "NAME")]
    source_name: Option<String>,

    /// Do not apply .gitignore files
    #[arg(long)]
    no_gitignore: bool,

    /// Tokenizer used for the token estimate
    #[arg(long, value_enum, default_value = "simple")]
    tokenizer: CliTokenizer,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Returns the output file, or `None` when the digest goes to stdout.
    fn output_file(&self) -> Option<&Path> {
        self.output.as_deref().filter(|path| path.as_os_str() != "-")
    }

    fn check(&self) -> Result<(), clap::Error> {
        if self.compress && self.output_file().is_none() {
            return Err(Self::command().error(
                ErrorKind::ArgumentConflict,
                "--compress needs an output file and cannot write to stdout ('-o -')",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliFormat {
    Text,
    Json,
    Xml,
    Custom,
}

impl From<CliFormat> for OutputFormat {
    fn from(f: CliFormat) -> Self {
        match f {
            CliFormat::Text => Self::Text,
            CliFormat::Json => Self::Json,
            CliFormat::Xml => Self::Xml,
            CliFormat::Custom => Self::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTokenizer {
    Simple,
    Enhanced,
}

impl From<CliTokenizer> for TokenizerKind {
    fn from(t: CliTokenizer) -> Self {
        match t {
            CliTokenizer::Simple => Self::Simple,
            CliTokenizer::Enhanced => Self::Enhanced,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = cli.check() {
        e.exit();
    }

    setup_tracing(cli.verbose);

    let output = cli.output_file().map(Path::to_path_buf);

    let mut builder = IngestionQuery::builder()
        .root_dir(&cli.source)
        .include_patterns(cli.include)
        .exclude_patterns(cli.exclude)
        .max_file_size(cli.max_size)
        .format(cli.format.into())
        .tokenizer(cli.tokenizer.into())
        .parallel(cli.parallel)
        .respect_gitignore(!cli.no_gitignore);

    if let Some(template) = cli.template {
        builder = builder.template_path(template);
    }
    if let Some(subpath) = cli.subpath {
        builder = builder.subpath(subpath);
    }
    if let Some(branch) = cli.branch {
        builder = builder.branch(branch);
    }
    if let Some(name) = cli.source_name {
        builder = builder.source(name);
    }

    let query = builder.build().context("Failed to build query")?;

    let digest = repo_digest::ingest(query)
        .with_context(|| format!("Failed to ingest {}", cli.source.display()))?;

    match output {
        Some(path) => {
            let written = repo_digest::write_digest(&digest.to_text(), &path, cli.compress)
                .context("Failed to write digest")?;
            print!("{}", digest.summary);
            println!("Output written to: {}", written.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(digest.to_text().as_bytes())
                .and_then(|()| stdout.flush())
                .context("Failed to write digest to stdout")?;
            eprint!("{}", digest.summary);
        }
    }

    Ok(())
}

fn setup_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::new("repo_digest=info"),
        1 => EnvFilter::new("repo_digest=debug"),
        _ => EnvFilter::new("repo_digest=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_needs_an_output_file() {
        let cli = Cli::try_parse_from(["repo-digest", "-o", "-", "--compress"]).unwrap();
        assert_eq!(cli.output_file(), None);
        assert_eq!(cli.check().unwrap_err().kind(), ErrorKind::ArgumentConflict);

        let cli = Cli::try_parse_from(["repo-digest", "-o", "out.txt", "--compress"]).unwrap();
        assert_eq!(cli.output_file(), Some(Path::new("out.txt")));
        assert!(cli.check().is_ok());

        assert!(Cli::try_parse_from(["repo-digest", "--compress"]).is_err());
    }

    #[test]
    fn test_stdout_without_compress_is_fine() {
        let cli = Cli::try_parse_from(["repo-digest", "-o", "-"]).unwrap();
        assert_eq!(cli.output_file(), None);
        assert!(cli.check().is_ok());
    }
}
