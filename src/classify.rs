use crate::node::{NodeKind, SkipReason};
use crate::pattern::MatchDecision;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Marker written instead of the bytes of a binary file.
pub const BINARY_PLACEHOLDER: &str = "[Binary file]";

/// Number of leading bytes inspected by the binary heuristic.
const SAMPLE_SIZE: usize = 8192;

/// Minimum share of ASCII bytes for the Latin-1 fallback decoding.
const ASCII_THRESHOLD: f64 = 0.85;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How a file enters the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Readable text
    Text {
        /// Decoded content
        content: String,
        /// Size in bytes
        size: u64,
    },
    /// Readable, but not text; rendered as [`BINARY_PLACEHOLDER`]
    Binary {
        /// Size in bytes
        size: u64,
    },
    /// No content
    Skip {
        /// Why the file was skipped
        reason: SkipReason,
        /// Size in bytes, zero when it could not be determined
        size: u64,
    },
}

impl Classification {
    /// Returns the size recorded for the file.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Text { size, .. } | Self::Binary { size } | Self::Skip { size, .. } => *size,
        }
    }

    /// Converts the classification into a node kind.
    #[must_use]
    pub fn into_node_kind(self) -> NodeKind {
        match self {
            Self::Text { content, .. } => NodeKind::TextFile { content },
            Self::Binary { .. } => NodeKind::BinaryPlaceholder,
            Self::Skip { reason, .. } => NodeKind::Skipped(reason),
        }
    }
}

/// Decides per file whether it is skipped, included as text, or included
/// as a binary placeholder.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    root_real: PathBuf,
    max_file_size: u64,
}

impl FileClassifier {
    /// Creates a classifier for files below `root_real`.
    ///
    /// `root_real` must already be canonical.
    #[must_use]
    pub const fn new(root_real: PathBuf, max_file_size: u64) -> Self {
        Self {
            root_real,
            max_file_size,
        }
    }

    /// Classifies one file.
    ///
    /// Content is only read for paths the matcher included, and only after
    /// the size check passed.
    #[must_use]
    pub fn classify(&self, path: &Path, decision: MatchDecision) -> Classification {
        match decision {
            MatchDecision::Excluded => return skip(SkipReason::Excluded, lstat_size(path)),
            MatchDecision::NotIncluded => return skip(SkipReason::NotIncluded, lstat_size(path)),
            MatchDecision::Included => {}
        }

        let real = match fs::canonicalize(path) {
            Ok(real) => real,
            Err(e) => {
                warn!("Cannot resolve {}: {}", path.display(), e);
                return skip(SkipReason::Unreadable, 0);
            }
        };

        if !real.starts_with(&self.root_real) {
            trace!("Symlink {} leaves the root ({})", path.display(), real.display());
            return skip(SkipReason::SymlinkEscape, 0);
        }

        let size = match fs::metadata(&real) {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            Ok(_) => {
                debug!("Skipping special file {}", path.display());
                return skip(SkipReason::Unreadable, 0);
            }
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                return skip(SkipReason::Unreadable, 0);
            }
        };

        if size > self.max_file_size {
            trace!("Skipping oversized file {} ({} bytes)", path.display(), size);
            return skip(SkipReason::Oversized, size);
        }

        let bytes = match read_capped(&real, self.max_file_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return skip(SkipReason::Unreadable, size);
            }
        };

        // The file grew between stat and read.
        if bytes.len() as u64 > self.max_file_size {
            return skip(SkipReason::Oversized, bytes.len() as u64);
        }

        let size = bytes.len() as u64;
        if is_likely_binary(&bytes) {
            return Classification::Binary { size };
        }

        decode_text(&bytes).map_or(Classification::Binary { size }, |content| {
            Classification::Text { content, size }
        })
    }
}

const fn skip(reason: SkipReason, size: u64) -> Classification {
    Classification::Skip { reason, size }
}

fn lstat_size(path: &Path) -> u64 {
    fs::symlink_metadata(path).map_or(0, |m| m.len())
}

fn read_capped(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Returns true if the leading sample of `bytes` contains a null byte.
#[must_use]
pub(crate) fn is_likely_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SAMPLE_SIZE)];
    memchr::memchr(0, sample).is_some()
}

/// Decodes file bytes as text.
///
/// UTF-8 (with an optional BOM) is tried first. Otherwise the bytes are read
/// as Latin-1, provided the leading sample is mostly ASCII.
#[must_use]
pub(crate) fn decode_text(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }

    let sample = &bytes[..bytes.len().min(SAMPLE_SIZE)];
    let ascii_count = sample.iter().filter(|b| b.is_ascii()).count();
    #[allow(clippy::cast_precision_loss)]
    let ascii_ratio = ascii_count as f64 / sample.len() as f64;

    (ascii_ratio >= ASCII_THRESHOLD).then(|| bytes.iter().map(|&b| char::from(b)).collect())
}
