use crate::error::{Error, Result};
use flate2::{write::GzEncoder, Compression};
use std::{
    ffi::OsString,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Writes a rendered digest to `path` and returns the final path.
///
/// With `compress` the text is gzip-compressed and `.gz` is appended to the
/// file name unless it already ends in `.gz`. Missing parent directories are
/// created.
///
/// # Process
///
/// 1. Writes content to a temporary file next to the target
/// 2. Syncs the temporary file to disk
/// 3. Atomically renames it to the target path
///
/// A reader never observes a partially written digest.
///
/// # Errors
///
/// Returns [`Error::Io`] if any filesystem operation fails.
pub fn write_digest(text: &str, path: &Path, compress: bool) -> Result<PathBuf> {
    let path = if compress {
        gz_path(path)
    } else {
        path.to_path_buf()
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = with_suffix(&path, ".tmp");
    if let Err(e) = write_file(&temp_path, text, compress) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(&path, e)
    })?;

    info!(
        "Wrote digest to {} ({} bytes{})",
        path.display(),
        text.len(),
        if compress { ", gzip" } else { "" }
    );
    Ok(path)
}

fn write_file(path: &Path, text: &str, compress: bool) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;

    let file = if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(text.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        encoder.finish().map_err(|e| Error::io(path, e))?
    } else {
        let mut file = file;
        file.write_all(text.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        file
    };

    file.sync_all().map_err(|e| Error::io(path, e))?;
    debug!("Synced {}", path.display());
    Ok(())
}

fn gz_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "gz") {
        path.to_path_buf()
    } else {
        with_suffix(path, ".gz")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
