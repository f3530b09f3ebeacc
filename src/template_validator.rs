use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tera::Tera;

/// Maximum template file size (1MB)
const MAX_TEMPLATE_SIZE: u64 = 1024 * 1024;

/// Variables a digest template must read
const REQUIRED_VARIABLES: &[&str] = &["files"];

/// Context variables a template may read
const OPTIONAL_VARIABLES: &[&str] = &["source", "branch", "subpath", "tree", "stats"];

/// Rejects external Tera templates before any traversal starts.
pub(crate) struct TemplateValidator;

impl TemplateValidator {
    /// Validates an external template file.
    ///
    /// The file must exist, be at most 1 MiB, compile with Tera and read
    /// `ctx.files`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File doesn't exist or can't be read
    /// - File is too large
    /// - Template has syntax errors
    /// - Template is missing required variables
    pub(crate) fn validate_template(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Template file not found",
                ),
            ));
        }

        if !path.is_file() {
            return Err(Error::template_validation(
                path.to_string_lossy().to_string(),
                "Path is not a file",
            ));
        }

        let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if metadata.len() > MAX_TEMPLATE_SIZE {
            return Err(Error::template_validation(
                path.to_string_lossy().to_string(),
                format!(
                    "Template file too large: {} bytes (max: {} bytes)",
                    metadata.len(),
                    MAX_TEMPLATE_SIZE
                ),
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        if content.trim().is_empty() {
            return Err(Error::template_validation(
                path.to_string_lossy().to_string(),
                "Template file is empty",
            ));
        }

        let mut temp_tera = Tera::default();
        temp_tera
            .add_raw_template("validation", &content)
            .map_err(|e| {
                Error::template_validation(
                    path.to_string_lossy().to_string(),
                    format!("Template syntax error: {e}"),
                )
            })?;

        Self::check_required_variables(&content, path)?;
        Self::check_optional_variables(&content);

        Ok(())
    }

    /// Textual search for each required variable; a template that only reaches
    /// the files through an alias is rejected.
    fn check_required_variables(content: &str, path: &Path) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_VARIABLES
            .iter()
            .filter(|var| !uses_variable(content, var))
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(Error::template_validation(
                path.to_string_lossy().to_string(),
                format!(
                    "Template may be missing required variables: {}. \
                    Digest templates should iterate over ctx.files.",
                    missing.join(", ")
                ),
            ));
        }

        Ok(())
    }

    fn check_optional_variables(content: &str) {
        for var in OPTIONAL_VARIABLES {
            if !uses_variable(content, var) {
                tracing::debug!("Template does not use optional variable: {}", var);
            }
        }
    }
}

fn uses_variable(content: &str, var: &str) -> bool {
    let patterns = [
        format!("ctx.{var}"),
        format!("{{{{{var} "),
        format!("{{{{ {var}"),
        format!("in {var}"),
    ];

    patterns.iter().any(|pattern| content.contains(pattern))
}
