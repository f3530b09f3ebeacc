use crate::{
    error::{Error, Result},
    node::ScanStats,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera, Value};

/// Name of the built-in XML content template.
pub(crate) const XML_TEMPLATE: &str = "xml";

/// Name under which a user template is registered.
pub(crate) const CUSTOM_TEMPLATE: &str = "custom";

/// Digest data exposed to templates under `ctx`.
#[derive(Debug, Serialize)]
pub(crate) struct TemplateContext<'a> {
    pub(crate) source: &'a str,
    pub(crate) branch: Option<&'a str>,
    pub(crate) subpath: Option<&'a str>,
    pub(crate) tree: &'a str,
    pub(crate) files: &'a [FileView<'a>],
    pub(crate) stats: &'a ScanStats,
}

/// One file with content, as seen by templates and the JSON format.
#[derive(Debug, Serialize)]
pub(crate) struct FileView<'a> {
    pub(crate) path: &'a str,
    pub(crate) size: u64,
    pub(crate) binary: bool,
    pub(crate) content: &'a str,
}

/// Tera engine holding the built-in template and an optional user template.
pub(crate) struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Creates the engine, registering `custom` under [`CUSTOM_TEMPLATE`].
    ///
    /// # Errors
    ///
    /// Returns an error if a template fails to compile.
    pub(crate) fn new(custom: Option<&Path>) -> Result<Self> {
        let mut tera = Tera::default();

        tera.add_raw_template(XML_TEMPLATE, include_str!("../templates/xml.tera"))
            .map_err(|e| Error::template(XML_TEMPLATE, e))?;

        if let Some(path) = custom {
            tera.add_template_file(path, Some(CUSTOM_TEMPLATE))
                .map_err(|e| Error::template(path.display().to_string(), e))?;
        }

        Self::register_filters(&mut tera);

        Ok(Self { tera })
    }

    fn register_filters(tera: &mut Tera) {
        tera.register_filter("xml_escape", Self::xml_escape_filter);
        tera.register_filter("json_encode", Self::json_encode_filter);
        tera.register_filter("truncate_lines", Self::truncate_lines_filter);
        tera.register_filter("detect_language", Self::detect_language_filter);
    }

    fn xml_escape_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(value.as_str().map_or_else(
            || value.clone(),
            |s| Value::String(xml_escape(s)),
        ))
    }

    fn json_encode_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let pretty = args
            .get("pretty")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let result = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        result
            .map(Value::String)
            .map_err(|e| tera::Error::msg(format!("Failed to encode JSON: {e}")))
    }

    /// Keeps the first `max` lines (default 1000) and notes how many were cut.
    fn truncate_lines_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let max_lines = args
            .get("max")
            .and_then(Value::as_u64)
            .and_then(|max| usize::try_from(max).ok())
            .unwrap_or(1000);

        let Some(s) = value.as_str() else {
            return Ok(value.clone());
        };

        let lines: Vec<&str> = s.lines().collect();
        if lines.len() <= max_lines {
            return Ok(value.clone());
        }

        Ok(Value::String(format!(
            "{}\n... ({} more lines omitted)",
            lines[..max_lines].join("\n"),
            lines.len() - max_lines
        )))
    }

    fn detect_language_filter(
        value: &Value,
        _args: &HashMap<String, Value>,
    ) -> tera::Result<Value> {
        let language = value.as_str().map_or("", detect_language);
        Ok(Value::String(language.to_string()))
    }

    /// Renders `template` with `ctx` bound to the digest data.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub(crate) fn render(&self, template: &str, ctx: &TemplateContext<'_>) -> Result<String> {
        let mut context = Context::new();
        context.insert("ctx", ctx);

        self.tera
            .render(template, &context)
            .map_err(|e| Error::template(template, e))
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Maps a file path to a code-fence language name by extension.
fn detect_language(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.to_ascii_lowercase().as_str() {
        "dockerfile" => return "dockerfile",
        "makefile" => return "makefile",
        _ => {}
    }

    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return "";
    };

    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" => "bash",
        "ps1" => "powershell",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "xml" => "xml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" => "ini",
        "md" | "markdown" => "markdown",
        "sql" => "sql",
        "graphql" | "gql" => "graphql",
        "proto" => "protobuf",
        _ => "",
    }
}
