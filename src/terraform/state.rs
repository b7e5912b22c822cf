//! Reading and writing the JSON documents the CLI works on, and rendering
//! Terraform import blocks.

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::error::ProviderError;

/// Loads a config or state document. Both must be JSON objects.
pub fn load_document(path: &Path) -> Result<JsonValue, ProviderError> {
    let raw = std::fs::read_to_string(path)?;
    let doc: JsonValue = serde_json::from_str(&raw)?;
    if !doc.is_object() {
        return Err(ProviderError::Config(format!(
            "{}: expected a JSON object",
            path.display()
        )));
    }
    Ok(doc)
}

pub fn save_document(path: &Path, doc: &JsonValue) -> Result<(), ProviderError> {
    let mut raw = serde_json::to_string_pretty(doc)?;
    raw.push('\n');
    std::fs::write(path, raw)?;
    tracing::debug!(path = %path.display(), "state written");
    Ok(())
}

fn hcl_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders an `import` block for `<type_name>.<name>`.
pub fn import_block(type_name: &str, name: &str, id: &str) -> String {
    format!(
        "import {{\n  to = {}.{}\n  id = {}\n}}\n",
        type_name,
        name,
        hcl_string(id)
    )
}
