//! Document reader: splits a legacy file into front-matter and markdown body.
//!
//! The legacy export delimits front-matter with `---` lines. Anything after
//! the second delimiter is body, re-joined so that horizontal rules written
//! as `---` survive.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Number, Value};

use crate::error::MigrateError;
use crate::models::{Frontmatter, SourceDocument};

const DELIMITER: &str = "---";

/// Read and split a document from disk.
///
/// I/O failures surface as plain errors; a corrupt front-matter block
/// surfaces as [`MigrateError::Parse`] inside the returned error.
pub fn read_document(path: &Path) -> Result<SourceDocument> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_document(&text, path)?)
}

/// Split raw text into a [`SourceDocument`].
///
/// Content that does not open with a delimited block is all body, with empty
/// front-matter.
pub fn parse_document(text: &str, path: &Path) -> Result<SourceDocument, MigrateError> {
    let trimmed = text.trim_start_matches('\u{feff}');
    let blocks: Vec<&str> = trimmed.split(DELIMITER).collect();

    if blocks.len() < 3 || !blocks[0].trim().is_empty() {
        tracing::debug!(path = %path.display(), "document has no front-matter");
        return Ok(SourceDocument {
            frontmatter: Frontmatter::new(),
            body: text.to_string(),
            source_path: path.to_path_buf(),
        });
    }

    let frontmatter = parse_frontmatter(blocks[1], path)?;
    let body = blocks[2..].join(DELIMITER);

    Ok(SourceDocument {
        frontmatter,
        body,
        source_path: path.to_path_buf(),
    })
}

fn parse_frontmatter(block: &str, path: &Path) -> Result<Frontmatter, MigrateError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(block).map_err(|e| MigrateError::parse(path, e.to_string()))?;

    match yaml_to_json(yaml) {
        Value::Null => Ok(Frontmatter::new()),
        Value::Object(map) => Ok(map),
        other => Err(MigrateError::parse(
            path,
            format!("expected a mapping, found {}", json_type_name(&other)),
        )),
    }
}

/// Convert YAML into the JSON model used for front-matter.
///
/// Non-string mapping keys are stringified; tagged values are unwrapped.
pub fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                map.insert(yaml_key(k), yaml_to_json(v));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
