//! Core data models used throughout the migration.
//!
//! These types represent the legacy documents read from disk, the nodes and
//! assets held by the destination store, and the lookup tables that connect
//! the two passes of a run.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::PageType;

/// Parsed front-matter. Keys absent or extra are expected.
pub type Frontmatter = Map<String, Value>;

/// Field values destined for a node, keyed by destination field name.
pub type FieldSet = Map<String, Value>;

/// A legacy markdown document, read once per run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub frontmatter: Frontmatter,
    pub body: String,
    pub source_path: PathBuf,
}

impl SourceDocument {
    /// Front-matter value as a trimmed, non-empty string, if it is a scalar.
    pub fn str_field(&self, key: &str) -> Option<String> {
        match self.frontmatter.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// `published: false` explicitly marks the document as a draft.
    pub fn is_unpublished(&self) -> bool {
        matches!(self.frontmatter.get("published"), Some(Value::Bool(false)))
    }
}

/// Legacy location and destination slug of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Slug component of the legacy URL, before slugification.
    pub old_slug: String,
    /// Normalized legacy URL path, e.g. `/updates/my-post`.
    pub legacy_path: String,
    /// Destination slug, always valid for the page tree.
    pub slug: String,
}

/// A node of the destination page tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub page_type: PageType,
    pub slug: String,
    pub title: String,
    /// Public path relative to the site home, e.g. `/updates/my-post`.
    pub url_path: String,
    pub live: bool,
    pub fields: FieldSet,
}

impl DestinationNode {
    fn frontmatter_blob(&self) -> Option<Value> {
        match self.fields.get("frontmatter")? {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => Some(other.clone()),
        }
    }

    /// Legacy path recorded in the persisted front-matter blob, if any.
    pub fn recorded_old_path(&self) -> Option<String> {
        self.frontmatter_blob()?
            .get("old_path")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Source file recorded in the persisted front-matter blob, if any.
    pub fn recorded_source_path(&self) -> Option<String> {
        self.frontmatter_blob()?
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// A stored image, deduplicated by title.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
}

/// An image about to be persisted.
#[derive(Debug, Clone)]
pub struct NewImageAsset {
    pub title: String,
    pub file_path: String,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
    pub bytes: Vec<u8>,
}

/// A legacy URL that should forward to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedirectRecord {
    pub old_path: String,
    pub node_id: i64,
}

/// Legacy path → destination node, filled by the skeleton pass.
///
/// Keys are normalized with [`normalize_path`], so lookups tolerate missing
/// leading slashes and trailing slashes.
#[derive(Debug, Default, Clone)]
pub struct PathIndex {
    nodes: HashMap<String, DestinationNode>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, legacy_path: &str, node: DestinationNode) {
        self.nodes.insert(normalize_path(legacy_path), node);
    }

    pub fn get(&self, legacy_path: &str) -> Option<&DestinationNode> {
        self.nodes.get(&normalize_path(legacy_path))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Normalize a URL path: one leading slash, no trailing slash, no empty or
/// `.` segments, `..` resolved against the preceding segment.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
