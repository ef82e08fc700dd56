//! Declarative content map: which legacy files become which page type, where.
//!
//! Each `[[content_map]]` entry names a glob relative to the source root, the
//! destination type and parent section, and how front-matter is mapped. The
//! TOML keys `auto_map`, `field_map`, `computed` and `static_fields` are
//! lowered into an ordered list of [`FieldRule`]s by [`ContentMapEntry::rules`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::fields::{ComputedField, FieldRule};
use crate::schema::PageType;

#[derive(Debug, Deserialize, Clone)]
pub struct ContentMapEntry {
    /// Glob relative to the source root, e.g. `_posts/*.md`.
    pub pattern: String,
    pub destination_type: PageType,
    /// Path of the parent section below the home page; `/` is the home page.
    #[serde(default = "default_parent")]
    pub parent: String,
    /// Legacy URL directory the generator published these files under.
    #[serde(default)]
    pub legacy_parent_path: Option<String>,
    #[serde(default = "default_auto_map")]
    pub auto_map: bool,
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    #[serde(default)]
    pub computed: Vec<ComputedField>,
    #[serde(default)]
    pub static_fields: BTreeMap<String, Value>,
}

fn default_parent() -> String {
    "/".to_string()
}
fn default_auto_map() -> bool {
    true
}

/// A file matched by an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the source root, `/`-separated.
    pub relative: String,
}

impl ContentMapEntry {
    /// Field rules in application order.
    pub fn rules(&self) -> Vec<FieldRule> {
        let mut rules = Vec::new();
        if self.auto_map {
            rules.push(FieldRule::Auto);
        }
        for (from, to) in &self.field_map {
            rules.push(FieldRule::Rename {
                from: from.clone(),
                to: to.clone(),
            });
        }
        for function in &self.computed {
            rules.push(FieldRule::Computed {
                function: *function,
            });
        }
        for (field, value) in &self.static_fields {
            rules.push(FieldRule::Static {
                field: field.clone(),
                value: value.clone(),
            });
        }
        rules
    }

    pub fn validate(&self) -> Result<()> {
        if !self.destination_type.is_migratable() {
            bail!(
                "destination_type '{}' cannot be migrated into",
                self.destination_type
            );
        }
        matcher(&self.pattern)?;

        for to in self.field_map.values() {
            if self.destination_type.field_kind(to).is_none() {
                bail!(
                    "field_map target '{}' is not a field of '{}'",
                    to,
                    self.destination_type
                );
            }
        }
        for field in self.static_fields.keys() {
            if self.destination_type.field_kind(field).is_none() {
                bail!(
                    "static field '{}' is not a field of '{}'",
                    field,
                    self.destination_type
                );
            }
        }
        Ok(())
    }

    /// Files under `root` matching the pattern with one of `extensions`.
    pub fn scan(&self, root: &Path, extensions: &[String]) -> Result<Vec<SourceFile>> {
        scan_glob(root, &self.pattern, extensions)
    }
}

/// Files under `root` whose relative path matches `pattern` and whose
/// extension is one of `extensions`, sorted lexically by relative path.
pub fn scan_glob(root: &Path, pattern: &str, extensions: &[String]) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        bail!("Source root does not exist: {}", root.display());
    }
    let matcher = matcher(pattern)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_extension(path, extensions) {
            continue;
        }
        let relative = relative_path(path, root);
        if !matcher.is_match(&relative) {
            continue;
        }
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Entries to run. An empty `only` selects everything; otherwise each
/// pattern must name an entry exactly.
pub fn select<'a>(entries: &'a [ContentMapEntry], only: &[String]) -> Result<Vec<&'a ContentMapEntry>> {
    if only.is_empty() {
        return Ok(entries.iter().collect());
    }
    for pattern in only {
        if !entries.iter().any(|e| &e.pattern == pattern) {
            bail!("No content_map entry with pattern '{}'", pattern);
        }
    }
    Ok(entries
        .iter()
        .filter(|e| only.contains(&e.pattern))
        .collect())
}

fn matcher(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| e.trim_start_matches('.') == ext)
        })
        .unwrap_or(false)
}

pub fn relative_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}
