//! Front-matter statistics for the legacy export.
//!
//! Used by `cmig stats` while writing a content map: for every glob it shows
//! which front-matter keys occur, in how many files, and their most common
//! values. Nothing is written to the store.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::content_map::scan_glob;
use crate::fields::ensure_list;
use crate::reader::read_document;

const MAX_VALUE_LEN: usize = 48;

/// Occurrences of a single front-matter key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStats {
    /// Files in which the key is present.
    pub documents: u64,
    /// Scalar values (list items counted individually) by occurrence.
    pub values: BTreeMap<String, u64>,
}

impl KeyStats {
    /// The `n` most frequent values, ties broken lexically.
    pub fn top_values(&self, n: usize) -> Vec<(&str, u64)> {
        let mut values: Vec<(&str, u64)> = self
            .values
            .iter()
            .map(|(v, count)| (v.as_str(), *count))
            .collect();
        values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        values.truncate(n);
        values
    }
}

/// Statistics for one glob.
#[derive(Debug, Clone, Default)]
pub struct GlobStats {
    pub pattern: String,
    pub files: u64,
    /// Files whose front-matter could not be parsed.
    pub unreadable: u64,
    pub keys: BTreeMap<String, KeyStats>,
}

/// Collect key statistics for every file matching `pattern` under `root`.
pub fn collect_stats(root: &Path, pattern: &str, extensions: &[String]) -> Result<GlobStats> {
    let mut stats = GlobStats {
        pattern: pattern.to_string(),
        ..Default::default()
    };

    for file in scan_glob(root, pattern, extensions)? {
        stats.files += 1;
        let doc = match read_document(&file.path) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(path = %file.relative, error = %e, "unreadable front-matter");
                stats.unreadable += 1;
                continue;
            }
        };

        for (key, value) in &doc.frontmatter {
            let entry = stats.keys.entry(key.clone()).or_default();
            entry.documents += 1;
            for item in ensure_list(value) {
                if let Some(label) = value_label(&item) {
                    *entry.values.entry(label).or_insert(0) += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Short display form of a scalar; maps and nulls are not tallied.
fn value_label(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null | Value::Object(_) | Value::Array(_) => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_VALUE_LEN {
        let cut: String = text.chars().take(MAX_VALUE_LEN).collect();
        Some(format!("{}…", cut))
    } else {
        Some(text)
    }
}

/// Run the stats command over `patterns`, or every content map pattern when
/// none are given, and print the result.
pub fn run_stats(config: &Config, patterns: &[String], top: usize) -> Result<()> {
    let patterns: Vec<String> = if patterns.is_empty() {
        config
            .content_map
            .iter()
            .map(|e| e.pattern.clone())
            .collect()
    } else {
        patterns.to_vec()
    };

    if patterns.is_empty() {
        println!("No patterns given and no content_map entries configured.");
        return Ok(());
    }

    for pattern in &patterns {
        let stats = collect_stats(&config.source.root, pattern, &config.source.extensions)?;
        print_stats(&stats, top);
    }
    Ok(())
}

fn print_stats(stats: &GlobStats, top: usize) {
    println!("{}", stats.pattern);
    println!("  files: {}", stats.files);
    if stats.unreadable > 0 {
        println!("  unreadable: {}", stats.unreadable);
    }
    if stats.keys.is_empty() {
        println!();
        return;
    }

    println!("  {:<28} {:>6}   {}", "KEY", "FILES", "TOP VALUES");
    println!("  {}", "-".repeat(72));

    let mut keys: Vec<(&String, &KeyStats)> = stats.keys.iter().collect();
    keys.sort_by(|a, b| b.1.documents.cmp(&a.1.documents).then_with(|| a.0.cmp(b.0)));

    for (key, key_stats) in keys {
        let values = key_stats
            .top_values(top)
            .iter()
            .map(|(v, n)| format!("{} ({})", v, n))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {:<28} {:>6}   {}", key, key_stats.documents, values);
    }
    println!();
}
