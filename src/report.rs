//! Old-to-new URL report.
//!
//! Lists every migrated page with the file it came from, the URL it was
//! published at by the legacy generator and its new URL. The report is read
//! back from the store, so it reflects all runs, not only the last one.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::store::PageStore;

/// One CSV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub old_filepath: String,
    pub old_url: String,
    pub new_url: String,
    pub page_type: String,
}

/// Rows for every node that records its source file, ordered by that file.
///
/// `legacy_base_url` is prefixed to old paths to make absolute URLs.
pub async fn build_report<S: PageStore + ?Sized>(
    store: &S,
    legacy_base_url: Option<&str>,
) -> Result<Vec<ReportRow>> {
    let mut rows = Vec::new();
    for node in store.list_nodes().await? {
        let Some(old_filepath) = node.recorded_source_path() else {
            continue;
        };
        let old_path = node.recorded_old_path().unwrap_or_default();
        rows.push(ReportRow {
            old_filepath,
            old_url: absolute(legacy_base_url, &old_path),
            new_url: node.url_path.clone(),
            page_type: node.page_type.to_string(),
        });
    }
    rows.sort_by(|a, b| a.old_filepath.cmp(&b.old_filepath));
    Ok(rows)
}

fn absolute(base: Option<&str>, path: &str) -> String {
    match base {
        Some(base) if !path.is_empty() => {
            format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
        }
        _ => path.to_string(),
    }
}

/// Write rows as CSV with a header line.
pub fn write_report<W: Write>(rows: &[ReportRow], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row).context("Failed to write report row")?;
    }
    // csv only emits the header with the first record
    if rows.is_empty() {
        writer.write_record(["old_filepath", "old_url", "new_url", "page_type"])?;
    }
    writer.flush()?;
    Ok(())
}
