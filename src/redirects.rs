//! Redirect accrual for moved content.
//!
//! Redirects are only computed for nodes created in the current run, collected
//! in a [`RedirectSet`] and written at the end of the run. Writing is
//! idempotent: an old path that already redirects somewhere is left alone.

use std::collections::HashSet;

use anyhow::Result;

use crate::fields::ensure_list;
use crate::models::{normalize_path, DestinationNode, RedirectRecord, SourceDocument};
use crate::store::RedirectStore;

/// Redirects implied by a newly created node.
///
/// One record when the legacy path differs from the node's new path, plus one
/// per `redirect_from` entry (string or list).
pub fn accrue_redirects(
    doc: &SourceDocument,
    legacy_path: &str,
    node: &DestinationNode,
) -> Vec<RedirectRecord> {
    let new_path = normalize_path(&node.url_path);
    let mut records = Vec::new();

    let mut push = |old: &str| {
        let old_path = normalize_path(old);
        if old_path != new_path && old_path != "/" {
            records.push(RedirectRecord {
                old_path,
                node_id: node.id,
            });
        }
    };

    push(legacy_path);

    if let Some(value) = doc.frontmatter.get("redirect_from") {
        for item in ensure_list(value) {
            match item.as_str().map(str::trim) {
                Some(old) if !old.is_empty() => push(old),
                _ => {}
            }
        }
    }

    records
}

/// Redirects accumulated during a run, de-duplicated by old path.
#[derive(Debug, Default)]
pub struct RedirectSet {
    records: Vec<RedirectRecord>,
    seen: HashSet<String>,
}

/// Outcome of writing redirects to the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    pub created: u64,
    pub existing: u64,
}

impl RedirectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records; the first record for an old path wins.
    pub fn extend(&mut self, records: impl IntoIterator<Item = RedirectRecord>) {
        for record in records {
            if self.seen.insert(record.old_path.clone()) {
                self.records.push(record);
            } else {
                tracing::debug!(old_path = %record.old_path, "duplicate redirect ignored");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RedirectRecord] {
        &self.records
    }

    /// Write every record for `site_id`. Existing redirects are counted, not
    /// treated as errors.
    pub async fn flush<S: RedirectStore + ?Sized>(&self, store: &S, site_id: i64) -> Result<FlushSummary> {
        let mut summary = FlushSummary::default();
        for record in &self.records {
            if store.create_redirect(site_id, record).await? {
                summary.created += 1;
            } else {
                summary.existing += 1;
            }
        }
        Ok(summary)
    }
}
