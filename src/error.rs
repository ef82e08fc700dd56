//! Classified per-document failures.
//!
//! Command boundaries use [`anyhow::Result`]; the migration pipeline needs to
//! tell a skipped document from a corrupt one from a tree conflict, so those
//! outcomes are typed here and matched on by [`crate::ingest`].

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::PageType;

/// Errors raised while migrating a single document or entry.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The front-matter block is present but is not a valid YAML mapping.
    #[error("corrupt front-matter in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A slug is already taken under the parent by a node of another type.
    #[error(
        "slug '{slug}' under node {parent_id} is a {existing} page, but {requested} is required; manual intervention required"
    )]
    TypeConflict {
        parent_id: i64,
        slug: String,
        existing: PageType,
        requested: PageType,
    },

    /// The document cannot be migrated and is excluded from the run.
    #[error("skipped {path}: {reason}")]
    Skipped { path: PathBuf, reason: String },

    /// A front-matter value could not be coerced to its destination kind.
    #[error("field '{field}': {message}")]
    Coercion { field: String, message: String },
}

impl MigrateError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn skipped(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Skipped {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn coercion(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Coercion {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the orchestrator should count this as a skip rather than a failure.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Skipped { .. } | Self::Coercion { .. })
    }
}
