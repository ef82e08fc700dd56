//! Page upsert: find-or-create a node under a parent, by slug.
//!
//! Lookup by `(parent, slug)` is what makes a run safely repeatable. A node
//! found with a different page type is never touched; the caller gets a
//! [`MigrateError::TypeConflict`] and decides what to abandon.
//!
//! New nodes start as drafts. [`Upserted::publish`] tells the caller the node
//! may go live once its content is in place; [`publish_page`] does that.

use anyhow::Result;
use serde_json::Value;

use crate::error::MigrateError;
use crate::models::{DestinationNode, FieldSet};
use crate::schema::PageType;
use crate::store::{NewNode, PageStore};

/// Result of an upsert.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub node: DestinationNode,
    pub created: bool,
    /// The node is a draft that should be published after rendering.
    pub publish: bool,
}

/// Create or update the child of `parent_id` named `slug`.
///
/// `unpublished` forces the node to draft. Otherwise new nodes, and drafts
/// that never received content, are eligible for publishing; existing nodes
/// keep their state.
pub async fn upsert_page<S: PageStore + ?Sized>(
    store: &S,
    parent_id: i64,
    page_type: PageType,
    slug: &str,
    fields: &FieldSet,
    unpublished: bool,
) -> Result<Upserted> {
    match store.find_child(parent_id, slug).await? {
        Some(existing) => {
            if existing.page_type != page_type {
                return Err(MigrateError::TypeConflict {
                    parent_id,
                    slug: slug.to_string(),
                    existing: existing.page_type,
                    requested: page_type,
                }
                .into());
            }

            let never_rendered = !existing.fields.contains_key("content");
            let mut node = store.update_fields(existing.id, fields).await?;
            if unpublished && node.live {
                store.set_live(node.id, false).await?;
                node.live = false;
            }
            tracing::debug!(id = node.id, url_path = %node.url_path, "updated page");
            Ok(Upserted {
                publish: !unpublished && !node.live && never_rendered,
                node,
                created: false,
            })
        }
        None => {
            let title = match fields.get("title") {
                Some(Value::String(t)) => t.clone(),
                _ => slug.to_string(),
            };
            let node = store
                .create_child(
                    parent_id,
                    &NewNode {
                        page_type,
                        slug: slug.to_string(),
                        title,
                        fields: fields.clone(),
                        live: false,
                    },
                )
                .await?;
            tracing::debug!(id = node.id, url_path = %node.url_path, "created page");
            Ok(Upserted {
                node,
                created: true,
                publish: !unpublished,
            })
        }
    }
}

/// Make `node` live.
pub async fn publish_page<S: PageStore + ?Sized>(store: &S, node: &mut DestinationNode) -> Result<()> {
    store.set_live(node.id, true).await?;
    node.live = true;
    tracing::debug!(id = node.id, url_path = %node.url_path, "published page");
    Ok(())
}
