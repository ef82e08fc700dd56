//! Storage abstraction for the destination CMS.
//!
//! The migration only needs a handful of operations from the page tree, the
//! image library and the redirect table. Those are expressed as three traits
//! so the engine can run against SQLite in production and an in-memory store
//! in tests.
//!
//! | Trait | Operations |
//! |-------|------------|
//! | [`PageStore`] | root, sites, find child by slug, create child, update fields, set live, save revision, list, clear |
//! | [`AssetStore`] | find by title or path, find by content hash, create from bytes, clear |
//! | [`RedirectStore`] | idempotent create, list, clear |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{DestinationNode, FieldSet, ImageAsset, NewImageAsset, RedirectRecord};
use crate::schema::PageType;

/// A node about to be attached under a parent.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub page_type: PageType,
    pub slug: String,
    pub title: String,
    pub fields: FieldSet,
    pub live: bool,
}

/// A hostname/port binding of a home page.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: i64,
    pub hostname: String,
    pub port: u16,
    pub site_name: String,
    pub root_node_id: i64,
}

/// Page tree operations.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Return the tree root, creating it on first use.
    async fn root(&self) -> Result<DestinationNode>;

    async fn get_node(&self, id: i64) -> Result<Option<DestinationNode>>;

    /// Look up the child of `parent_id` whose slug is `slug`.
    async fn find_child(&self, parent_id: i64, slug: &str) -> Result<Option<DestinationNode>>;

    /// Attach a new node. Fails if the slug is already taken under the parent.
    async fn create_child(&self, parent_id: i64, node: &NewNode) -> Result<DestinationNode>;

    /// Merge `fields` into the node's stored fields, updating its title.
    async fn update_fields(&self, id: i64, fields: &FieldSet) -> Result<DestinationNode>;

    async fn set_live(&self, id: i64, live: bool) -> Result<()>;

    /// Store rendered content as a new revision, publishing it when asked.
    /// Returns the revision id.
    async fn save_revision(
        &self,
        id: i64,
        content: &Value,
        publish: bool,
        run_id: &str,
    ) -> Result<i64>;

    /// All nodes, ordered by id.
    async fn list_nodes(&self) -> Result<Vec<DestinationNode>>;

    /// Delete every descendant of `id`, with their revisions, redirects and
    /// sites. Returns the number of nodes removed.
    async fn delete_descendants(&self, id: i64) -> Result<u64>;

    async fn find_site(&self, hostname: &str, port: u16) -> Result<Option<Site>>;

    async fn create_site(
        &self,
        hostname: &str,
        port: u16,
        site_name: &str,
        root_node_id: i64,
    ) -> Result<Site>;
}

/// Image library operations.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Exact match on stored title or stored file path.
    async fn find_asset(&self, title_or_path: &str) -> Result<Option<ImageAsset>>;

    async fn find_asset_by_hash(&self, content_hash: &str) -> Result<Option<ImageAsset>>;

    /// Persist an image. An existing asset with the same title is returned
    /// instead of creating a duplicate.
    async fn create_asset(&self, asset: &NewImageAsset) -> Result<ImageAsset>;

    async fn count_assets(&self) -> Result<u64>;

    async fn delete_assets(&self) -> Result<u64>;
}

/// Redirect table operations.
#[async_trait]
pub trait RedirectStore: Send + Sync {
    /// Create a redirect unless one already exists for the old path on this
    /// site. Returns `true` when a record was written.
    async fn create_redirect(&self, site_id: i64, record: &RedirectRecord) -> Result<bool>;

    async fn list_redirects(&self) -> Result<Vec<RedirectRecord>>;
}

/// Everything the migration needs from a backend.
pub trait MigrationStore: PageStore + AssetStore + RedirectStore {}

impl<T: PageStore + AssetStore + RedirectStore> MigrationStore for T {}

/// Public path of a node created under `parent`.
///
/// The home page sits directly under the root and owns `/`; everything else
/// extends its parent's path with its own slug.
pub fn child_url_path(parent: &DestinationNode, slug: &str) -> String {
    match parent.page_type {
        PageType::Root => "/".to_string(),
        _ => format!("{}/{}", parent.url_path.trim_end_matches('/'), slug),
    }
}
