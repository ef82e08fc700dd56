//! In-memory store implementation for testing and dry runs.
//!
//! Holds the whole tree, image library and redirect table in `Vec`s behind a
//! single `std::sync::RwLock`, so every operation is atomic with respect to
//! the others. Image bytes are not retained.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{DestinationNode, FieldSet, ImageAsset, NewImageAsset, RedirectRecord};
use crate::schema::PageType;

use super::{child_url_path, AssetStore, NewNode, PageStore, RedirectStore, Site};

struct StoredRevision {
    node_id: i64,
    content: Value,
    published: bool,
}

struct StoredRedirect {
    site_id: i64,
    record: RedirectRecord,
}

#[derive(Default)]
struct MemoryState {
    nodes: Vec<DestinationNode>,
    revisions: Vec<StoredRevision>,
    assets: Vec<ImageAsset>,
    redirects: Vec<StoredRedirect>,
    sites: Vec<Site>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn node_mut(&mut self, id: i64) -> Result<&mut DestinationNode> {
        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => Ok(node),
            None => bail!("node {} does not exist", id),
        }
    }

    fn descendants_of(&self, id: i64) -> Vec<i64> {
        let mut found = Vec::new();
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for node in self.nodes.iter().filter(|n| n.parent_id == Some(parent)) {
                found.push(node.id);
                frontier.push(node.id);
            }
        }
        found
    }
}

/// In-memory store for tests and `--dry-run`.
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Content of the most recent revision of a node and whether it was published.
    pub fn latest_revision(&self, node_id: i64) -> Option<(Value, bool)> {
        let state = self.state.read().unwrap();
        state
            .revisions
            .iter()
            .rev()
            .find(|r| r.node_id == node_id)
            .map(|r| (r.content.clone(), r.published))
    }

    pub fn revision_count(&self) -> usize {
        self.state.read().unwrap().revisions.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for InMemoryStore {
    async fn root(&self) -> Result<DestinationNode> {
        let mut state = self.state.write().unwrap();
        if let Some(root) = state.nodes.iter().find(|n| n.parent_id.is_none()) {
            return Ok(root.clone());
        }
        let id = state.next_id();
        let root = DestinationNode {
            id,
            parent_id: None,
            page_type: PageType::Root,
            slug: "root".to_string(),
            title: "Root".to_string(),
            url_path: String::new(),
            live: true,
            fields: FieldSet::new(),
        };
        state.nodes.push(root.clone());
        Ok(root)
    }

    async fn get_node(&self, id: i64) -> Result<Option<DestinationNode>> {
        let state = self.state.read().unwrap();
        Ok(state.nodes.iter().find(|n| n.id == id).cloned())
    }

    async fn find_child(&self, parent_id: i64, slug: &str) -> Result<Option<DestinationNode>> {
        let state = self.state.read().unwrap();
        Ok(state
            .nodes
            .iter()
            .find(|n| n.parent_id == Some(parent_id) && n.slug == slug)
            .cloned())
    }

    async fn create_child(&self, parent_id: i64, node: &NewNode) -> Result<DestinationNode> {
        let mut state = self.state.write().unwrap();
        let parent = match state.nodes.iter().find(|n| n.id == parent_id) {
            Some(p) => p.clone(),
            None => bail!("parent node {} does not exist", parent_id),
        };
        if state
            .nodes
            .iter()
            .any(|n| n.parent_id == Some(parent_id) && n.slug == node.slug)
        {
            bail!("slug '{}' already exists under node {}", node.slug, parent_id);
        }
        let id = state.next_id();
        let created = DestinationNode {
            id,
            parent_id: Some(parent_id),
            page_type: node.page_type,
            slug: node.slug.clone(),
            title: node.title.clone(),
            url_path: child_url_path(&parent, &node.slug),
            live: node.live,
            fields: node.fields.clone(),
        };
        state.nodes.push(created.clone());
        Ok(created)
    }

    async fn update_fields(&self, id: i64, fields: &FieldSet) -> Result<DestinationNode> {
        let mut state = self.state.write().unwrap();
        let node = state.node_mut(id)?;
        for (k, v) in fields {
            node.fields.insert(k.clone(), v.clone());
        }
        if let Some(Value::String(title)) = fields.get("title") {
            node.title = title.clone();
        }
        Ok(node.clone())
    }

    async fn set_live(&self, id: i64, live: bool) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.node_mut(id)?.live = live;
        Ok(())
    }

    async fn save_revision(
        &self,
        id: i64,
        content: &Value,
        publish: bool,
        _run_id: &str,
    ) -> Result<i64> {
        let mut state = self.state.write().unwrap();
        state
            .node_mut(id)?
            .fields
            .insert("content".to_string(), content.clone());
        let rev_id = state.next_id();
        state.revisions.push(StoredRevision {
            node_id: id,
            content: content.clone(),
            published: publish,
        });
        Ok(rev_id)
    }

    async fn list_nodes(&self) -> Result<Vec<DestinationNode>> {
        let state = self.state.read().unwrap();
        let mut nodes = state.nodes.clone();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn delete_descendants(&self, id: i64) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let doomed = state.descendants_of(id);
        state.nodes.retain(|n| !doomed.contains(&n.id));
        state.revisions.retain(|r| !doomed.contains(&r.node_id));
        state
            .redirects
            .retain(|r| !doomed.contains(&r.record.node_id));
        state.sites.retain(|s| !doomed.contains(&s.root_node_id));
        Ok(doomed.len() as u64)
    }

    async fn find_site(&self, hostname: &str, port: u16) -> Result<Option<Site>> {
        let state = self.state.read().unwrap();
        Ok(state
            .sites
            .iter()
            .find(|s| s.hostname == hostname && s.port == port)
            .cloned())
    }

    async fn create_site(
        &self,
        hostname: &str,
        port: u16,
        site_name: &str,
        root_node_id: i64,
    ) -> Result<Site> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state
            .sites
            .iter()
            .find(|s| s.hostname == hostname && s.port == port)
        {
            return Ok(existing.clone());
        }
        let id = state.next_id();
        let site = Site {
            id,
            hostname: hostname.to_string(),
            port,
            site_name: site_name.to_string(),
            root_node_id,
        };
        state.sites.push(site.clone());
        Ok(site)
    }
}

#[async_trait]
impl AssetStore for InMemoryStore {
    async fn find_asset(&self, title_or_path: &str) -> Result<Option<ImageAsset>> {
        let state = self.state.read().unwrap();
        Ok(state
            .assets
            .iter()
            .find(|a| a.title == title_or_path || a.file_path == title_or_path)
            .cloned())
    }

    async fn find_asset_by_hash(&self, content_hash: &str) -> Result<Option<ImageAsset>> {
        let state = self.state.read().unwrap();
        Ok(state
            .assets
            .iter()
            .find(|a| a.content_hash == content_hash)
            .cloned())
    }

    async fn create_asset(&self, asset: &NewImageAsset) -> Result<ImageAsset> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.assets.iter().find(|a| a.title == asset.title) {
            return Ok(existing.clone());
        }
        let id = state.next_id();
        let stored = ImageAsset {
            id,
            title: asset.title.clone(),
            file_path: asset.file_path.clone(),
            width: asset.width,
            height: asset.height,
            content_hash: asset.content_hash.clone(),
        };
        state.assets.push(stored.clone());
        Ok(stored)
    }

    async fn count_assets(&self) -> Result<u64> {
        Ok(self.state.read().unwrap().assets.len() as u64)
    }

    async fn delete_assets(&self) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let n = state.assets.len() as u64;
        state.assets.clear();
        Ok(n)
    }
}

#[async_trait]
impl RedirectStore for InMemoryStore {
    async fn create_redirect(&self, site_id: i64, record: &RedirectRecord) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state
            .redirects
            .iter()
            .any(|r| r.site_id == site_id && r.record.old_path == record.old_path)
        {
            return Ok(false);
        }
        state.redirects.push(StoredRedirect {
            site_id,
            record: record.clone(),
        });
        Ok(true)
    }

    async fn list_redirects(&self) -> Result<Vec<RedirectRecord>> {
        let state = self.state.read().unwrap();
        Ok(state.redirects.iter().map(|r| r.record.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node(slug: &str, page_type: PageType) -> NewNode {
        NewNode {
            page_type,
            slug: slug.to_string(),
            title: slug.to_uppercase(),
            fields: FieldSet::new(),
            live: true,
        }
    }

    #[tokio::test]
    async fn builds_url_paths_from_home() {
        let store = InMemoryStore::new();
        let root = store.root().await.unwrap();
        let home = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        let section = store
            .create_child(home.id, &new_node("updates", PageType::Section))
            .await
            .unwrap();
        let post = store
            .create_child(section.id, &new_node("my-post", PageType::Article))
            .await
            .unwrap();
        assert_eq!(home.url_path, "/");
        assert_eq!(section.url_path, "/updates");
        assert_eq!(post.url_path, "/updates/my-post");
        assert_eq!(store.root().await.unwrap().id, root.id);
    }

    #[tokio::test]
    async fn sibling_slugs_are_unique() {
        let store = InMemoryStore::new();
        let root = store.root().await.unwrap();
        store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        assert!(store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_descendants_keeps_root() {
        let store = InMemoryStore::new();
        let root = store.root().await.unwrap();
        let home = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        store
            .create_child(home.id, &new_node("a", PageType::Static))
            .await
            .unwrap();
        store.create_site("localhost", 80, "Site", home.id).await.unwrap();
        assert_eq!(store.delete_descendants(root.id).await.unwrap(), 2);
        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
        assert!(store.find_site("localhost", 80).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redirects_are_idempotent() {
        let store = InMemoryStore::new();
        let record = RedirectRecord {
            old_path: "/old".into(),
            node_id: 3,
        };
        assert!(store.create_redirect(1, &record).await.unwrap());
        assert!(!store.create_redirect(1, &record).await.unwrap());
        assert_eq!(store.list_redirects().await.unwrap().len(), 1);
    }
}
