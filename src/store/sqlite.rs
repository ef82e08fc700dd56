//! SQLite-backed store implementation.
//!
//! Maps every [`PageStore`], [`AssetStore`] and [`RedirectStore`] operation
//! onto the schema created by [`crate::migrate::run_migrations`]. Node fields
//! are stored as a JSON object in `nodes.fields_json`; rendered content goes
//! to `revisions`, with the published one referenced by `live_revision_id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{DestinationNode, FieldSet, ImageAsset, NewImageAsset, RedirectRecord};
use crate::schema::PageType;

use super::{child_url_path, AssetStore, NewNode, PageStore, RedirectStore, Site};

const NODE_COLUMNS: &str = "id, parent_id, page_type, slug, title, url_path, live, fields_json";
const IMAGE_COLUMNS: &str = "id, title, file_path, width, height, content_hash";

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_node(&self, id: i64) -> Result<DestinationNode> {
        self.get_node(id)
            .await?
            .with_context(|| format!("node {} does not exist", id))
    }
}

fn row_to_node(row: &SqliteRow) -> Result<DestinationNode> {
    let page_type: String = row.get("page_type");
    let fields_json: String = row.get("fields_json");
    let fields: FieldSet = serde_json::from_str(&fields_json).unwrap_or_default();
    let live: i64 = row.get("live");

    Ok(DestinationNode {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        page_type: page_type.parse::<PageType>()?,
        slug: row.get("slug"),
        title: row.get("title"),
        url_path: row.get("url_path"),
        live: live != 0,
        fields,
    })
}

fn row_to_asset(row: &SqliteRow) -> ImageAsset {
    let width: i64 = row.get("width");
    let height: i64 = row.get("height");
    ImageAsset {
        id: row.get("id"),
        title: row.get("title"),
        file_path: row.get("file_path"),
        width: width as u32,
        height: height as u32,
        content_hash: row.get("content_hash"),
    }
}

fn row_to_site(row: &SqliteRow) -> Site {
    let port: i64 = row.get("port");
    Site {
        id: row.get("id"),
        hostname: row.get("hostname"),
        port: port as u16,
        site_name: row.get("site_name"),
        root_node_id: row.get("root_node_id"),
    }
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn root(&self) -> Result<DestinationNode> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM nodes WHERE parent_id IS NULL ORDER BY id LIMIT 1",
            NODE_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row_to_node(&row);
        }

        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO nodes (parent_id, page_type, slug, title, url_path, live, created_at, updated_at)
            VALUES (NULL, ?, 'root', 'Root', '', 1, ?, ?)
            RETURNING id
            "#,
        )
        .bind(PageType::Root.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.fetch_node(id).await
    }

    async fn get_node(&self, id: i64) -> Result<Option<DestinationNode>> {
        let row = sqlx::query(&format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn find_child(&self, parent_id: i64, slug: &str) -> Result<Option<DestinationNode>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM nodes WHERE parent_id = ? AND slug = ?",
            NODE_COLUMNS
        ))
        .bind(parent_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn create_child(&self, parent_id: i64, node: &NewNode) -> Result<DestinationNode> {
        let parent = self.fetch_node(parent_id).await?;
        let url_path = child_url_path(&parent, &node.slug);
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO nodes (parent_id, page_type, slug, title, url_path, live, fields_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(parent_id)
        .bind(node.page_type.as_str())
        .bind(&node.slug)
        .bind(&node.title)
        .bind(&url_path)
        .bind(node.live as i64)
        .bind(Value::Object(node.fields.clone()).to_string())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create '{}' under node {}", node.slug, parent_id))?;

        self.fetch_node(id).await
    }

    async fn update_fields(&self, id: i64, fields: &FieldSet) -> Result<DestinationNode> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT title, fields_json FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("node {} does not exist", id))?;

        let fields_json: String = row.get("fields_json");
        let mut title: String = row.get("title");
        let mut merged: FieldSet = serde_json::from_str(&fields_json).unwrap_or_default();
        for (k, v) in fields {
            merged.insert(k.clone(), v.clone());
        }
        if let Some(Value::String(t)) = fields.get("title") {
            title = t.clone();
        }

        sqlx::query("UPDATE nodes SET title = ?, fields_json = ?, updated_at = ? WHERE id = ?")
            .bind(&title)
            .bind(Value::Object(merged).to_string())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.fetch_node(id).await
    }

    async fn set_live(&self, id: i64, live: bool) -> Result<()> {
        sqlx::query("UPDATE nodes SET live = ?, updated_at = ? WHERE id = ?")
            .bind(live as i64)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_revision(
        &self,
        id: i64,
        content: &Value,
        publish: bool,
        run_id: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let content_json = content.to_string();
        let mut tx = self.pool.begin().await?;

        let rev_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO revisions (node_id, run_id, content_json, published, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(run_id)
        .bind(&content_json)
        .bind(publish as i64)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE nodes
            SET fields_json = json_set(fields_json, '$.content', json(?)),
                live_revision_id = CASE WHEN ? THEN ? ELSE live_revision_id END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&content_json)
        .bind(publish)
        .bind(rev_id)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rev_id)
    }

    async fn list_nodes(&self) -> Result<Vec<DestinationNode>> {
        let rows = sqlx::query(&format!("SELECT {} FROM nodes ORDER BY id", NODE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn delete_descendants(&self, id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let doomed: Vec<i64> = sqlx::query_scalar(
            r#"
            WITH RECURSIVE tree(id) AS (
                SELECT id FROM nodes WHERE parent_id = ?
                UNION ALL
                SELECT n.id FROM nodes n JOIN tree t ON n.parent_id = t.id
            )
            SELECT id FROM tree
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        if doomed.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let placeholders = vec!["?"; doomed.len()].join(", ");
        for table_filter in [
            format!("DELETE FROM redirects WHERE node_id IN ({})", placeholders),
            format!("DELETE FROM revisions WHERE node_id IN ({})", placeholders),
            format!("DELETE FROM sites WHERE root_node_id IN ({})", placeholders),
            format!("DELETE FROM nodes WHERE id IN ({})", placeholders),
        ] {
            let mut query = sqlx::query(&table_filter);
            for node_id in &doomed {
                query = query.bind(node_id);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(doomed.len() as u64)
    }

    async fn find_site(&self, hostname: &str, port: u16) -> Result<Option<Site>> {
        let row = sqlx::query(
            "SELECT id, hostname, port, site_name, root_node_id FROM sites WHERE hostname = ? AND port = ?",
        )
        .bind(hostname)
        .bind(port as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_site))
    }

    async fn create_site(
        &self,
        hostname: &str,
        port: u16,
        site_name: &str,
        root_node_id: i64,
    ) -> Result<Site> {
        sqlx::query(
            r#"
            INSERT INTO sites (hostname, port, site_name, root_node_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hostname, port) DO NOTHING
            "#,
        )
        .bind(hostname)
        .bind(port as i64)
        .bind(site_name)
        .bind(root_node_id)
        .execute(&self.pool)
        .await?;

        self.find_site(hostname, port)
            .await?
            .with_context(|| format!("site {}:{} was not created", hostname, port))
    }
}

#[async_trait]
impl AssetStore for SqliteStore {
    async fn find_asset(&self, title_or_path: &str) -> Result<Option<ImageAsset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM images WHERE title = ? OR file_path = ? ORDER BY id LIMIT 1",
            IMAGE_COLUMNS
        ))
        .bind(title_or_path)
        .bind(title_or_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_asset))
    }

    async fn find_asset_by_hash(&self, content_hash: &str) -> Result<Option<ImageAsset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM images WHERE content_hash = ? ORDER BY id LIMIT 1",
            IMAGE_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_asset))
    }

    async fn create_asset(&self, asset: &NewImageAsset) -> Result<ImageAsset> {
        sqlx::query(
            r#"
            INSERT INTO images (title, file_path, width, height, content_hash, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title) DO NOTHING
            "#,
        )
        .bind(&asset.title)
        .bind(&asset.file_path)
        .bind(asset.width as i64)
        .bind(asset.height as i64)
        .bind(&asset.content_hash)
        .bind(&asset.bytes)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!("SELECT {} FROM images WHERE title = ?", IMAGE_COLUMNS))
            .bind(&asset.title)
            .fetch_one(&self.pool)
            .await?;
        Ok(row_to_asset(&row))
    }

    async fn count_assets(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn delete_assets(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM images").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RedirectStore for SqliteStore {
    async fn create_redirect(&self, site_id: i64, record: &RedirectRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO redirects (site_id, old_path, node_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(site_id, old_path) DO NOTHING
            "#,
        )
        .bind(site_id)
        .bind(&record.old_path)
        .bind(record.node_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_redirects(&self) -> Result<Vec<RedirectRecord>> {
        let rows = sqlx::query("SELECT old_path, node_id FROM redirects ORDER BY old_path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| RedirectRecord {
                old_path: row.get("old_path"),
                node_id: row.get("node_id"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let text = format!(
            "[db]\npath = \"{}\"\n[site]\nname = \"Test\"\n[source]\nroot = \"{}\"\n",
            dir.path().join("site.sqlite").display(),
            dir.path().display()
        );
        let config = parse_config(&text).unwrap();
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn new_node(slug: &str, page_type: PageType) -> NewNode {
        NewNode {
            page_type,
            slug: slug.to_string(),
            title: slug.to_string(),
            fields: FieldSet::new(),
            live: true,
        }
    }

    #[tokio::test]
    async fn tree_round_trip() {
        let (_dir, store) = open().await;
        let root = store.root().await.unwrap();
        assert_eq!(store.root().await.unwrap().id, root.id);

        let home = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        let post = store
            .create_child(home.id, &new_node("my-post", PageType::Article))
            .await
            .unwrap();
        assert_eq!(post.url_path, "/my-post");
        assert!(store
            .create_child(home.id, &new_node("my-post", PageType::Article))
            .await
            .is_err());

        let found = store.find_child(home.id, "my-post").await.unwrap().unwrap();
        assert_eq!(found.id, post.id);
        assert_eq!(found.page_type, PageType::Article);
    }

    #[tokio::test]
    async fn update_merges_fields_and_revision_updates_content() {
        let (_dir, store) = open().await;
        let root = store.root().await.unwrap();
        let node = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();

        let mut fields = FieldSet::new();
        fields.insert("title".into(), Value::String("Renamed".into()));
        let updated = store.update_fields(node.id, &fields).await.unwrap();
        assert_eq!(updated.title, "Renamed");

        let content = serde_json::json!([{"type": "richtext", "value": "<p>x</p>"}]);
        store.save_revision(node.id, &content, true, "run-1").await.unwrap();
        let node = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(node.fields["content"], content);
        assert_eq!(node.fields["title"], "Renamed");
    }

    #[tokio::test]
    async fn delete_descendants_cascades() {
        let (_dir, store) = open().await;
        let root = store.root().await.unwrap();
        let home = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        let page = store
            .create_child(home.id, &new_node("about", PageType::Static))
            .await
            .unwrap();
        let site = store.create_site("localhost", 80, "Test", home.id).await.unwrap();
        store
            .create_redirect(
                site.id,
                &RedirectRecord {
                    old_path: "/about-us".into(),
                    node_id: page.id,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.delete_descendants(root.id).await.unwrap(), 2);
        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
        assert!(store.list_redirects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assets_dedupe_by_title() {
        let (_dir, store) = open().await;
        let asset = NewImageAsset {
            title: "/uploads/a.png".into(),
            file_path: "/uploads/a.png".into(),
            width: 2,
            height: 3,
            content_hash: "abc".into(),
            bytes: vec![1, 2, 3],
        };
        let first = store.create_asset(&asset).await.unwrap();
        let second = store.create_asset(&asset).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.count_assets().await.unwrap(), 1);
        assert_eq!(
            store.find_asset_by_hash("abc").await.unwrap().map(|a| a.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn redirect_conflicts_are_noops() {
        let (_dir, store) = open().await;
        let root = store.root().await.unwrap();
        let home = store
            .create_child(root.id, &new_node("home", PageType::Home))
            .await
            .unwrap();
        let site = store.create_site("localhost", 80, "Test", home.id).await.unwrap();
        let record = RedirectRecord {
            old_path: "/old".into(),
            node_id: home.id,
        };
        assert!(store.create_redirect(site.id, &record).await.unwrap());
        assert!(!store.create_redirect(site.id, &record).await.unwrap());
    }
}
