use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the destination schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Page tree
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER,
            page_type TEXT NOT NULL,
            slug TEXT NOT NULL,
            title TEXT NOT NULL,
            url_path TEXT NOT NULL,
            live INTEGER NOT NULL DEFAULT 1,
            fields_json TEXT NOT NULL DEFAULT '{}',
            live_revision_id INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(parent_id, slug),
            FOREIGN KEY (parent_id) REFERENCES nodes(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            content_json TEXT NOT NULL,
            published INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (node_id) REFERENCES nodes(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hostname TEXT NOT NULL,
            port INTEGER NOT NULL,
            site_name TEXT NOT NULL,
            root_node_id INTEGER NOT NULL,
            UNIQUE(hostname, port),
            FOREIGN KEY (root_node_id) REFERENCES nodes(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Image library
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            data BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS redirects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL,
            old_path TEXT NOT NULL,
            node_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(site_id, old_path),
            FOREIGN KEY (node_id) REFERENCES nodes(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_parent_id ON nodes(parent_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_revisions_node_id ON revisions(node_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_content_hash ON images(content_hash)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_file_path ON images(file_path)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
