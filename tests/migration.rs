//! End-to-end migration runs against the in-memory store.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use content_migrate::config::{parse_config, Config};
use content_migrate::error::MigrateError;
use content_migrate::ingest::{run_migration, MigrationSummary, RunOptions};
use content_migrate::models::DestinationNode;
use content_migrate::progress::NoProgress;
use content_migrate::schema::PageType;
use content_migrate::store::memory::InMemoryStore;
use content_migrate::store::{AssetStore, PageStore, RedirectStore};
use tempfile::TempDir;

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Two posts linking to each other, a draft, and one shared upload that the
/// second post references through the CDN.
fn corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    write(
        root,
        "_posts/2020-01-01-alpha.md",
        "---\ntitle: Alpha\ndate: 2020-01-01\n---\n# Alpha\n\nSee [the beta post](/updates/2020-02-01-beta/).\n\n![A map](/uploads/map.png)\n",
    );
    write(
        root,
        "_posts/2020-02-01-beta.md",
        "---\ntitle: Beta\ndate: 2020-02-01 10:30:00\npermalink: /updates/2020-02-01-beta/\nredirect_from:\n  - /news/beta\n---\nBack to [alpha](alpha).\n\n![](https://cdn.hotosm.org/website/map.png)\n",
    );
    write(
        root,
        "_posts/2020-03-01-gamma.md",
        "---\ntitle: Gamma\npublished: false\n---\nNot ready.\n",
    );
    write(root, "_posts/2020-04-01-untitled.md", "---\nlayout: post\n---\nNo title.\n");
    fs::create_dir_all(root.join("_uploads")).unwrap();
    fs::write(root.join("_uploads/map.png"), png(4, 3)).unwrap();

    tmp
}

fn config(root: &Path, extra: &str) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "unused.sqlite"

[site]
name = "HOT Website"

[source]
root = "{}"

[images]
dedupe_uploads_and_cdn = true

[[sections]]
path = "/updates"
title = "Updates"
page_type = "magazine-index"

[[content_map]]
pattern = "_posts/*.md"
destination_type = "article"
parent = "/updates"
legacy_parent_path = "/updates"
{}
"#,
        root.display(),
        extra
    ))
    .unwrap()
}

async fn run(
    store: &Arc<InMemoryStore>,
    config: &Config,
    options: &RunOptions,
) -> anyhow::Result<MigrationSummary> {
    run_migration(store.clone(), config, options, &NoProgress).await
}

async fn node_at(store: &InMemoryStore, url_path: &str) -> DestinationNode {
    store
        .list_nodes()
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.url_path == url_path)
        .unwrap_or_else(|| panic!("no node at {}", url_path))
}

fn body_html(store: &InMemoryStore, node: &DestinationNode) -> String {
    let (content, _) = store.latest_revision(node.id).expect("node has a revision");
    content[0]["value"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn migrates_and_resolves_links_in_both_directions() {
    let tmp = corpus();
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());
    let options = RunOptions {
        import_images: true,
        ..Default::default()
    };

    let summary = run(&store, &cfg, &options).await.unwrap();
    assert_eq!(summary.documents, 4);
    assert_eq!(summary.created, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.drafts, 1);
    assert_eq!(summary.rendered, 3);
    assert!(summary.is_clean());

    let alpha = node_at(&store, "/updates/alpha").await;
    let beta = node_at(&store, "/updates/beta").await;
    assert_eq!(alpha.page_type, PageType::Article);
    assert_eq!(beta.title, "Beta");
    assert!(alpha.live && beta.live);
    assert!(store.latest_revision(alpha.id).unwrap().1);

    // Alpha links forward to a page created after it.
    let alpha_html = body_html(&store, &alpha);
    assert!(alpha_html.contains(&format!(r#"<a linktype="page" id="{}">"#, beta.id)));
    assert!(alpha_html.contains("<h2>Alpha</h2>"));

    // Beta's relative link resolves against its legacy directory.
    let beta_html = body_html(&store, &beta);
    assert!(beta_html.contains(&format!(r#"<a linktype="page" id="{}">"#, alpha.id)));

    // The upload and its CDN spelling are one asset.
    assert_eq!(store.count_assets().await.unwrap(), 1);
    let asset = store.find_asset("/uploads/map.png").await.unwrap().unwrap();
    let embed = format!(r#"<embed embedtype="image" id="{}""#, asset.id);
    assert!(alpha_html.contains(&embed));
    assert!(beta_html.contains(&embed));

    let gamma = node_at(&store, "/updates/gamma").await;
    assert!(!gamma.live);
    let (_, published) = store.latest_revision(gamma.id).unwrap();
    assert!(!published);

    assert_eq!(
        alpha.fields["first_published_at"].as_str(),
        Some("2020-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let tmp = corpus();
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());
    let options = RunOptions {
        import_images: true,
        ..Default::default()
    };

    let first = run(&store, &cfg, &options).await.unwrap();
    let nodes_after_first = store.list_nodes().await.unwrap();
    let redirects_after_first = store.list_redirects().await.unwrap();

    let second = run(&store, &cfg, &options).await.unwrap();

    assert_eq!(first.redirects_created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(second.redirects_created, 0);
    assert_eq!(store.list_redirects().await.unwrap(), redirects_after_first);

    // Same nodes, same state, same field values.
    let nodes_after_second = store.list_nodes().await.unwrap();
    assert_eq!(nodes_after_second.len(), nodes_after_first.len());
    for (before, after) in nodes_after_first.iter().zip(&nodes_after_second) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.slug, after.slug);
        assert_eq!(before.title, after.title);
        assert_eq!(before.url_path, after.url_path);
        assert_eq!(before.live, after.live, "live changed for {}", after.url_path);
        assert_eq!(before.fields, after.fields, "fields changed for {}", after.url_path);
    }
    assert_eq!(store.count_assets().await.unwrap(), 1);

    // Links still point at the same nodes after the second render.
    let alpha = node_at(&store, "/updates/alpha").await;
    let beta = node_at(&store, "/updates/beta").await;
    assert!(body_html(&store, &alpha).contains(&format!(r#"id="{}""#, beta.id)));
}

#[tokio::test]
async fn redirects_cover_moved_paths_and_redirect_from() {
    let tmp = corpus();
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());

    run(&store, &cfg, &RunOptions::default()).await.unwrap();

    let beta = node_at(&store, "/updates/beta").await;
    let mut olds: Vec<_> = store
        .list_redirects()
        .await
        .unwrap()
        .into_iter()
        .map(|r| {
            assert_eq!(r.node_id, beta.id);
            r.old_path
        })
        .collect();
    olds.sort();
    assert_eq!(olds, vec!["/news/beta", "/updates/2020-02-01-beta"]);
}

#[tokio::test]
async fn type_conflict_abandons_entry_and_keeps_node() {
    let tmp = corpus();
    write(tmp.path(), "_team/alpha.md", "---\ntitle: Alpha Person\n---\n");
    write(tmp.path(), "_team/zed.md", "---\ntitle: Zed\n---\n");
    let cfg = config(
        tmp.path(),
        r#"
[[content_map]]
pattern = "_team/*.md"
destination_type = "person"
parent = "/updates"
"#,
    );
    let store = Arc::new(InMemoryStore::new());

    let summary = run(&store, &cfg, &RunOptions::default()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.abandoned, 1);
    assert!(!summary.is_clean());
    assert!(summary.failures[0].path.ends_with("alpha.md"));

    let alpha = node_at(&store, "/updates/alpha").await;
    assert_eq!(alpha.page_type, PageType::Article);
    assert_eq!(alpha.title, "Alpha");
    assert!(store
        .list_nodes()
        .await
        .unwrap()
        .iter()
        .all(|n| n.slug != "zed"));

    let strict = RunOptions {
        strict: true,
        ..Default::default()
    };
    let err = run(&store, &cfg, &strict).await.unwrap_err();
    assert!(err
        .chain()
        .any(|cause| matches!(
            cause.downcast_ref::<MigrateError>(),
            Some(MigrateError::TypeConflict { .. })
        )));
}

#[tokio::test]
async fn parse_errors_fail_the_document_only() {
    let tmp = corpus();
    write(tmp.path(), "_posts/2020-05-01-broken.md", "---\ntitle: [unclosed\n---\nbody\n");
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());

    let summary = run(&store, &cfg, &RunOptions::default()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.created, 3);

    let store = Arc::new(InMemoryStore::new());
    let strict = RunOptions {
        strict: true,
        ..Default::default()
    };
    assert!(run(&store, &cfg, &strict).await.is_err());

    // Pages upserted before the abort are never live without content.
    let alpha = node_at(&store, "/updates/alpha").await;
    assert!(!alpha.live);
    assert!(store.latest_revision(alpha.id).is_none());

    // The next clean run picks them up and publishes them.
    fs::remove_file(tmp.path().join("_posts/2020-05-01-broken.md")).unwrap();
    let summary = run(&store, &cfg, &strict).await.unwrap();
    assert_eq!(summary.drafts, 1);
    let alpha = node_at(&store, "/updates/alpha").await;
    assert!(alpha.live);
    assert!(store.latest_revision(alpha.id).unwrap().1);
}

#[tokio::test]
async fn bodyless_pages_are_published_after_the_skeleton_pass() {
    let tmp = corpus();
    write(tmp.path(), "_posts/2020-06-01-stub.md", "---\ntitle: Stub\n---\n");
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());

    let summary = run(&store, &cfg, &RunOptions::default()).await.unwrap();
    assert_eq!(summary.rendered, 3);
    let stub = node_at(&store, "/updates/stub").await;
    assert!(stub.live);
    assert!(store.latest_revision(stub.id).is_none());
}

#[tokio::test]
async fn bad_entry_fails_before_any_page_is_written() {
    let tmp = corpus();
    write(tmp.path(), "_team/zed.md", "---\ntitle: Zed\n---\n");
    let mut cfg = config(
        tmp.path(),
        r#"
[[content_map]]
pattern = "_team/*.md"
destination_type = "person"
parent = "/updates"
"#,
    );
    cfg.content_map[1].parent = "/people".into();
    let store = Arc::new(InMemoryStore::new());

    let err = run(&store, &cfg, &RunOptions::default()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("_team/*.md"));
    assert!(store
        .list_nodes()
        .await
        .unwrap()
        .iter()
        .all(|n| !n.url_path.starts_with("/updates/")));
    assert!(store.list_redirects().await.unwrap().is_empty());
}

#[tokio::test]
async fn only_limits_entries_and_unknown_patterns_error() {
    let tmp = corpus();
    write(tmp.path(), "_team/zed.md", "---\ntitle: Zed\n---\n");
    let cfg = config(
        tmp.path(),
        r#"
[[content_map]]
pattern = "_team/*.md"
destination_type = "person"
parent = "/updates"
"#,
    );
    let store = Arc::new(InMemoryStore::new());

    let only = RunOptions {
        only: vec!["_team/*.md".into()],
        ..Default::default()
    };
    let summary = run(&store, &cfg, &only).await.unwrap();
    assert_eq!(summary.documents, 1);
    assert_eq!(node_at(&store, "/updates/zed").await.page_type, PageType::Person);

    let unknown = RunOptions {
        only: vec!["_nope/*.md".into()],
        ..Default::default()
    };
    assert!(run(&store, &cfg, &unknown).await.is_err());
}

#[tokio::test]
async fn scratch_rebuilds_the_tree() {
    let tmp = corpus();
    let cfg = config(tmp.path(), "");
    let store = Arc::new(InMemoryStore::new());

    run(&store, &cfg, &RunOptions::default()).await.unwrap();
    let before = node_at(&store, "/updates/alpha").await;

    let scratch = RunOptions {
        scratch: true,
        ..Default::default()
    };
    let summary = run(&store, &cfg, &scratch).await.unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(summary.redirects_created, 2);

    let after = node_at(&store, "/updates/alpha").await;
    assert_ne!(before.id, after.id);
    assert_eq!(store.list_redirects().await.unwrap().len(), 2);
}
