//! Site setup: root, home page, site binding and section pages.
//!
//! Everything here is find-or-create, so `cmig setup` and the setup phase of
//! `cmig run` can be repeated freely. `--scratch` first clears what earlier
//! runs migrated.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::config::{Config, SectionConfig};
use crate::images::{ImageResolver, UploadsImport};
use crate::models::{DestinationNode, FieldSet};
use crate::schema::PageType;
use crate::slug::slugify;
use crate::store::{MigrationStore, PageStore, Site};
use crate::upsert::{publish_page, upsert_page};

#[derive(Debug, Clone, Copy, Default)]
pub struct SetupOptions {
    /// Delete previously migrated nodes and redirects first.
    pub scratch: bool,
    /// Import the uploads directory (and, with `scratch`, clear assets first).
    pub import_images: bool,
}

/// The fixed top of the tree.
#[derive(Debug, Clone)]
pub struct SiteTree {
    pub root: DestinationNode,
    pub home: DestinationNode,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub tree: SiteTree,
    pub sections: Vec<DestinationNode>,
    pub removed_nodes: u64,
    pub removed_assets: u64,
    pub uploads: Option<UploadsImport>,
}

pub async fn run_setup<S: MigrationStore + ?Sized>(
    store: &S,
    images: &ImageResolver,
    config: &Config,
    options: SetupOptions,
) -> Result<SetupOutcome> {
    let mut removed_nodes = 0;
    let mut removed_assets = 0;

    if options.scratch {
        let root = store.root().await?;
        removed_nodes = store.delete_descendants(root.id).await?;
        if options.import_images {
            removed_assets = store.delete_assets().await?;
        }
        tracing::info!(removed_nodes, removed_assets, "cleared previous migration");
    }

    let tree = ensure_site(store, config).await?;
    let sections = ensure_sections(store, &tree.home, &config.sections).await?;

    let uploads = if options.import_images {
        let dir = config.source.root.join(&config.source.uploads_dir);
        Some(images.import_uploads(&dir).await?)
    } else {
        None
    };

    Ok(SetupOutcome {
        tree,
        sections,
        removed_nodes,
        removed_assets,
        uploads,
    })
}

/// Ensure root, home page (slug derived from the site name) and site record.
pub async fn ensure_site<S: PageStore + ?Sized>(store: &S, config: &Config) -> Result<SiteTree> {
    let root = store.root().await?;

    let home_slug = slugify(&config.site.name);
    if home_slug.is_empty() {
        bail!("site.name '{}' does not yield a usable slug", config.site.name);
    }

    let mut fields = FieldSet::new();
    fields.insert("title".into(), Value::String(config.site.name.clone()));
    let mut home = upsert_page(store, root.id, PageType::Home, &home_slug, &fields, false).await?;
    if home.publish {
        publish_page(store, &mut home.node).await?;
    }
    let home = home.node;

    let site = match store
        .find_site(&config.site.hostname, config.site.port)
        .await?
    {
        Some(site) => site,
        None => {
            store
                .create_site(
                    &config.site.hostname,
                    config.site.port,
                    &config.site.name,
                    home.id,
                )
                .await?
        }
    };

    Ok(SiteTree { root, home, site })
}

/// Ensure configured section pages exist, in declaration order. A section's
/// ancestors must already exist (be declared earlier).
pub async fn ensure_sections<S: PageStore + ?Sized>(
    store: &S,
    home: &DestinationNode,
    sections: &[SectionConfig],
) -> Result<Vec<DestinationNode>> {
    let mut created = Vec::new();
    for section in sections {
        let mut segments: Vec<String> = section
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(slugify)
            .collect();
        let Some(slug) = segments.pop() else {
            bail!("section path '{}' is empty", section.path);
        };

        let parent = walk(store, home, &segments, &section.path).await?;

        let mut fields = FieldSet::new();
        fields.insert("title".into(), Value::String(section.title.clone()));
        let mut upserted =
            upsert_page(store, parent.id, section.page_type, &slug, &fields, false).await?;
        if upserted.publish {
            publish_page(store, &mut upserted.node).await?;
        }
        if upserted.created {
            tracing::info!(path = %upserted.node.url_path, "created section");
        }
        created.push(upserted.node);
    }
    Ok(created)
}

/// Find the node at a section path below home; `/` is home itself.
pub async fn resolve_section<S: PageStore + ?Sized>(
    store: &S,
    home: &DestinationNode,
    path: &str,
) -> Result<DestinationNode> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(slugify)
        .collect();
    walk(store, home, &segments, path).await
}

async fn walk<S: PageStore + ?Sized>(
    store: &S,
    home: &DestinationNode,
    segments: &[String],
    path: &str,
) -> Result<DestinationNode> {
    let mut node = home.clone();
    for segment in segments {
        node = match store.find_child(node.id, segment).await? {
            Some(child) => child,
            None => bail!(
                "section '{}' not found under '{}' (declare it in [[sections]])",
                segment,
                path
            ),
        };
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::error::MigrateError;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;

    fn config(extra: &str) -> Config {
        parse_config(&format!(
            "[db]\npath = \"x.sqlite\"\n[site]\nname = \"HOT Website\"\nport = 8000\n[source]\nroot = \"/nonexistent\"\n{}",
            extra
        ))
        .unwrap()
    }

    const SECTIONS: &str = r#"
[[sections]]
path = "/updates"
title = "Updates"
page_type = "magazine-index"

[[sections]]
path = "/about/team"
title = "Team"
"#;

    #[tokio::test]
    async fn setup_is_repeatable() {
        let store = Arc::new(InMemoryStore::new());
        let images = ImageResolver::new(store.clone(), Default::default());
        let cfg = config(
            r#"
[[sections]]
path = "/about"
title = "About"
page_type = "static"
"#,
        );
        let cfg = Config {
            sections: [cfg.sections.clone(), config(SECTIONS).sections].concat(),
            ..cfg
        };

        let first = run_setup(store.as_ref(), &images, &cfg, SetupOptions::default())
            .await
            .unwrap();
        let second = run_setup(store.as_ref(), &images, &cfg, SetupOptions::default())
            .await
            .unwrap();

        assert_eq!(first.tree.home.slug, "hot-website");
        assert_eq!(first.tree.home.url_path, "/");
        assert_eq!(first.tree.site.port, 8000);
        assert_eq!(first.tree.home.id, second.tree.home.id);
        assert_eq!(first.tree.site.id, second.tree.site.id);

        let paths: Vec<_> = second.sections.iter().map(|n| n.url_path.as_str()).collect();
        assert_eq!(paths, vec!["/about", "/updates", "/about/team"]);
        assert!(first.tree.home.live);
        assert!(first.sections.iter().all(|n| n.live));
        assert!(second.sections.iter().all(|n| n.live));
        // root + home + 3 sections
        assert_eq!(store.list_nodes().await.unwrap().len(), 5);

        let team = resolve_section(store.as_ref(), &second.tree.home, "/about/team/")
            .await
            .unwrap();
        assert_eq!(team.page_type, PageType::Section);
    }

    #[tokio::test]
    async fn missing_ancestor_fails() {
        let store = Arc::new(InMemoryStore::new());
        let images = ImageResolver::new(store.clone(), Default::default());
        let cfg = config(SECTIONS);
        assert!(run_setup(store.as_ref(), &images, &cfg, SetupOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn section_type_conflict_aborts() {
        let store = Arc::new(InMemoryStore::new());
        let images = ImageResolver::new(store.clone(), Default::default());
        let cfg = config("[[sections]]\npath = \"/updates\"\ntitle = \"Updates\"\n");
        let tree = run_setup(store.as_ref(), &images, &cfg, SetupOptions::default())
            .await
            .unwrap()
            .tree;

        let cfg = config(
            "[[sections]]\npath = \"/updates\"\ntitle = \"Updates\"\npage_type = \"magazine-index\"\n",
        );
        let err = ensure_sections(store.as_ref(), &tree.home, &cfg.sections)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::TypeConflict { .. })
        ));
    }

    #[tokio::test]
    async fn scratch_clears_migrated_nodes() {
        let store = Arc::new(InMemoryStore::new());
        let images = ImageResolver::new(store.clone(), Default::default());
        let cfg = config("[[sections]]\npath = \"/updates\"\ntitle = \"Updates\"\n");
        let first = run_setup(store.as_ref(), &images, &cfg, SetupOptions::default())
            .await
            .unwrap();

        let again = run_setup(
            store.as_ref(),
            &images,
            &cfg,
            SetupOptions {
                scratch: true,
                import_images: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(again.removed_nodes, 2);
        assert_ne!(again.tree.home.id, first.tree.home.id);
        assert_eq!(store.list_nodes().await.unwrap().len(), 3);
    }
}
