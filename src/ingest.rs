//! Migration orchestration.
//!
//! A run moves through fixed phases that never overlap:
//!
//! 1. **Setup**: root, home, site and sections ([`crate::setup`])
//! 2. **Skeleton pass**: every selected entry's parent and files are looked
//!    up first; then every document is read, mapped and upserted, filling the
//!    [`PathIndex`] and accruing redirects for new nodes
//! 3. **Render pass**: images are prefetched, then every body is rendered
//!    against the complete index, saved as a revision and published
//! 4. **Redirect flush**
//!
//! Rendering only starts once every node of the run exists, so a link
//! resolves no matter which of the two documents was enumerated first.
//! New pages stay drafts until their content is saved, so a run that stops
//! early never leaves empty pages live.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::content_map::{self, ContentMapEntry, SourceFile};
use crate::error::MigrateError;
use crate::fields::{FieldMapper, FieldRule};
use crate::images::ImageResolver;
use crate::models::{DestinationNode, PathIndex, ResolvedPaths, SourceDocument};
use crate::progress::{MigrationEvent, ProgressReporter};
use crate::reader::read_document;
use crate::redirects::{accrue_redirects, RedirectSet};
use crate::render::{self, RenderContext};
use crate::setup::{resolve_section, run_setup, SetupOptions};
use crate::slug::resolve_paths;
use crate::store::MigrationStore;
use crate::upsert::{publish_page, upsert_page};

/// Options of a single `cmig run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to content map entries with these patterns.
    pub only: Vec<String>,
    pub scratch: bool,
    pub import_images: bool,
    /// Abort on the first parse error or type conflict.
    pub strict: bool,
    /// Run against a throwaway store without fetching remote images.
    pub dry_run: bool,
}

/// A document that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: String,
    pub message: String,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub run_id: String,
    pub documents: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Files not attempted because their entry hit a type conflict.
    pub abandoned: u64,
    pub drafts: u64,
    pub rendered: u64,
    pub images_resolved: u64,
    pub redirects_created: u64,
    pub redirects_existing: u64,
    pub failures: Vec<Failure>,
}

impl MigrationSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0
    }
}

/// A document that made it through the skeleton pass.
struct Processed {
    doc: SourceDocument,
    paths: ResolvedPaths,
    node: DestinationNode,
    publish: bool,
}

impl Processed {
    fn goes_live(&self) -> bool {
        self.node.live || self.publish
    }
}

/// Run a full migration against `store`.
pub async fn run_migration<S: MigrationStore + 'static>(
    store: Arc<S>,
    config: &Config,
    options: &RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<MigrationSummary> {
    let mut summary = MigrationSummary {
        run_id: Uuid::new_v4().to_string(),
        ..Default::default()
    };

    let mut images = ImageResolver::new(store.clone(), config.images.clone());
    if options.dry_run {
        images = images.without_fetching();
    }

    // Setup
    let setup = run_setup(
        store.as_ref(),
        &images,
        config,
        SetupOptions {
            scratch: options.scratch,
            import_images: options.import_images,
        },
    )
    .await?;
    let home = setup.tree.home.clone();
    tracing::info!(run_id = %summary.run_id, home = home.id, "setup complete");

    let entries = content_map::select(&config.content_map, &options.only)?;

    // Skeleton pass
    let mut planned = Vec::with_capacity(entries.len());
    for entry in entries {
        progress.report(MigrationEvent::Scanning {
            entry: entry.pattern.clone(),
        });
        let parent = resolve_section(store.as_ref(), &home, &entry.parent)
            .await
            .with_context(|| format!("content_map '{}': parent not found", entry.pattern))?;
        let files = entry.scan(&config.source.root, &config.source.extensions)?;
        planned.push((entry, parent, files));
    }

    let mut index = seed_path_index(store.as_ref()).await?;
    tracing::debug!(seeded = index.len(), "path index seeded from store");
    let mut redirects = RedirectSet::new();
    let mut processed: Vec<Processed> = Vec::new();

    for (entry, parent, files) in &planned {
        let rules = entry.rules();
        let total = files.len() as u64;

        for (i, file) in files.iter().enumerate() {
            summary.documents += 1;
            let outcome =
                process_document(store.as_ref(), &images, config, entry, &rules, parent, file).await;

            match outcome {
                Ok((item, created)) => {
                    if created {
                        summary.created += 1;
                        redirects.extend(accrue_redirects(
                            &item.doc,
                            &item.paths.legacy_path,
                            &item.node,
                        ));
                    } else {
                        summary.updated += 1;
                    }
                    if !item.goes_live() {
                        summary.drafts += 1;
                    }
                    index.insert(&item.paths.legacy_path, item.node.clone());
                    processed.push(item);
                }
                Err(e) => {
                    let conflict = matches!(
                        e.downcast_ref::<MigrateError>(),
                        Some(MigrateError::TypeConflict { .. })
                    );
                    handle_failure(&mut summary, &file.path, e, options.strict)?;
                    if conflict {
                        let remaining = total - (i as u64 + 1);
                        summary.abandoned += remaining;
                        tracing::error!(
                            entry = %entry.pattern,
                            remaining,
                            "type conflict, abandoning the rest of this entry"
                        );
                        break;
                    }
                }
            }

            progress.report(MigrationEvent::Skeleton {
                entry: entry.pattern.clone(),
                n: i as u64 + 1,
                total,
            });
        }
    }

    for item in processed.iter_mut() {
        if item.publish && item.doc.body.trim().is_empty() {
            publish_page(store.as_ref(), &mut item.node).await?;
        }
    }

    // Render pass
    let references: BTreeSet<String> = processed
        .iter()
        .flat_map(|p| render::image_references(&p.doc.body))
        .collect();
    progress.report(MigrationEvent::Prefetching {
        total: references.len() as u64,
    });
    summary.images_resolved = images.prefetch(references.into_iter().collect()).await as u64;

    let to_render: Vec<&Processed> = processed
        .iter()
        .filter(|p| !p.doc.body.trim().is_empty())
        .collect();
    let render_total = to_render.len() as u64;
    let run_id = summary.run_id.clone();

    for (i, item) in to_render.into_iter().enumerate() {
        let rendered = render_document(store.as_ref(), &images, config, &index, item, &run_id).await;
        match rendered {
            Ok(()) => summary.rendered += 1,
            Err(e) => handle_failure(&mut summary, &item.doc.source_path, e, options.strict)?,
        }
        progress.report(MigrationEvent::Rendering {
            n: i as u64 + 1,
            total: render_total,
        });
    }

    // Redirect flush
    progress.report(MigrationEvent::Flushing {
        total: redirects.len() as u64,
    });
    let flushed = redirects.flush(store.as_ref(), setup.tree.site.id).await?;
    summary.redirects_created = flushed.created;
    summary.redirects_existing = flushed.existing;

    Ok(summary)
}

/// Index every stored node that records the legacy path it was migrated from.
pub async fn seed_path_index<S: MigrationStore + ?Sized>(store: &S) -> Result<PathIndex> {
    let mut index = PathIndex::new();
    for node in store.list_nodes().await? {
        if let Some(old_path) = node.recorded_old_path() {
            index.insert(&old_path, node);
        }
    }
    Ok(index)
}

async fn process_document<S: MigrationStore + ?Sized>(
    store: &S,
    images: &ImageResolver,
    config: &Config,
    entry: &ContentMapEntry,
    rules: &[FieldRule],
    parent: &DestinationNode,
    file: &SourceFile,
) -> Result<(Processed, bool)> {
    let doc = read_document(&file.path)?;
    let paths = resolve_paths(
        &doc,
        entry.legacy_parent_path.as_deref(),
        &config.source.root,
    )?;
    let fields = FieldMapper::new(entry.destination_type, images, &doc.source_path)
        .map(&doc, &paths, &file.relative, rules)
        .await?;

    let upserted = upsert_page(
        store,
        parent.id,
        entry.destination_type,
        &paths.slug,
        &fields,
        doc.is_unpublished(),
    )
    .await?;

    tracing::debug!(
        path = %file.relative,
        legacy_path = %paths.legacy_path,
        url_path = %upserted.node.url_path,
        created = upserted.created,
        "skeleton"
    );

    Ok((
        Processed {
            doc,
            paths,
            node: upserted.node,
            publish: upserted.publish,
        },
        upserted.created,
    ))
}

async fn render_document<S: MigrationStore + ?Sized>(
    store: &S,
    images: &ImageResolver,
    config: &Config,
    index: &PathIndex,
    item: &Processed,
    run_id: &str,
) -> Result<()> {
    let references = render::image_references(&item.doc.body);
    let resolved: HashMap<_, _> = render::resolve_images(&references, images).await;
    let base_path = render::base_path_of(&item.paths.legacy_path);

    let html = render::render_html(
        &item.doc.body,
        &RenderContext {
            index,
            images: &resolved,
            base_path: &base_path,
            legacy_base_url: config.rendering.legacy_base_url.as_deref(),
        },
    );

    store
        .save_revision(
            item.node.id,
            &render::rich_content(&html),
            item.goes_live(),
            run_id,
        )
        .await?;
    if item.publish {
        store.set_live(item.node.id, true).await?;
    }
    Ok(())
}

/// Count and log a per-document failure; with `strict`, make it terminal.
fn handle_failure(
    summary: &mut MigrationSummary,
    path: &Path,
    err: anyhow::Error,
    strict: bool,
) -> Result<()> {
    let classified = err.downcast_ref::<MigrateError>();

    if classified.map(MigrateError::is_skippable).unwrap_or(false) {
        summary.skipped += 1;
        tracing::info!(path = %path.display(), reason = %err, "skipped");
        return Ok(());
    }

    let terminal = strict
        && matches!(
            classified,
            Some(MigrateError::Parse { .. }) | Some(MigrateError::TypeConflict { .. })
        );
    if terminal {
        return Err(err.context(format!("aborting run (--strict): {}", path.display())));
    }

    summary.failed += 1;
    tracing::error!(path = %path.display(), error = %format!("{:#}", err), "document failed");
    summary.failures.push(Failure {
        path: path.display().to_string(),
        message: format!("{:#}", err),
    });
    Ok(())
}

/// Print the run summary on stdout.
pub fn print_summary(summary: &MigrationSummary, dry_run: bool) {
    if dry_run {
        println!("migrate (dry-run)");
    } else {
        println!("migrate {}", summary.run_id);
    }
    println!("  documents: {}", summary.documents);
    println!("  created: {}", summary.created);
    println!("  updated: {}", summary.updated);
    println!("  drafts: {}", summary.drafts);
    println!("  skipped: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    if summary.abandoned > 0 {
        println!("  abandoned: {}", summary.abandoned);
    }
    println!("  rendered: {}", summary.rendered);
    println!("  images resolved: {}", summary.images_resolved);
    println!(
        "  redirects: {} created, {} existing",
        summary.redirects_created, summary.redirects_existing
    );
    for failure in &summary.failures {
        println!("  ! {}: {}", failure.path, failure.message);
    }
    if summary.is_clean() {
        println!("ok");
    } else {
        println!("completed with failures");
    }
}
