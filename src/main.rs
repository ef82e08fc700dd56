//! # Content Migrate CLI (`cmig`)
//!
//! The `cmig` binary drives a migration of a legacy markdown export into the
//! page tree: database setup, the migration run itself, and the reports used
//! to check the result.
//!
//! ## Usage
//!
//! ```bash
//! cmig --config ./config/cmig.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cmig init` | Create the SQLite database and run schema migrations |
//! | `cmig setup` | Create the home page, site record and sections |
//! | `cmig run` | Migrate every content map entry |
//! | `cmig images import` | Import the uploads directory as image assets |
//! | `cmig report` | Print the old → new URL mapping as CSV |
//! | `cmig stats` | Front-matter key statistics per glob |
//! | `cmig redirects` | List stored redirects |
//! | `cmig completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # First run from an empty database, importing uploads
//! cmig init
//! cmig run --import-images
//!
//! # Re-run only the posts, aborting on the first bad file
//! cmig run --only '_posts/*.md' --strict
//!
//! # See what a run would do without touching the database
//! cmig run --dry-run
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use content_migrate::config::{self, Config};
use content_migrate::images::ImageResolver;
use content_migrate::ingest::{print_summary, run_migration, RunOptions};
use content_migrate::progress::ProgressMode;
use content_migrate::setup::{run_setup, SetupOptions};
use content_migrate::store::memory::InMemoryStore;
use content_migrate::store::sqlite::SqliteStore;
use content_migrate::store::{AssetStore, PageStore, RedirectStore};
use content_migrate::{db, migrate, report, stats};

/// Content Migrate CLI: move a front-matter markdown export into a page tree.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cmig.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cmig",
    about = "Re-runnable migration of front-matter markdown into a page tree",
    version,
    long_about = "Content Migrate reads a static-site export (markdown with YAML front-matter), \
    maps every file onto a typed page below the configured sections, rewrites internal links and \
    images, and records redirects from the old URLs. Runs are idempotent."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cmig.toml")]
    config: PathBuf,

    /// Progress on stderr: off, human or json. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to repeat.
    Init,

    /// Create the home page, site record and configured sections.
    Setup {
        /// Delete previously migrated pages and redirects first.
        #[arg(long)]
        scratch: bool,
    },

    /// Migrate the legacy export.
    ///
    /// Runs setup, then the skeleton pass over every content map entry, then
    /// renders bodies and writes redirects.
    Run {
        /// Source root, overriding `[source].root`.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Only run the content map entry with this pattern (repeatable).
        #[arg(long)]
        only: Vec<String>,

        /// Delete previously migrated pages and redirects first.
        #[arg(long)]
        scratch: bool,

        /// Import the uploads directory before migrating.
        #[arg(long)]
        import_images: bool,

        /// Abort on the first parse error or type conflict.
        #[arg(long)]
        strict: bool,

        /// Migrate into a throwaway in-memory store; no network access.
        #[arg(long)]
        dry_run: bool,
    },

    /// Image asset management.
    Images {
        #[command(subcommand)]
        action: ImagesAction,
    },

    /// Print the old → new URL mapping of migrated pages as CSV.
    Report {
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Front-matter key statistics.
    ///
    /// Without patterns, every content map pattern is inspected.
    Stats {
        /// Globs relative to the source root.
        patterns: Vec<String>,

        /// Number of most frequent values shown per key.
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// List stored redirects.
    Redirects,

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

/// Image subcommands.
#[derive(Subcommand)]
enum ImagesAction {
    /// Import every image in the uploads directory.
    Import {
        /// Delete all stored images first.
        #[arg(long)]
        scratch: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "cmig", &mut io::stdout());
        return Ok(());
    }

    let mut cfg = config::load_config(&cli.config)?;
    let progress = match &cli.progress {
        Some(mode) => mode.parse::<ProgressMode>()?,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Setup { scratch } => {
            let store = open_store(&cfg).await?;
            let images = ImageResolver::new(store.clone(), cfg.images.clone());
            let outcome = run_setup(
                store.as_ref(),
                &images,
                &cfg,
                SetupOptions {
                    scratch,
                    import_images: false,
                },
            )
            .await?;
            println!("setup");
            if scratch {
                println!("  removed pages: {}", outcome.removed_nodes);
            }
            println!(
                "  home: {} ({})",
                outcome.tree.home.title, outcome.tree.home.url_path
            );
            println!(
                "  site: {}:{}",
                outcome.tree.site.hostname, outcome.tree.site.port
            );
            for section in &outcome.sections {
                println!("  section: {} ({})", section.url_path, section.page_type);
            }
            println!("ok");
        }
        Commands::Run {
            source,
            only,
            scratch,
            import_images,
            strict,
            dry_run,
        } => {
            if let Some(source) = source {
                cfg.source.root = source;
            }
            let options = RunOptions {
                only,
                scratch,
                import_images,
                strict,
                dry_run,
            };
            let reporter = progress.reporter();

            let summary = if dry_run {
                let store = Arc::new(InMemoryStore::new());
                run_migration(store, &cfg, &options, reporter.as_ref()).await?
            } else {
                let store = open_store(&cfg).await?;
                let summary = run_migration(store.clone(), &cfg, &options, reporter.as_ref()).await?;
                store.pool().close().await;
                summary
            };
            print_summary(&summary, dry_run);
            if !summary.is_clean() {
                bail!(
                    "migration completed with failures ({} failed, {} abandoned)",
                    summary.failed,
                    summary.abandoned
                );
            }
        }
        Commands::Images { action } => match action {
            ImagesAction::Import { scratch } => {
                let store = open_store(&cfg).await?;
                if scratch {
                    let removed = store.delete_assets().await?;
                    println!("  removed images: {}", removed);
                }
                let images = ImageResolver::new(store.clone(), cfg.images.clone());
                let dir = cfg.source.root.join(&cfg.source.uploads_dir);
                let imported = images.import_uploads(&dir).await?;
                println!("images import {}", dir.display());
                println!("  imported: {}", imported.imported);
                println!("  existing: {}", imported.existing);
                println!("  skipped: {}", imported.skipped);
                println!("ok");
            }
        },
        Commands::Report { output } => {
            let store = open_store(&cfg).await?;
            let rows =
                report::build_report(store.as_ref(), cfg.rendering.legacy_base_url.as_deref())
                    .await?;
            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)?;
                    report::write_report(&rows, file)?;
                    eprintln!("Wrote {} rows to {}", rows.len(), path.display());
                }
                None => report::write_report(&rows, io::stdout().lock())?,
            }
        }
        Commands::Stats { patterns, top } => {
            stats::run_stats(&cfg, &patterns, top)?;
        }
        Commands::Redirects => {
            let store = open_store(&cfg).await?;
            let redirects = store.list_redirects().await?;
            for redirect in &redirects {
                let target = match store.get_node(redirect.node_id).await? {
                    Some(node) => node.url_path,
                    None => format!("#{}", redirect.node_id),
                };
                println!("{} -> {}", redirect.old_path, target);
            }
            println!("{} redirects", redirects.len());
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
