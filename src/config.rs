//! TOML configuration for a migration run.
//!
//! ```toml
//! [db]
//! path = "./data/site.sqlite"
//!
//! [site]
//! name = "Humanitarian OpenStreetMap Team"
//! hostname = "localhost"
//! port = 8000
//!
//! [source]
//! root = "./legacy-site"
//!
//! [images]
//! dedupe_uploads_and_cdn = true
//!
//! [[sections]]
//! path = "/updates"
//! title = "Updates"
//! page_type = "magazine-index"
//!
//! [[content_map]]
//! pattern = "_posts/*.md"
//! destination_type = "article"
//! parent = "/updates"
//! legacy_parent_path = "/updates"
//! field_map = { "Author" = "authors" }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::content_map::ContentMapEntry;
use crate::schema::PageType;
use crate::slug::slugify;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub site: SiteConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub rendering: RenderingConfig,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
    #[serde(default)]
    pub content_map: Vec<ContentMapEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub name: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    /// Directory under `root` holding uploaded images.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_uploads_dir() -> String {
    "_uploads".to_string()
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string(), "mdx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    /// Public base URL under which uploads were mirrored.
    #[serde(default = "default_cdn_base_url")]
    pub cdn_base_url: String,
    #[serde(default = "default_uploads_prefix")]
    pub uploads_prefix: String,
    /// Treat `/uploads/x` and `{cdn_base_url}x` as the same image.
    #[serde(default)]
    pub dedupe_uploads_and_cdn: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            cdn_base_url: default_cdn_base_url(),
            uploads_prefix: default_uploads_prefix(),
            dedupe_uploads_and_cdn: false,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

fn default_cdn_base_url() -> String {
    "https://cdn.hotosm.org/website/".to_string()
}
fn default_uploads_prefix() -> String {
    "/uploads/".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_fetch_concurrency() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RenderingConfig {
    /// Absolute URL of the legacy site. Links starting with it are treated
    /// as internal.
    #[serde(default)]
    pub legacy_base_url: Option<String>,
}

/// A section page created during setup, e.g. `/updates`.
#[derive(Debug, Deserialize, Clone)]
pub struct SectionConfig {
    pub path: String,
    pub title: String,
    #[serde(default = "default_section_type")]
    pub page_type: PageType,
}

fn default_section_type() -> PageType {
    PageType::Section
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.site.name.trim().is_empty() {
        bail!("site.name must not be empty");
    }

    if config.source.extensions.is_empty() {
        bail!("source.extensions must list at least one extension");
    }

    if config.images.fetch_concurrency == 0 {
        bail!("images.fetch_concurrency must be >= 1");
    }
    if config.images.fetch_timeout_secs == 0 {
        bail!("images.fetch_timeout_secs must be > 0");
    }
    if !config.images.cdn_base_url.ends_with('/') {
        bail!("images.cdn_base_url must end with '/'");
    }

    for section in &config.sections {
        if section.path.trim_matches('/').is_empty() {
            bail!("sections: path must not be the site root");
        }
        if !section.page_type.is_migratable() {
            bail!(
                "sections: '{}' cannot be created as type '{}'",
                section.path,
                section.page_type
            );
        }
    }

    let declared: Vec<String> = config.sections.iter().map(|s| section_key(&s.path)).collect();
    for entry in &config.content_map {
        entry
            .validate()
            .with_context(|| format!("Invalid content_map entry '{}'", entry.pattern))?;
        let parent = section_key(&entry.parent);
        if !parent.is_empty() && !declared.contains(&parent) {
            bail!(
                "content_map '{}': parent '{}' is not a declared section",
                entry.pattern,
                entry.parent
            );
        }
    }

    Ok(config)
}

/// Section path as the page tree sees it: slugified segments, no slashes at
/// either end. Home is the empty string.
fn section_key(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(slugify)
        .collect::<Vec<_>>()
        .join("/")
}
