//! Image resolution and import.
//!
//! Legacy documents refer to images either by upload path (`/uploads/x.png`)
//! or by absolute URL, and the same upload was often also served from a CDN
//! mirror. [`ImageResolver::resolve`] maps any of those spellings onto a single
//! stored [`ImageAsset`]:
//!
//! 1. exact match on stored title or file path
//! 2. the uploads/CDN mirror spelling, when `images.dedupe_uploads_and_cdn` is set
//! 3. for `http(s)` references, download, decode and store the image, reusing
//!    an existing asset with identical content
//!
//! Failures never propagate: an unresolvable image is logged and the caller
//! degrades gracefully. Resolution of one reference is serialized by a
//! per-reference lock, and storing fetched bytes by a per-content-hash lock,
//! so concurrent prefetching never creates duplicates.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use image::GenericImageView;
use sha2::{Digest, Sha256};

use crate::config::ImagesConfig;
use crate::models::{ImageAsset, NewImageAsset};
use crate::store::AssetStore;

/// Resolves image references against the asset store, fetching when needed.
pub struct ImageResolver {
    store: Arc<dyn AssetStore>,
    config: ImagesConfig,
    client: reqwest::Client,
    fetch_remote: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    hash_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    resolved: Mutex<HashMap<String, Option<ImageAsset>>>,
}

/// Outcome of importing the uploads directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadsImport {
    pub imported: u64,
    pub existing: u64,
    pub skipped: u64,
}

impl ImageResolver {
    pub fn new(store: Arc<dyn AssetStore>, config: ImagesConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            store,
            config,
            client,
            fetch_remote: true,
            locks: Mutex::new(HashMap::new()),
            hash_locks: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Never download remote images; only existing assets resolve.
    pub fn without_fetching(mut self) -> Self {
        self.fetch_remote = false;
        self
    }

    pub fn config(&self) -> &ImagesConfig {
        &self.config
    }

    /// Resolve a reference to a stored asset, or `None` if it cannot be found
    /// or fetched.
    pub async fn resolve(&self, reference: &str) -> Option<ImageAsset> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        let lock = keyed_lock(&self.locks, reference);
        let _guard = lock.lock().await;

        if let Some(cached) = self.cached(reference) {
            return cached;
        }

        let outcome = match self.resolve_uncached(reference).await {
            Ok(Some(asset)) => Some(asset),
            Ok(None) => {
                tracing::warn!(reference, "image not found");
                None
            }
            Err(e) => {
                tracing::warn!(reference, error = %format!("{:#}", e), "image could not be resolved");
                None
            }
        };

        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.to_string(), outcome.clone());
        outcome
    }

    /// Like [`resolve`](Self::resolve), retrying with the percent-decoded
    /// reference when the raw one does not resolve.
    pub async fn resolve_lenient(&self, reference: &str) -> Option<ImageAsset> {
        if let Some(asset) = self.resolve(reference).await {
            return Some(asset);
        }
        match urlencoding::decode(reference) {
            Ok(decoded) if decoded != reference => self.resolve(&decoded).await,
            _ => None,
        }
    }

    /// Resolve many references with bounded parallelism. Returns how many
    /// resolved.
    pub async fn prefetch(&self, references: Vec<String>) -> usize {
        let concurrency = self.config.fetch_concurrency.max(1);
        stream::iter(references)
            .map(|reference| async move { self.resolve_lenient(&reference).await.is_some() })
            .buffer_unordered(concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await
    }

    fn cached(&self, reference: &str) -> Option<Option<ImageAsset>> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
    }

    async fn resolve_uncached(&self, reference: &str) -> Result<Option<ImageAsset>> {
        if let Some(asset) = self.store.find_asset(reference).await? {
            return Ok(Some(asset));
        }

        if self.config.dedupe_uploads_and_cdn {
            if let Some(mirror) = self.mirror_title(reference) {
                if let Some(asset) = self.store.find_asset(&mirror).await? {
                    tracing::debug!(reference, mirror = %mirror, "matched mirrored image");
                    return Ok(Some(asset));
                }
            }
        }

        if !self.fetch_remote || !is_remote(reference) {
            return Ok(None);
        }

        let bytes = self.fetch(reference).await?;
        let asset = new_asset(reference, file_name(reference), bytes)?;
        let lock = keyed_lock(&self.hash_locks, &asset.content_hash);
        let _guard = lock.lock().await;
        if let Some(existing) = self.store.find_asset_by_hash(&asset.content_hash).await? {
            tracing::debug!(reference, id = existing.id, "fetched image matches an existing asset");
            return Ok(Some(existing));
        }

        let created = self.store.create_asset(&asset).await?;
        tracing::info!(reference, id = created.id, "image fetched");
        Ok(Some(created))
    }

    /// The other spelling of an uploads or CDN reference.
    pub fn mirror_title(&self, reference: &str) -> Option<String> {
        let uploads = &self.config.uploads_prefix;
        let cdn = &self.config.cdn_base_url;
        if let Some(rest) = reference.strip_prefix(uploads.as_str()) {
            Some(format!("{}{}", cdn, rest))
        } else {
            reference
                .strip_prefix(cdn.as_str())
                .map(|rest| format!("{}{}", uploads, rest))
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("{} returned {}", url, response.status());
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Register every file directly in `dir` as `{uploads_prefix}{name}`.
    ///
    /// Files already present (by title, or by CDN mirror when deduplicating)
    /// are left alone; files that are not decodable images are skipped.
    pub async fn import_uploads(&self, dir: &Path) -> Result<UploadsImport> {
        let mut summary = UploadsImport::default();
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "uploads directory not found, nothing to import");
            return Ok(summary);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list uploads: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let title = format!("{}{}", self.config.uploads_prefix, name);

            let mut existing = self.store.find_asset(&title).await?;
            if existing.is_none() && self.config.dedupe_uploads_and_cdn {
                if let Some(mirror) = self.mirror_title(&title) {
                    existing = self.store.find_asset(&mirror).await?;
                }
            }
            if existing.is_some() {
                summary.existing += 1;
                continue;
            }

            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read upload: {}", path.display()))?;
            let asset = match new_asset(&title, &name, bytes) {
                Ok(asset) => asset,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping upload");
                    summary.skipped += 1;
                    continue;
                }
            };

            let created = self.store.create_asset(&asset).await?;
            self.resolved
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(title, Some(created));
            summary.imported += 1;
        }

        Ok(summary)
    }
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

fn file_name(reference: &str) -> &str {
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    without_query
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
}

fn new_asset(title: &str, name: &str, bytes: Vec<u8>) -> Result<NewImageAsset> {
    let (width, height) = image_dimensions(&bytes)?;
    let content_hash = content_hash(&bytes);
    Ok(NewImageAsset {
        title: title.to_string(),
        file_path: format!("original_images/{}_{}", &content_hash[..8], name),
        width,
        height,
        content_hash,
        bytes,
    })
}

/// Decode an image and return its dimensions. Zero-sized images are rejected.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let img = image::load_from_memory(bytes).context("not a decodable image")?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        bail!("image has no pixels");
    }
    Ok((width, height))
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn keyed_lock(
    locks: &Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    key: &str,
) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    locks
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn dedupe_config() -> ImagesConfig {
        ImagesConfig {
            dedupe_uploads_and_cdn: true,
            ..ImagesConfig::default()
        }
    }

    /// Serve `body` to every request on a local port; returns the base URL.
    async fn serve(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn mirror_titles_both_ways() {
        let resolver = ImageResolver::new(Arc::new(InMemoryStore::new()), dedupe_config());
        assert_eq!(
            resolver.mirror_title("/uploads/map.png").as_deref(),
            Some("https://cdn.hotosm.org/website/map.png")
        );
        assert_eq!(
            resolver
                .mirror_title("https://cdn.hotosm.org/website/map.png")
                .as_deref(),
            Some("/uploads/map.png")
        );
        assert!(resolver.mirror_title("https://example.org/x.png").is_none());
    }

    #[test]
    fn file_name_drops_query() {
        assert_eq!(file_name("https://x.org/a/b.png?w=10"), "b.png");
        assert_eq!(file_name("/uploads/c.jpg"), "c.jpg");
    }

    #[test]
    fn rejects_non_images() {
        assert!(image_dimensions(b"not an image").is_err());
        assert_eq!(image_dimensions(&png(4, 3)).unwrap(), (4, 3));
    }

    #[tokio::test]
    async fn uploads_and_cdn_share_one_asset() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("map.png"), png(2, 2)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "text").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let resolver = ImageResolver::new(store.clone(), dedupe_config());
        let summary = resolver.import_uploads(dir.path()).await.unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);

        let by_upload = resolver.resolve("/uploads/map.png").await.unwrap();
        let by_cdn = resolver
            .resolve("https://cdn.hotosm.org/website/map.png")
            .await
            .unwrap();
        assert_eq!(by_upload.id, by_cdn.id);
        assert_eq!(store.count_assets().await.unwrap(), 1);

        let again = resolver.import_uploads(dir.path()).await.unwrap();
        assert_eq!(again.existing, 1);
        assert_eq!(again.imported, 0);
    }

    #[tokio::test]
    async fn unknown_upload_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ImageResolver::new(store.clone(), ImagesConfig::default());
        assert!(resolver.resolve("/uploads/absent.png").await.is_none());
    }

    #[tokio::test]
    async fn fetches_remote_images_once() {
        let base = serve(png(3, 5)).await;
        let store = Arc::new(InMemoryStore::new());
        let resolver = ImageResolver::new(store.clone(), ImagesConfig::default());

        let url = format!("{}/pics/photo.png", base);
        let refs = vec![url.clone(), url.clone(), url.clone()];
        assert_eq!(resolver.prefetch(refs).await, 3);

        let asset = resolver.resolve(&url).await.unwrap();
        assert_eq!((asset.width, asset.height), (3, 5));
        assert_eq!(asset.title, url);
        assert_eq!(store.count_assets().await.unwrap(), 1);

        // Same bytes under another URL reuse the asset.
        let other = resolver
            .resolve(&format!("{}/elsewhere/copy.png", base))
            .await
            .unwrap();
        assert_eq!(other.id, asset.id);
        assert_eq!(store.count_assets().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_copies_under_distinct_urls_share_one_asset() {
        let base = serve(png(6, 2)).await;
        let store = Arc::new(InMemoryStore::new());
        let resolver = ImageResolver::new(store.clone(), ImagesConfig::default());

        let refs: Vec<String> = (0..8).map(|i| format!("{}/copy-{}.png", base, i)).collect();
        assert_eq!(resolver.prefetch(refs.clone()).await, 8);
        assert_eq!(store.count_assets().await.unwrap(), 1);

        let first = resolver.resolve(&refs[0]).await.unwrap();
        let last = resolver.resolve(&refs[7]).await.unwrap();
        assert_eq!(first.id, last.id);
    }

    #[tokio::test]
    async fn percent_encoded_reference_falls_back_to_decoded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("my map.png"), png(2, 2)).unwrap();
        let resolver = ImageResolver::new(Arc::new(InMemoryStore::new()), ImagesConfig::default());
        resolver.import_uploads(dir.path()).await.unwrap();
        assert!(resolver.resolve_lenient("/uploads/my%20map.png").await.is_some());
    }

    #[tokio::test]
    async fn unreachable_url_is_not_an_error() {
        let resolver = ImageResolver::new(Arc::new(InMemoryStore::new()), ImagesConfig::default());
        assert!(resolver.resolve("http://127.0.0.1:9/missing.png").await.is_none());
    }
}
