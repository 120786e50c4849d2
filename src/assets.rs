//! Content-addressed asset staging
//!
//! Remote element sources are downloaded once per job into
//! `<job>/assets/<sha256(url)>.<ext>`. A failed download is not fatal: the
//! element keeps its remote reference and the failure is recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExportError, Result};
use crate::scene::SceneDescription;

/// Extension used when a URL has none or an implausible one.
pub const GENERIC_EXTENSION: &str = "bin";

/// Downloads one remote reference to a local file.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Streaming HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    client: Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("scenecast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ExportError::AssetDownload {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        // Write to a sibling temp file so a half-written download never
        // looks like a cache hit.
        let partial = dest.with_extension("part");
        let mut file = fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&partial).await;
                    return Err(ExportError::AssetDownload {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;
        drop(file);
        fs::rename(&partial, dest).await?;

        Ok(written)
    }
}

/// One staged remote reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetCacheEntry {
    pub url: String,
    /// Hex SHA-256 of the URL.
    pub hash: String,
    pub path: PathBuf,
}

/// A remote reference that could not be staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingFailure {
    pub url: String,
    pub reason: String,
}

/// Result of staging a whole scene.
#[derive(Debug, Clone)]
pub struct StagedScene {
    /// Copy of the input scene with resolved local sources.
    pub scene: SceneDescription,
    pub entries: Vec<AssetCacheEntry>,
    pub failures: Vec<StagingFailure>,
}

/// Hex SHA-256 of a source reference.
#[must_use]
pub fn reference_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extension of the URL path if it looks like a real file extension.
#[must_use]
pub fn plausible_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Local file name for a remote reference: `<hash>.<ext>`.
#[must_use]
pub fn cache_file_name(url: &str) -> String {
    let ext = plausible_extension(url).unwrap_or_else(|| GENERIC_EXTENSION.to_string());
    format!("{}.{ext}", reference_hash(url))
}

/// Resolves remote element sources into a job's asset directory.
pub struct AssetStager {
    fetcher: Arc<dyn AssetFetcher>,
    asset_dir: PathBuf,
    cache: Mutex<HashMap<String, AssetCacheEntry>>,
}

impl AssetStager {
    #[must_use]
    pub fn new(fetcher: Arc<dyn AssetFetcher>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            asset_dir: asset_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Stage one remote reference. Repeated calls with the same URL return
    /// the same entry and download at most once.
    pub async fn stage_url(&self, url: &str) -> Result<AssetCacheEntry> {
        // Held across the download so two callers never fetch the same URL.
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(url) {
            debug!(url, path = %entry.path.display(), "asset cache hit");
            return Ok(entry.clone());
        }

        let hash = reference_hash(url);
        let path = self.asset_dir.join(cache_file_name(url));

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(url, path = %path.display(), "asset already on disk");
        } else {
            fs::create_dir_all(&self.asset_dir).await?;
            let bytes = self.fetcher.fetch_to_file(url, &path).await?;
            info!(url, bytes, path = %path.display(), "staged asset");
        }

        let entry = AssetCacheEntry {
            url: url.to_string(),
            hash,
            path,
        };
        cache.insert(url.to_string(), entry.clone());
        Ok(entry)
    }

    /// Stage every remote source in `scene`, returning a resolved copy.
    ///
    /// Elements whose download fails keep their remote reference.
    #[instrument(skip_all, fields(elements = scene.elements.len()))]
    pub async fn stage_scene(&self, scene: &SceneDescription) -> StagedScene {
        let mut entries = Vec::new();
        let mut failures = Vec::new();
        let mut elements = Vec::with_capacity(scene.elements.len());

        for element in &scene.elements {
            let Some(url) = element.source.as_deref().filter(|_| element.is_remote()) else {
                elements.push(element.clone());
                continue;
            };

            match self.stage_url(url).await {
                Ok(entry) => {
                    elements.push(element.with_resolved_source(&entry.path));
                    if !entries.iter().any(|e: &AssetCacheEntry| e.url == entry.url) {
                        entries.push(entry);
                    }
                }
                Err(e) => {
                    warn!(url, error = %e, "asset staging failed, keeping remote reference");
                    failures.push(StagingFailure {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                    elements.push(element.clone());
                }
            }
        }

        StagedScene {
            scene: SceneDescription {
                elements,
                ..scene.clone()
            },
            entries,
            failures,
        }
    }
}
