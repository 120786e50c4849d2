//! Serve surface media fetches from the staged asset directory
//!
//! Every local media file in the scene is published under a virtual path
//! `/__assets/<hash>.<ext>`. When the surface fetches one of those paths the
//! bytes come straight off disk. Video containers honour `Range` requests
//! with `206 Partial Content` so players can seek without pulling the whole
//! file; everything else is answered in full.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::assets::cache_file_name;
use crate::error::Result;
use crate::scene::SceneDescription;

pub const VIRTUAL_PREFIX: &str = "/__assets/";

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes=(\d*)-(\d*)$").expect("valid regex")
});

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "mkv", "ogv"];

/// A fetch issued by the surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Raw `Range` header value.
    #[serde(default)]
    pub range: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl FetchRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            range: None,
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }
}

/// A locally served response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Parsed `Range` against a known content length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    /// No usable range; send everything.
    Full,
    /// Inclusive byte bounds.
    Partial(u64, u64),
    Unsatisfiable,
}

fn parse_range(header: &str, len: u64) -> ByteRange {
    let Some(caps) = RANGE_RE.captures(header.trim()) else {
        return ByteRange::Full;
    };
    let start = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
    let end = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());

    match (start, end) {
        (None, None) => ByteRange::Full,
        // Suffix form: the last `n` bytes.
        (None, Some(n)) => {
            if n == 0 || len == 0 {
                ByteRange::Unsatisfiable
            } else {
                ByteRange::Partial(len.saturating_sub(n), len - 1)
            }
        }
        (Some(s), _) if s >= len => ByteRange::Unsatisfiable,
        (Some(s), None) => ByteRange::Partial(s, len - 1),
        (Some(s), Some(e)) if e < s => ByteRange::Full,
        (Some(s), Some(e)) => ByteRange::Partial(s, e.min(len - 1)),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_video_like(path: &Path) -> bool {
    VIDEO_EXTENSIONS.contains(&extension(path).as_str())
}

fn mime_type(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "m4v" => "video/x-m4v",
        "mkv" => "video/x-matroska",
        "ogv" => "video/ogg",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Virtual path → local file routing table for one job.
#[derive(Debug, Clone, Default)]
pub struct AssetInterceptor {
    routes: HashMap<String, PathBuf>,
}

impl AssetInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every element source that exists on local disk.
    #[must_use]
    pub fn from_scene(scene: &SceneDescription) -> Self {
        let mut interceptor = Self::new();
        for path in scene.elements.iter().filter_map(|e| e.existing_local_path()) {
            interceptor.register(&path);
        }
        interceptor
    }

    /// Publish `path` and return its virtual path.
    pub fn register(&mut self, path: &Path) -> String {
        let name = cache_file_name(&path.to_string_lossy());
        self.routes.insert(name.clone(), path.to_path_buf());
        format!("{VIRTUAL_PREFIX}{name}")
    }

    #[must_use]
    pub fn virtual_path_for(&self, path: &Path) -> Option<String> {
        let name = cache_file_name(&path.to_string_lossy());
        self.routes
            .contains_key(&name)
            .then(|| format!("{VIRTUAL_PREFIX}{name}"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Local file for a fetched URL. Accepts bare paths and absolute URLs on any origin.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<&Path> {
        let path = if url.starts_with('/') {
            url.split(['?', '#']).next().unwrap_or(url).to_string()
        } else {
            url::Url::parse(url).ok()?.path().to_string()
        };
        let name = path.strip_prefix(VIRTUAL_PREFIX)?;
        self.routes.get(name).map(PathBuf::as_path)
    }

    /// Answer `request` from disk, or `None` to let it pass through.
    pub async fn intercept(&self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
        let head = match request.method.to_ascii_uppercase().as_str() {
            "GET" => false,
            "HEAD" => true,
            _ => return Ok(None),
        };
        let Some(path) = self.resolve(&request.url) else {
            return Ok(None);
        };

        let len = tokio::fs::metadata(path).await?.len();
        let video = is_video_like(path);
        let range = match (&request.range, video) {
            (Some(header), true) => parse_range(header, len),
            _ => ByteRange::Full,
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(mime_type(path)));
        if video {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }

        let (status, body) = match range {
            ByteRange::Unsatisfiable => {
                headers.insert(CONTENT_RANGE, header_value(&format!("bytes */{len}")));
                (StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new())
            }
            ByteRange::Partial(start, end) => {
                headers.insert(
                    CONTENT_RANGE,
                    header_value(&format!("bytes {start}-{end}/{len}")),
                );
                let body = if head {
                    Bytes::new()
                } else {
                    read_slice(path, start, end - start + 1).await?
                };
                headers.insert(CONTENT_LENGTH, header_value(&(end - start + 1).to_string()));
                (StatusCode::PARTIAL_CONTENT, body)
            }
            ByteRange::Full => {
                let body = if head {
                    Bytes::new()
                } else {
                    Bytes::from(tokio::fs::read(path).await?)
                };
                headers.insert(CONTENT_LENGTH, header_value(&len.to_string()));
                (StatusCode::OK, body)
            }
        };

        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "served intercepted fetch");
        Ok(Some(FetchResponse {
            status,
            headers,
            body,
        }))
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

async fn read_slice(path: &Path, start: u64, len: u64) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; usize::try_from(len).unwrap_or(0)];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
