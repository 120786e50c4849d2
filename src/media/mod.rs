//! External media tooling: probing, audio extraction, encoding and direct
//! frame extraction.
//!
//! All four operations go through the [`MediaTools`] trait so the pipeline
//! can run against ffmpeg in production and a deterministic double in tests.

pub mod audio;
pub mod fallback;
pub mod ffmpeg;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

pub use audio::AudioExtractor;
pub use fallback::FallbackExtractor;
pub use ffmpeg::FfmpegTools;

/// Image sequence + optional audio → container.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    /// printf-style pattern, e.g. `frames/frame_%05d.png`, numbered from 0.
    pub frame_pattern: PathBuf,
    pub fps: u32,
    pub audio: Option<PathBuf>,
    pub pixel_format: String,
    pub output: PathBuf,
}

/// Decode `duration` seconds of `source` at `fps` into an image sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub source: PathBuf,
    pub fps: u32,
    pub duration: f64,
    /// Upper bound on frames written.
    pub max_frames: u64,
    /// printf-style pattern, numbered from 0.
    pub output_pattern: PathBuf,
}

/// Media operations delegated to external binaries.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Copy the first audio stream of `video` into `output` without re-encoding.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Mux frames and optional audio. Non-zero exit is an encode error.
    async fn encode(&self, request: &EncodeRequest) -> Result<()>;

    /// Extract frames straight from a source video.
    async fn extract_frames(&self, request: &ExtractRequest) -> Result<()>;
}
