//! `scenecast` - frame-accurate scene export
//!
//! Turns a declarative scene (timed video, image and text elements on a
//! canvas) into an MP4 by driving an external rendering surface frame by
//! frame and muxing the captured sequence with ffmpeg.
//!
//! # Features
//!
//! - **Asset staging**: remote sources downloaded once per job, content-addressed
//! - **Duration resolution**: longest video or extracted audio, never under 5s
//! - **Synchronized capture**: bounded per-player seeks, sampled drift detection
//! - **Fallback extraction**: single-video scenes decoded straight from source
//!   when the surface cannot keep sync
//! - **Merge, upload, progress webhooks**, and guaranteed job-directory cleanup
//!
//! # Example
//!
//! ```rust,no_run
//! use scenecast::{ExportConfig, ExportPipeline, ExportRequest, SceneDescription};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scene = SceneDescription::from_json(r#"{"elements": []}"#)?;
//!     let pipeline = ExportPipeline::from_config(ExportConfig::load()?)?;
//!     let outcome = pipeline.run(ExportRequest::new("demo", scene)).await?;
//!     println!("{} frames, {:.1}s", outcome.frame_count, outcome.estimate.final_duration);
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod capture;
pub mod codec;
pub mod config;
pub mod duration;
pub mod error;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod scene;
pub mod service;
pub mod surface;
pub mod sync;
pub mod upload;

pub use assets::{AssetCacheEntry, AssetFetcher, AssetStager, HttpAssetFetcher, StagedScene, StagingFailure};
pub use capture::{CaptureReport, FrameCaptureLoop, FrameRecord};
pub use config::ExportConfig;
pub use duration::{DurationEstimate, DurationResolver, MIN_EXPORT_DURATION};
pub use error::{ExportError, Result};
pub use job::{ExportJob, JobLayout, JobRegistry, JobState};
pub use media::{AudioExtractor, EncodeRequest, ExtractRequest, FallbackExtractor, FfmpegTools, MediaTools};
pub use pipeline::{cleanup_job_dir, ExportOutcome, ExportPipeline, ExportPlan};
pub use progress::{ExportStatus, ProgressEvent, ProgressReporter, ProgressSink, WebhookSink};
pub use scene::{ElementKind, Geometry, MediaElement, SceneDescription, SourceAddressing, TextStyle, Timing};
pub use service::{ExportRequest, ExportService, SubmitAck};
pub use surface::{
    AssetInterceptor, FetchRequest, FetchResponse, PlayerHandle, RemoteConnector, RemoteSurface, RenderSurface,
    SeekReport, SeekResolution, SurfaceConnector,
};
pub use sync::{FallbackDecision, SeekAccuracy, SyncPolicy};
pub use upload::{ArtifactUploader, BackendUploader};

/// Version of scenecast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
