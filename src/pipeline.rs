//! Export orchestration
//!
//! ```text
//! stage assets → extract audio → resolve duration → load surface
//!   → capture frames (sampled seek accuracy) → [fallback extraction]
//!   → merge → upload → cleanup
//! ```
//!
//! Stages run strictly in order. Recoverable failures (downloads, probes,
//! audio, individual seeks, fallback extraction) degrade in place. Fatal
//! failures mark the job `failed`, emit a `failed` progress event carrying
//! the last reported percentage, and propagate. The job directory is
//! removed on every path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::assets::{AssetCacheEntry, AssetFetcher, AssetStager, HttpAssetFetcher, StagingFailure};
use crate::capture::FrameCaptureLoop;
use crate::config::ExportConfig;
use crate::duration::{DurationEstimate, DurationResolver};
use crate::error::{ExportError, Result};
use crate::job::{validate_export_id, ExportJob, JobLayout, JobRegistry, JobState};
use crate::media::{AudioExtractor, EncodeRequest, FallbackExtractor, FfmpegTools, MediaTools};
use crate::progress::{ExportStatus, ProgressReporter, ProgressSink, WebhookSink};
use crate::scene::SceneDescription;
use crate::service::ExportRequest;
use crate::surface::{surface_payload, AssetInterceptor, RemoteConnector, SurfaceConnector};
use crate::sync::{decide_fallback, FallbackDecision, SeekAccuracy};
use crate::upload::{ArtifactUploader, BackendUploader};

/// Lowest progress reported once merging starts.
pub const MERGE_PROGRESS: u8 = 90;
/// Lowest progress reported once the upload starts.
pub const UPLOAD_PROGRESS: u8 = 95;

/// Summary of a completed export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub export_id: String,
    pub state: JobState,
    pub estimate: DurationEstimate,
    pub frame_count: u64,
    pub used_fallback: bool,
    pub audio_muxed: bool,
    pub artifact_bytes: u64,
    pub uploaded: bool,
    pub accuracy: SeekAccuracy,
    pub seek_timeouts: u64,
    /// Frames whose seek call failed outright.
    pub seek_failures: u64,
    /// Frames that reused the previous image after a capture error.
    pub repeated_frames: u64,
    pub staging_failures: Vec<StagingFailure>,
    /// Where the merged file was copied, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
}

/// What an export would do, without rendering anything.
#[derive(Debug, Clone, Serialize)]
pub struct ExportPlan {
    pub export_id: String,
    pub fps: u32,
    pub estimate: DurationEstimate,
    pub total_frames: u64,
    pub has_audio: bool,
    pub videos: usize,
    pub staged: Vec<AssetCacheEntry>,
    pub staging_failures: Vec<StagingFailure>,
}

/// Wires collaborators together and runs jobs.
pub struct ExportPipeline {
    config: ExportConfig,
    fetcher: Arc<dyn AssetFetcher>,
    tools: Arc<dyn MediaTools>,
    connector: Arc<dyn SurfaceConnector>,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    sink: Option<Arc<dyn ProgressSink>>,
    registry: Arc<JobRegistry>,
}

impl ExportPipeline {
    #[must_use]
    pub fn new(
        config: ExportConfig,
        fetcher: Arc<dyn AssetFetcher>,
        tools: Arc<dyn MediaTools>,
        connector: Arc<dyn SurfaceConnector>,
    ) -> Self {
        Self {
            config,
            fetcher,
            tools,
            connector,
            uploader: None,
            sink: None,
            registry: Arc::new(JobRegistry::new()),
        }
    }

    /// Production wiring: HTTP downloads, ffmpeg, remote surface, and a
    /// backend uploader when `backend_url` is set.
    pub fn from_config(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpAssetFetcher::new(config.download_timeout())?);
        let tools = Arc::new(FfmpegTools::with_paths(config.ffmpeg_path.clone(), config.ffprobe_path.clone()));
        let connector = Arc::new(RemoteConnector::from_config(&config));
        let uploader: Option<Arc<dyn ArtifactUploader>> = match &config.backend_url {
            Some(base) => Some(Arc::new(BackendUploader::new(base)?)),
            None => None,
        };
        Ok(Self::new(config, fetcher, tools, connector).with_uploader(uploader))
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: Option<Arc<dyn ArtifactUploader>>) -> Self {
        self.uploader = uploader;
        self
    }

    /// Send progress here instead of the job's webhook URL.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Run one export to completion. The job directory never outlives this call.
    ///
    /// Fails with [`ExportError::JobInProgress`] if a run with the same id
    /// is still going.
    pub async fn run(&self, request: ExportRequest) -> Result<ExportOutcome> {
        validate_export_id(&request.export_id)?;
        self.registry.try_claim(&request.export_id).await?;
        self.run_claimed(request).await
    }

    /// [`ExportPipeline::run`] for an id already claimed in the registry.
    #[instrument(skip_all, fields(export_id = %request.export_id))]
    pub(crate) async fn run_claimed(&self, request: ExportRequest) -> Result<ExportOutcome> {
        let started = Instant::now();
        let mut job = match ExportJob::new(
            &request.export_id,
            request.scene.clone(),
            request.webhook_url.clone(),
            &self.config.work_root,
        ) {
            Ok(job) => job,
            Err(e) => {
                self.registry.set(&request.export_id, JobState::Failed).await;
                return Err(e);
            }
        };
        let reporter = ProgressReporter::new(job.id.clone(), self.progress_sink(&job));
        self.registry.set(&job.id, job.state()).await;

        let result = self.execute(&mut job, &request, &reporter).await;

        let outcome = match result {
            Ok(outcome) => {
                self.transition(&mut job, JobState::Completed).await;
                reporter.report(100, ExportStatus::Completed);
                Ok(ExportOutcome {
                    state: JobState::Completed,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    finished_at: Utc::now(),
                    ..outcome
                })
            }
            Err(e) => {
                warn!(error = %e, progress = reporter.last_progress(), "export failed");
                self.transition(&mut job, JobState::Failed).await;
                reporter.fail();
                Err(e)
            }
        };

        reporter.flush().await;
        cleanup_job_dir(job.layout.root()).await;
        if let Ok(outcome) = &outcome {
            info!(
                frames = outcome.frame_count,
                duration = outcome.estimate.final_duration,
                fallback = outcome.used_fallback,
                elapsed = outcome.elapsed_secs,
                "export completed"
            );
        }
        outcome
    }

    async fn execute(
        &self,
        job: &mut ExportJob,
        request: &ExportRequest,
        reporter: &ProgressReporter,
    ) -> Result<ExportOutcome> {
        let layout = job.layout.clone();
        let fps = self.config.fps;
        let tools = self.tools.as_ref();
        layout.create().await?;

        // Staging
        let staged = AssetStager::new(Arc::clone(&self.fetcher), layout.assets_dir())
            .stage_scene(&job.scene)
            .await;

        // Duration
        self.transition(job, JobState::ResolvingDuration).await;
        let audio = AudioExtractor::new(tools)
            .extract(&staged.scene, &layout.audio_path())
            .await;
        let estimate = DurationResolver::new(tools)
            .resolve(&staged.scene, audio.as_deref())
            .await;
        let total = estimate.total_frames(fps);

        // Rendering
        self.transition(job, JobState::Rendering).await;
        let interceptor = Arc::new(AssetInterceptor::from_scene(&staged.scene));
        let payload = surface_payload(&staged.scene, self.config.addressing, &interceptor);
        debug!(routes = interceptor.len(), "surface asset routes");

        let mut surface = self.connector.connect(interceptor).await?;
        let captured = match surface.load(&payload).await {
            Ok(()) => {
                FrameCaptureLoop::new(
                    fps,
                    self.config.settle_delay(),
                    &self.config.sync,
                    reporter,
                    layout.frames_dir(),
                )
                .run(surface.as_mut(), total)
                .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = surface.close().await {
            warn!(error = %e, "closing surface failed");
        }
        let capture = captured?;

        let mut frame_count = capture.frames.len() as u64;
        let mut used_fallback = false;
        match decide_fallback(&capture.accuracy, &staged.scene, &self.config.sync) {
            FallbackDecision::KeepCaptured => {}
            FallbackDecision::Ineligible(reason) => {
                warn!(ratio = capture.accuracy.success_ratio(), reason, "low seek accuracy, keeping captured frames");
            }
            FallbackDecision::ExtractFromSource(source) => {
                info!(ratio = capture.accuracy.success_ratio(), source = %source.display(), "low seek accuracy, extracting frames from source");
                match FallbackExtractor::new(tools, fps)
                    .run(&source, estimate.final_duration, total, &layout.fallback_dir(), &layout.frames_dir())
                    .await
                {
                    Ok(frames) => {
                        frame_count = frames.len() as u64;
                        used_fallback = true;
                    }
                    Err(e) => warn!(error = %e, "fallback extraction failed, keeping captured frames"),
                }
            }
        }

        // Merge
        self.transition(job, JobState::Merging).await;
        reporter.report(MERGE_PROGRESS, ExportStatus::MergingVideo);
        let output = layout.output_path();
        tools
            .encode(&EncodeRequest {
                frame_pattern: JobLayout::frame_pattern(&layout.frames_dir()),
                fps,
                audio: audio.clone(),
                pixel_format: self.config.pixel_format.clone(),
                output: output.clone(),
            })
            .await?;
        let artifact_bytes = fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);

        let kept = match &request.keep_output {
            Some(dest) => {
                if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                fs::copy(&output, dest).await?;
                info!(path = %dest.display(), "kept merged output");
                Some(dest.clone())
            }
            None => None,
        };

        // Upload
        let uploaded = match &self.uploader {
            Some(uploader) => {
                self.transition(job, JobState::Uploading).await;
                reporter.report(UPLOAD_PROGRESS, ExportStatus::Uploading);
                uploader.upload(&job.id, &output).await?;
                true
            }
            None => {
                info!("no storage backend configured, skipping upload");
                false
            }
        };

        Ok(ExportOutcome {
            export_id: job.id.clone(),
            state: job.state(),
            estimate,
            frame_count,
            used_fallback,
            audio_muxed: audio.is_some(),
            artifact_bytes,
            uploaded,
            accuracy: capture.accuracy,
            seek_timeouts: capture.seek_timeouts,
            seek_failures: capture.seek_failures,
            repeated_frames: capture.repeated_frames,
            staging_failures: staged.failures,
            output: kept,
            elapsed_secs: 0.0,
            finished_at: Utc::now(),
        })
    }

    /// Stage and resolve duration only. Leaves nothing behind on disk.
    ///
    /// Holds `export_id` for its duration so it cannot share a directory
    /// with a running export.
    pub async fn plan(&self, export_id: &str, scene: &SceneDescription) -> Result<ExportPlan> {
        validate_export_id(export_id)?;
        self.registry.try_claim(export_id).await?;
        let result = match ExportJob::new(export_id, scene.clone(), None, &self.config.work_root) {
            Ok(job) => {
                let plan = self.plan_job(&job).await;
                cleanup_job_dir(job.layout.root()).await;
                plan
            }
            Err(e) => Err(e),
        };
        self.registry.release(export_id).await;
        result
    }

    async fn plan_job(&self, job: &ExportJob) -> Result<ExportPlan> {
        let tools = self.tools.as_ref();
        job.layout.create().await?;
        let staged = AssetStager::new(Arc::clone(&self.fetcher), job.layout.assets_dir())
            .stage_scene(&job.scene)
            .await;
        let audio = AudioExtractor::new(tools)
            .extract(&staged.scene, &job.layout.audio_path())
            .await;
        let estimate = DurationResolver::new(tools)
            .resolve(&staged.scene, audio.as_deref())
            .await;

        Ok(ExportPlan {
            export_id: job.id.clone(),
            fps: self.config.fps,
            total_frames: estimate.total_frames(self.config.fps),
            estimate,
            has_audio: audio.is_some(),
            videos: staged.scene.video_count(),
            staged: staged.entries,
            staging_failures: staged.failures,
        })
    }

    fn progress_sink(&self, job: &ExportJob) -> Option<Arc<dyn ProgressSink>> {
        if let Some(sink) = &self.sink {
            return Some(Arc::clone(sink));
        }
        let url = job.webhook_url.as_ref().or(self.config.webhook_url.as_ref())?;
        match WebhookSink::new(url.clone()) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                warn!(url = %url, error = %e, "progress webhook disabled");
                None
            }
        }
    }

    async fn transition(&self, job: &mut ExportJob, state: JobState) {
        job.set_state(state);
        self.registry.set(&job.id, state).await;
    }
}

/// Remove a job directory. Failures are logged, never returned.
pub async fn cleanup_job_dir(root: &Path) {
    match fs::remove_dir_all(root).await {
        Ok(()) => debug!(path = %root.display(), "removed job directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            let err = ExportError::Cleanup {
                path: root.to_path_buf(),
                source,
            };
            warn!("{err}");
        }
    }
}
