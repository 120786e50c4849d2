//! End-to-end pipeline runs against in-process doubles for the surface,
//! media tools, downloads, progress sink and uploader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use scenecast::media::{EncodeRequest, ExtractRequest};
use scenecast::{
    ArtifactUploader, AssetFetcher, AssetInterceptor, ExportConfig, ExportError, ExportPipeline, ExportRequest,
    ExportService, ExportStatus, FetchRequest, FetchResponse, JobLayout, JobState, MediaTools, ProgressEvent,
    ProgressSink, RenderSurface, Result, SceneDescription, SeekReport, SurfaceConnector,
};

// ─── doubles ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeTools {
    /// Probe results keyed by file name.
    durations: HashMap<String, f64>,
    /// Duration of the extracted audio track, or no audio stream at all.
    audio: Option<f64>,
    fail_encode: bool,
    extract_calls: AtomicUsize,
    encoded: Mutex<Option<EncodeRequest>>,
}

impl FakeTools {
    fn with_video(mut self, name: &str, secs: f64) -> Self {
        self.durations.insert(name.to_string(), secs);
        self
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name == "audio.aac" {
            if let Some(secs) = self.audio {
                return Ok(secs);
            }
        }
        self.durations.get(&name).copied().ok_or_else(|| ExportError::DurationProbe {
            path: path.to_path_buf(),
            reason: "unknown file".into(),
        })
    }

    async fn extract_audio(&self, _video: &Path, output: &Path) -> Result<()> {
        if self.audio.is_none() {
            return Err(ExportError::AudioExtract("no audio stream".into()));
        }
        tokio::fs::write(output, b"aac").await?;
        Ok(())
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<()> {
        *self.encoded.lock().unwrap() = Some(request.clone());
        if self.fail_encode {
            return Err(ExportError::Encode {
                status: "exit status: 1".into(),
                diagnostics: "Invalid data found when processing input".into(),
            });
        }
        tokio::fs::write(&request.output, b"mp4 bytes").await?;
        Ok(())
    }

    async fn extract_frames(&self, request: &ExtractRequest) -> Result<()> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let dir = request.output_pattern.parent().unwrap();
        for i in 0..request.max_frames {
            tokio::fs::write(JobLayout::frame_file(dir, i), format!("source {i}")).await?;
        }
        Ok(())
    }
}

/// Surface whose players land `drift` seconds past every seek target.
struct FakeSurface {
    drift: f64,
    has_video: bool,
    position: f64,
    frames: u64,
    closed: Arc<AtomicUsize>,
    never_ready: bool,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn load(&mut self, scene: &SceneDescription) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.never_ready {
            return Err(ExportError::RenderSurfaceTimeout(Duration::from_secs(30)));
        }
        self.has_video = scene.video_count() > 0;
        Ok(())
    }

    async fn intercept_fetch(&mut self, _request: &FetchRequest) -> Result<Option<FetchResponse>> {
        Ok(None)
    }

    async fn seek_to(&mut self, time: f64) -> Result<SeekReport> {
        self.position = time + self.drift;
        Ok(SeekReport::default())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>> {
        self.frames += 1;
        Ok(format!("png {}", self.frames).into_bytes())
    }

    async fn playback_position(&mut self) -> Result<Option<f64>> {
        Ok(self.has_video.then_some(self.position))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    drift: f64,
    closed: Arc<AtomicUsize>,
    /// Surfaces never report ready.
    never_ready: bool,
    /// Connecting fails as if nothing listens at the surface URL.
    unreachable: bool,
    /// Loading waits until this is notified.
    gate: Option<Arc<Notify>>,
}

impl FakeConnector {
    fn new(drift: f64) -> Self {
        Self {
            drift,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SurfaceConnector for FakeConnector {
    async fn connect(&self, _interceptor: Arc<AssetInterceptor>) -> Result<Box<dyn RenderSurface>> {
        if self.unreachable {
            return Err(ExportError::Surface(
                "cannot reach render surface at ws://127.0.0.1:1: connection refused".into(),
            ));
        }
        Ok(Box::new(FakeSurface {
            drift: self.drift,
            has_video: false,
            position: 0.0,
            frames: 0,
            closed: Arc::clone(&self.closed),
            never_ready: self.never_ready,
            gate: self.gate.clone(),
        }))
    }
}

/// Every remote download fails.
struct OfflineFetcher;

#[async_trait]
impl AssetFetcher for OfflineFetcher {
    async fn fetch_to_file(&self, url: &str, _dest: &Path) -> Result<u64> {
        Err(ExportError::AssetDownload {
            url: url.to_string(),
            reason: "connection refused".into(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    fn last_of(&self, status: ExportStatus) -> Option<ProgressEvent> {
        self.events().into_iter().filter(|e| e.status == status).last()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn deliver(&self, event: &ProgressEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingUploader {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    reject: bool,
}

#[async_trait]
impl ArtifactUploader for RecordingUploader {
    async fn upload(&self, export_id: &str, artifact: &Path) -> Result<()> {
        if self.reject {
            return Err(ExportError::Upload {
                status: 500,
                body: "storage full".into(),
            });
        }
        let bytes = tokio::fs::read(artifact).await?;
        self.uploads.lock().unwrap().push((export_id.to_string(), bytes));
        Ok(())
    }
}

// ─── harness ────────────────────────────────────────────────────────────────

struct Harness {
    work: tempfile::TempDir,
    media: tempfile::TempDir,
    tools: Arc<FakeTools>,
    connector: Arc<FakeConnector>,
    sink: Arc<RecordingSink>,
    uploader: Arc<RecordingUploader>,
}

impl Harness {
    fn new(tools: FakeTools, drift: f64) -> Self {
        Self {
            work: tempfile::tempdir().unwrap(),
            media: tempfile::tempdir().unwrap(),
            tools: Arc::new(tools),
            connector: Arc::new(FakeConnector::new(drift)),
            sink: Arc::new(RecordingSink::default()),
            uploader: Arc::new(RecordingUploader::default()),
        }
    }

    fn with_connector(mut self, connector: FakeConnector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    fn rejecting_uploads(mut self) -> Self {
        self.uploader = Arc::new(RecordingUploader {
            reject: true,
            ..Default::default()
        });
        self
    }

    /// Create a local media file and return its path as a scene source.
    fn media_file(&self, name: &str) -> String {
        let path = self.media.path().join(name);
        std::fs::write(&path, b"media").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn pipeline(&self) -> ExportPipeline {
        let config = ExportConfig {
            fps: 24,
            work_root: self.work.path().to_path_buf(),
            settle_delay_ms: 0,
            ..Default::default()
        };
        ExportPipeline::new(config, Arc::new(OfflineFetcher), self.tools.clone(), self.connector.clone())
            .with_uploader(Some(self.uploader.clone() as Arc<dyn ArtifactUploader>))
            .with_progress_sink(self.sink.clone())
    }

    fn job_dir(&self, export_id: &str) -> PathBuf {
        self.work.path().join(export_id)
    }
}

fn video(source: &str) -> serde_json::Value {
    json!({"kind": "video", "source": source, "x": 0, "y": 0, "width": 1920, "height": 1080})
}

fn scene(elements: Vec<serde_json::Value>) -> SceneDescription {
    serde_json::from_value(json!({"width": 1920, "height": 1080, "elements": elements})).unwrap()
}

// ─── scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn eight_second_video_renders_every_frame() {
    let h = Harness::new(FakeTools::default().with_video("clip.mp4", 8.0), 0.0);
    let clip = h.media_file("clip.mp4");

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-8s", scene(vec![video(&clip)])))
        .await
        .unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert!((outcome.estimate.final_duration - 8.0).abs() < 1e-9);
    assert_eq!(outcome.frame_count, 192);
    assert!(!outcome.used_fallback);
    assert!(!outcome.audio_muxed);
    assert!(outcome.uploaded);
    assert_eq!(outcome.artifact_bytes, 9);
    assert_eq!(outcome.seek_failures, 0);
    assert_eq!(outcome.repeated_frames, 0);
    assert_eq!(h.connector.closed.load(Ordering::SeqCst), 1);

    let uploads = h.uploader.uploads.lock().unwrap().clone();
    assert_eq!(uploads, vec![("job-8s".to_string(), b"mp4 bytes".to_vec())]);

    let completed = h.sink.last_of(ExportStatus::Completed).unwrap();
    assert_eq!(completed.progress, 100);
    assert_eq!(completed.export_id, "job-8s");
    let merging = h.sink.last_of(ExportStatus::MergingVideo).unwrap().progress;
    let uploading = h.sink.last_of(ExportStatus::Uploading).unwrap().progress;
    assert!((90..100).contains(&merging));
    assert!((merging..100).contains(&uploading));
    let progress: Vec<u8> = h.sink.events().iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(h.sink.last_of(ExportStatus::Failed).is_none());
    assert!(!h.job_dir("job-8s").exists());
}

#[tokio::test]
async fn audio_longer_than_video_sets_duration() {
    let tools = FakeTools {
        audio: Some(10.0),
        ..FakeTools::default()
    }
    .with_video("short.mp4", 3.0);
    let h = Harness::new(tools, 0.0);
    let clip = h.media_file("short.mp4");

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-audio", scene(vec![video(&clip)])))
        .await
        .unwrap();

    assert!((outcome.estimate.audio_duration - 10.0).abs() < 1e-9);
    assert!((outcome.estimate.max_video_duration - 3.0).abs() < 1e-9);
    assert!((outcome.estimate.final_duration - 10.0).abs() < 1e-9);
    assert_eq!(outcome.frame_count, 240);
    assert!(outcome.audio_muxed);

    let encoded = h.tools.encoded.lock().unwrap().clone().unwrap();
    assert!(encoded.audio.is_some());
}

#[tokio::test]
async fn scene_without_media_uses_minimum_duration() {
    let h = Harness::new(FakeTools::default(), 0.0);
    let text = json!({"kind": "text", "text": "Hello", "x": 10, "y": 10, "width": 400, "height": 80});

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-text", scene(vec![text])))
        .await
        .unwrap();

    assert!((outcome.estimate.final_duration - 5.0).abs() < 1e-9);
    assert_eq!(outcome.frame_count, 120);
    assert_eq!(outcome.accuracy.samples(), 0);
}

#[tokio::test]
async fn unreachable_image_does_not_fail_export() {
    let h = Harness::new(FakeTools::default(), 0.0);
    let image = json!({
        "kind": "image", "source": "https://cdn.invalid/logo.png",
        "x": 0, "y": 0, "width": 200, "height": 200
    });

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-img", scene(vec![image])))
        .await
        .unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.staging_failures.len(), 1);
    assert_eq!(outcome.staging_failures[0].url, "https://cdn.invalid/logo.png");
}

#[tokio::test]
async fn encoder_failure_fails_job_and_cleans_up() {
    let tools = FakeTools {
        fail_encode: true,
        ..FakeTools::default()
    };
    let h = Harness::new(tools, 0.0);
    let pipeline = h.pipeline();

    let err = pipeline
        .run(ExportRequest::new("job-enc", scene(vec![])))
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Encode { .. }));
    assert!(err.is_fatal());
    assert_eq!(pipeline.registry().get("job-enc").await, Some(JobState::Failed));
    assert!(!h.job_dir("job-enc").exists());

    let failed = h.sink.last_of(ExportStatus::Failed).unwrap();
    let highest = h
        .sink
        .events()
        .iter()
        .filter(|e| e.status != ExportStatus::Failed)
        .map(|e| e.progress)
        .max()
        .unwrap();
    assert_eq!(failed.progress, highest);
    assert!(failed.progress < 100);
    assert!(h.sink.last_of(ExportStatus::Completed).is_none());
    assert!(h.uploader.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn surface_that_never_loads_fails_job() {
    let connector = FakeConnector {
        never_ready: true,
        ..Default::default()
    };
    let h = Harness::new(FakeTools::default(), 0.0).with_connector(connector);
    let pipeline = h.pipeline();

    let err = pipeline
        .run(ExportRequest::new("job-stall", scene(vec![])))
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::RenderSurfaceTimeout(_)));
    assert_eq!(pipeline.registry().get("job-stall").await, Some(JobState::Failed));
    assert!(h.sink.last_of(ExportStatus::Failed).is_some());
    assert!(h.sink.last_of(ExportStatus::Completed).is_none());
    assert_eq!(h.connector.closed.load(Ordering::SeqCst), 1);
    assert!(!h.job_dir("job-stall").exists());
}

#[tokio::test]
async fn unreachable_surface_fails_job() {
    let connector = FakeConnector {
        unreachable: true,
        ..Default::default()
    };
    let h = Harness::new(FakeTools::default(), 0.0).with_connector(connector);
    let pipeline = h.pipeline();

    let err = pipeline
        .run(ExportRequest::new("job-offline", scene(vec![])))
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Surface(_)));
    assert!(err.is_fatal());
    assert_eq!(pipeline.registry().get("job-offline").await, Some(JobState::Failed));
    assert!(h.sink.last_of(ExportStatus::Failed).is_some());
    assert_eq!(h.connector.closed.load(Ordering::SeqCst), 0);
    assert!(!h.job_dir("job-offline").exists());
}

#[tokio::test]
async fn drifting_single_video_falls_back_to_source_frames() {
    let h = Harness::new(FakeTools::default().with_video("drift.mp4", 6.0), 2.0);
    let clip = h.media_file("drift.mp4");

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-drift", scene(vec![video(&clip)])))
        .await
        .unwrap();

    assert!(outcome.used_fallback);
    assert_eq!(outcome.accuracy.successes, 0);
    assert_eq!(outcome.frame_count, 144);
    assert_eq!(h.tools.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn drifting_multi_video_scene_keeps_captured_frames() {
    let tools = FakeTools::default()
        .with_video("a.mp4", 6.0)
        .with_video("b.mp4", 6.0);
    let h = Harness::new(tools, 2.0);
    let a = h.media_file("a.mp4");
    let b = h.media_file("b.mp4");

    let outcome = h
        .pipeline()
        .run(ExportRequest::new("job-multi", scene(vec![video(&a), video(&b)])))
        .await
        .unwrap();

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.frame_count, 144);
    assert_eq!(h.tools.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_upload_fails_job() {
    let h = Harness::new(FakeTools::default(), 0.0).rejecting_uploads();
    let pipeline = h.pipeline();

    let err = pipeline
        .run(ExportRequest::new("job-up", scene(vec![])))
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Upload { status: 500, .. }));
    assert_eq!(pipeline.registry().get("job-up").await, Some(JobState::Failed));
    assert!(h.sink.last_of(ExportStatus::Uploading).is_some());
    assert!(h.sink.last_of(ExportStatus::Failed).is_some());
    assert!(!h.job_dir("job-up").exists());
}

#[tokio::test]
async fn kept_output_survives_cleanup() {
    let h = Harness::new(FakeTools::default(), 0.0);
    let dest = h.media.path().join("out/final.mp4");

    let outcome = h
        .pipeline()
        .with_uploader(None)
        .run(ExportRequest::new("job-keep", scene(vec![])).with_keep_output(&dest))
        .await
        .unwrap();

    assert!(!outcome.uploaded);
    assert_eq!(outcome.output.as_deref(), Some(dest.as_path()));
    assert_eq!(std::fs::read(&dest).unwrap(), b"mp4 bytes");
    assert!(!h.job_dir("job-keep").exists());
}

#[tokio::test]
async fn plan_resolves_without_rendering() {
    let h = Harness::new(FakeTools::default().with_video("clip.mp4", 8.0), 0.0);
    let clip = h.media_file("clip.mp4");

    let plan = h.pipeline().plan("plan-1", &scene(vec![video(&clip)])).await.unwrap();

    assert_eq!(plan.total_frames, 192);
    assert_eq!(plan.videos, 1);
    assert!(!plan.has_audio);
    assert_eq!(h.connector.closed.load(Ordering::SeqCst), 0);
    assert!(!h.job_dir("plan-1").exists());
}

#[tokio::test]
async fn service_acknowledges_then_completes() {
    let h = Harness::new(FakeTools::default(), 0.0);
    let service = ExportService::new(h.pipeline());

    let (ack, handle) = service
        .submit(ExportRequest::new("job-svc", scene(vec![])))
        .await
        .unwrap();
    assert_eq!(ack.status, "started");
    assert_eq!(ack.export_id, "job-svc");

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(service.status("job-svc").await, Some(JobState::Completed));
}

#[tokio::test]
async fn service_rejects_bad_export_id() {
    let h = Harness::new(FakeTools::default(), 0.0);
    let service = ExportService::new(h.pipeline());

    let err = service
        .submit(ExportRequest::new("../escape", scene(vec![])))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::InvalidExportId(_)));
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn service_rejects_id_already_running() {
    let gate = Arc::new(Notify::new());
    let connector = FakeConnector {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let h = Harness::new(FakeTools::default(), 0.0).with_connector(connector);
    let service = ExportService::new(h.pipeline());

    let (_, first) = service
        .submit(ExportRequest::new("same", scene(vec![])))
        .await
        .unwrap();
    let err = service
        .submit(ExportRequest::new("same", scene(vec![])))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::JobInProgress(ref id) if id == "same"));

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Completed);
    assert!(!h.job_dir("same").exists());

    // A finished id can be reused.
    gate.notify_one();
    let (_, again) = service
        .submit(ExportRequest::new("same", scene(vec![])))
        .await
        .unwrap();
    assert_eq!(again.await.unwrap().unwrap().state, JobState::Completed);
}
