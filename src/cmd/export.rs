use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use scenecast::{ExportPipeline, ExportRequest, ExportService};

use super::{load_config, read_scene};

pub struct ExportOptions {
    pub export_id: Option<String>,
    pub webhook: Option<String>,
    pub surface: Option<String>,
    pub fps: Option<u32>,
    pub no_upload: bool,
    pub keep_output: Option<PathBuf>,
    pub json: bool,
}

pub async fn cmd_export(scene_path: &Path, options: ExportOptions) -> Result<()> {
    let scene = read_scene(scene_path)?;
    let config = load_config(options.fps, options.surface)?;

    let mut pipeline = ExportPipeline::from_config(config)?;
    if options.no_upload {
        pipeline = pipeline.with_uploader(None);
    }
    let service = ExportService::new(pipeline);

    let export_id = options
        .export_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let mut request = ExportRequest::new(export_id, scene);
    if let Some(url) = options.webhook {
        request = request.with_webhook(url);
    }
    if let Some(path) = options.keep_output {
        request = request.with_keep_output(path);
    }

    let (ack, handle) = service.submit(request).await?;
    eprintln!("🎬 Export {} {}", ack.export_id, ack.status);

    let outcome = handle.await.context("export task panicked")??;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("✅ Export {} completed", outcome.export_id);
    println!(
        "   Duration: {:.2}s, {} frames{}",
        outcome.estimate.final_duration,
        outcome.frame_count,
        if outcome.used_fallback { " (extracted from source)" } else { "" }
    );
    println!(
        "   Seek accuracy: {}/{} samples, {} timeout(s), {} failed seek(s)",
        outcome.accuracy.successes,
        outcome.accuracy.samples(),
        outcome.seek_timeouts,
        outcome.seek_failures
    );
    if outcome.repeated_frames > 0 {
        println!("   ⚠️  {} frame(s) repeated after capture errors", outcome.repeated_frames);
    }
    println!("   Audio: {}", if outcome.audio_muxed { "muxed" } else { "none" });
    println!("   Size: {} bytes", outcome.artifact_bytes);
    if outcome.uploaded {
        println!("   Uploaded to storage backend");
    }
    if let Some(path) = &outcome.output {
        println!("   Saved: {}", path.display());
    }
    for failure in &outcome.staging_failures {
        println!("   ⚠️  asset skipped: {} ({})", failure.url, failure.reason);
    }
    println!("   Took {:.1}s", outcome.elapsed_secs);
    Ok(())
}
