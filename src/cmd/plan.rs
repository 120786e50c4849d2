use std::path::Path;

use anyhow::Result;

use scenecast::ExportPipeline;

use super::{load_config, read_scene};

pub async fn cmd_plan(scene_path: &Path, fps: Option<u32>, json: bool) -> Result<()> {
    let scene = read_scene(scene_path)?;
    let config = load_config(fps, None)?;
    let pipeline = ExportPipeline::from_config(config)?;

    let export_id = format!("plan-{}", uuid::Uuid::new_v4().simple());
    let plan = pipeline.plan(&export_id, &scene).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("📋 Plan for {}", scene_path.display());
    println!("   Videos:    {}", plan.videos);
    println!("   Audio:     {}", if plan.has_audio { "yes" } else { "no" });
    println!(
        "   Duration:  {:.2}s (video {:.2}s, audio {:.2}s)",
        plan.estimate.final_duration, plan.estimate.max_video_duration, plan.estimate.audio_duration
    );
    println!("   Frames:    {} @ {} fps", plan.total_frames, plan.fps);
    println!("   Staged:    {} asset(s)", plan.staged.len());
    for failure in &plan.staging_failures {
        println!("   ⚠️  {}: {}", failure.url, failure.reason);
    }
    Ok(())
}
