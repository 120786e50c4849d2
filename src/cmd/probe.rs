use std::path::Path;

use anyhow::{Context, Result};

use scenecast::{FfmpegTools, MediaTools};

use super::load_config;

pub async fn cmd_probe(file: &Path) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("file not found: {}", file.display());
    }
    let config = load_config(None, None)?;
    let tools = FfmpegTools::with_paths(config.ffmpeg_path, config.ffprobe_path);

    let duration = tools
        .probe_duration(file)
        .await
        .with_context(|| format!("failed to probe {}", file.display()))?;
    println!("{duration:.3}");
    Ok(())
}
