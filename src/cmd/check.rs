use anyhow::Result;

use scenecast::config::config_path;
use scenecast::FfmpegTools;

use super::load_config;

pub async fn cmd_check() -> Result<()> {
    let config = load_config(None, None)?;
    let tools = FfmpegTools::with_paths(config.ffmpeg_path.clone(), config.ffprobe_path.clone());

    println!("🔧 scenecast {}", scenecast::VERSION);
    println!("   Config:   {}", config_path().display());
    println!("   Surface:  {}", config.surface_url);
    println!("   Work dir: {}", config.work_root.display());
    match &config.backend_url {
        Some(url) => println!("   Backend:  {url}"),
        None => println!("   Backend:  (none, uploads skipped)"),
    }
    println!("   FPS:      {}", config.fps);

    let mut missing = Vec::new();
    for (name, ok) in tools.check_available().await {
        println!("   {} {name}", if ok { "✅" } else { "❌" });
        if !ok {
            missing.push(name);
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("missing media tools: {}", missing.join(", "));
    }
    Ok(())
}
