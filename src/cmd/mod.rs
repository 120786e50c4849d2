pub mod check;
pub mod export;
pub mod plan;
pub mod probe;

use std::path::Path;

use anyhow::{Context, Result};

use scenecast::{ExportConfig, SceneDescription};

/// Load config and apply command-line overrides on top of file and env.
pub fn load_config(fps: Option<u32>, surface: Option<String>) -> Result<ExportConfig> {
    let mut config = ExportConfig::load().context("failed to load config")?;
    if let Some(fps) = fps {
        config.fps = fps;
    }
    if let Some(url) = surface {
        config.surface_url = url;
    }
    config.validate()?;
    Ok(config)
}

pub fn read_scene(path: &Path) -> Result<SceneDescription> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene {}", path.display()))?;
    let scene = SceneDescription::from_json(&json)
        .with_context(|| format!("invalid scene {}", path.display()))?;
    Ok(scene)
}
