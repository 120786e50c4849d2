//! Export configuration loaded from `~/.config/scenecast/config.toml`.
//!
//! Precedence, lowest to highest: built-in defaults, the config file,
//! `SCENECAST_*` environment variables, then CLI flags (applied by the
//! binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ExportError, Result};
use crate::scene::SourceAddressing;
use crate::sync::SyncPolicy;

/// Settings shared by every export job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output frame rate.
    pub fps: u32,
    /// Parent of all job working directories.
    pub work_root: PathBuf,
    /// Storage backend base URL (`{backend_url}/export/webhook/store`).
    pub backend_url: Option<String>,
    /// Progress webhook used when a job does not name its own.
    pub webhook_url: Option<String>,
    /// WebSocket endpoint of the rendering surface host.
    pub surface_url: String,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Pixel format passed to the encoder.
    pub pixel_format: String,
    /// Pause between seek and capture to let decode/redraw settle.
    pub settle_delay_ms: u64,
    /// Bounded wait for the surface readiness flag after `load`.
    pub ready_timeout_secs: u64,
    /// Per-asset download timeout.
    pub download_timeout_secs: u64,
    /// How staged sources are addressed in the surface payload.
    pub addressing: SourceAddressing,
    pub sync: SyncPolicy,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            work_root: std::env::temp_dir().join("scenecast"),
            backend_url: None,
            webhook_url: None,
            surface_url: "ws://127.0.0.1:9333/surface".to_string(),
            ffmpeg_path: locate_binary("ffmpeg"),
            ffprobe_path: locate_binary("ffprobe"),
            pixel_format: "yuv420p".to_string(),
            settle_delay_ms: 50,
            ready_timeout_secs: 30,
            download_timeout_secs: 60,
            addressing: SourceAddressing::Intercepted,
            sync: SyncPolicy::default(),
        }
    }
}

impl ExportConfig {
    /// Load from the default config path, then apply environment overrides.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if an environment override is malformed.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file(&config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific TOML file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ExportError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ExportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCENECAST_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SCENECAST_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(url) = lookup("SCENECAST_SURFACE_URL") {
            self.surface_url = url;
        }
        if let Some(root) = lookup("SCENECAST_WORK_ROOT") {
            self.work_root = PathBuf::from(root);
        }
        if let Some(fps) = lookup("SCENECAST_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| ExportError::Config(format!("SCENECAST_FPS is not a number: {fps}")))?;
        }
        self.validate()
    }

    /// Check ranges that would make an export meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 || self.fps > 240 {
            return Err(ExportError::Config(format!(
                "fps must be between 1 and 240, got {}",
                self.fps
            )));
        }
        if !(0.0..=1.0).contains(&self.sync.min_success_ratio) {
            return Err(ExportError::Config(
                "sync.min_success_ratio must be within 0.0..=1.0".into(),
            ));
        }
        if self.sync.progress_every == 0 {
            return Err(ExportError::Config("sync.progress_every must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Return the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scenecast")
        .join("config.toml")
}

/// Resolve a binary from `PATH`, falling back to the bare name.
fn locate_binary(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}
