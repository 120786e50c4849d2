//! Export duration resolution

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::job::total_frames;
use crate::media::MediaTools;
use crate::scene::SceneDescription;

/// Shortest export ever produced, in seconds.
pub const MIN_EXPORT_DURATION: f64 = 5.0;

/// Inputs and result of duration resolution, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationEstimate {
    pub audio_duration: f64,
    pub max_video_duration: f64,
    /// `max(max_video_duration, audio_duration, MIN_EXPORT_DURATION)`
    pub final_duration: f64,
}

impl DurationEstimate {
    #[must_use]
    pub fn new(max_video_duration: f64, audio_duration: f64) -> Self {
        let sane = |d: f64| if d.is_finite() && d > 0.0 { d } else { 0.0 };
        let max_video_duration = sane(max_video_duration);
        let audio_duration = sane(audio_duration);
        Self {
            audio_duration,
            max_video_duration,
            final_duration: max_video_duration
                .max(audio_duration)
                .max(MIN_EXPORT_DURATION),
        }
    }

    /// Frames rendered for this duration at `fps`.
    #[must_use]
    pub fn total_frames(&self, fps: u32) -> u64 {
        total_frames(self.final_duration, fps)
    }
}

/// Computes the authoritative export duration from staged media.
pub struct DurationResolver<'a> {
    tools: &'a dyn MediaTools,
}

impl<'a> DurationResolver<'a> {
    #[must_use]
    pub fn new(tools: &'a dyn MediaTools) -> Self {
        Self { tools }
    }

    /// Longest local video in the scene. Missing files and probe failures count as 0.
    pub async fn max_video_duration(&self, scene: &SceneDescription) -> f64 {
        let mut max = 0.0_f64;
        for video in scene.videos() {
            let Some(path) = video.existing_local_path() else {
                debug!(id = %video.id, "video not staged locally, skipping probe");
                continue;
            };
            let duration = self.probe_or_zero(&path).await;
            max = max.max(duration);
        }
        max
    }

    /// Resolve against the scene and an optional extracted audio file.
    pub async fn resolve(&self, scene: &SceneDescription, audio: Option<&Path>) -> DurationEstimate {
        let max_video = self.max_video_duration(scene).await;
        let audio_duration = match audio {
            Some(path) => self.probe_or_zero(path).await,
            None => 0.0,
        };
        let estimate = DurationEstimate::new(max_video, audio_duration);
        info!(
            video = estimate.max_video_duration,
            audio = estimate.audio_duration,
            final_duration = estimate.final_duration,
            "resolved export duration"
        );
        estimate
    }

    async fn probe_or_zero(&self, path: &Path) -> f64 {
        match self.tools.probe_duration(path).await {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "duration probe failed, using 0");
                0.0
            }
        }
    }
}
