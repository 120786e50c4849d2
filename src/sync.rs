//! Seek accuracy monitoring and the fallback decision
//!
//! The capture loop compares the surface's reported playback position with
//! the target time for the first few frames only. The resulting success
//! ratio, together with the scene shape, decides whether the captured frames
//! are replaced by a direct extraction from the source video.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scene::{ElementKind, SceneDescription};

/// Named thresholds for seeking, sampling and fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// A player already this close to the target is not re-seeked.
    pub seek_tolerance_secs: f64,
    /// Upper bound on waiting for a seek-completion signal.
    pub seek_timeout_ms: u64,
    /// A sampled frame counts as in sync when its position error is below this.
    pub accuracy_tolerance_secs: f64,
    /// Number of leading frames whose position is sampled.
    pub sample_frames: u64,
    /// Fallback triggers when the sampled success ratio is below this.
    pub min_success_ratio: f64,
    /// Emit a progress event every N frames.
    pub progress_every: u64,
    /// Allow fallback when the single video has text/image overlays.
    /// Fallback output drops those overlays.
    pub fallback_allows_overlays: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            seek_tolerance_secs: 0.05,
            seek_timeout_ms: 2000,
            accuracy_tolerance_secs: 0.5,
            sample_frames: 5,
            min_success_ratio: 0.5,
            progress_every: 5,
            fallback_allows_overlays: false,
        }
    }
}

impl SyncPolicy {
    #[must_use]
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    /// Whether frame `index` falls in the sampling window.
    #[must_use]
    pub fn samples(&self, index: u64) -> bool {
        index < self.sample_frames
    }
}

/// Aggregated per-frame sync samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekAccuracy {
    pub successes: u32,
    pub failures: u32,
}

impl SeekAccuracy {
    /// Record one sample. Returns whether it counted as a success.
    pub fn record(&mut self, target: f64, reported: f64, tolerance: f64) -> bool {
        let ok = (reported - target).abs() < tolerance;
        if ok {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        ok
    }

    /// Record a sample where the surface could not report a position.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    #[must_use]
    pub fn samples(&self) -> u32 {
        self.successes + self.failures
    }

    /// `successes / (successes + failures)`, or 1.0 with no samples.
    #[must_use]
    pub fn success_ratio(&self) -> f64 {
        match self.samples() {
            0 => 1.0,
            n => f64::from(self.successes) / f64::from(n),
        }
    }
}

/// Outcome of the fallback check.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackDecision {
    /// Sync was good enough; keep the composited capture.
    KeepCaptured,
    /// Sync was poor and the scene is a lone video; extract from it directly.
    ExtractFromSource(PathBuf),
    /// Sync was poor but the scene cannot be reproduced from one source.
    Ineligible(&'static str),
}

/// Decide whether to replace captured frames with a direct extraction.
#[must_use]
pub fn decide_fallback(
    accuracy: &SeekAccuracy,
    scene: &SceneDescription,
    policy: &SyncPolicy,
) -> FallbackDecision {
    if accuracy.success_ratio() >= policy.min_success_ratio {
        return FallbackDecision::KeepCaptured;
    }

    let mut videos = scene.videos();
    let (Some(video), None) = (videos.next(), videos.next()) else {
        return FallbackDecision::Ineligible("scene does not contain exactly one video");
    };

    let overlays = scene
        .elements
        .iter()
        .filter(|e| e.kind != ElementKind::Video)
        .count();
    if overlays > 0 && !policy.fallback_allows_overlays {
        return FallbackDecision::Ineligible("scene has overlays that extraction would drop");
    }

    match video.existing_local_path() {
        Some(path) => FallbackDecision::ExtractFromSource(path),
        None => FallbackDecision::Ineligible("video source is not staged locally"),
    }
}
