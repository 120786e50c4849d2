//! Frame-by-frame capture across the export timeline
//!
//! For each frame index `i` the loop seeks every player to `i / fps`, lets
//! the surface settle, grabs the composited frame and writes it to
//! `frames/frame_<i>.png`. Indices are always contiguous from 0: a frame
//! that fails to capture repeats the previous one rather than leaving a gap.
//!
//! Seek accuracy is sampled only over the first `sample_frames` frames by
//! comparing the surface's reported playback position with the target.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::job::{frame_time, JobLayout};
use crate::progress::{percent, ExportStatus, ProgressReporter};
use crate::surface::RenderSurface;
use crate::sync::{SeekAccuracy, SyncPolicy};

/// One persisted frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub index: u64,
    /// Target timeline position, `index / fps`.
    pub timestamp: f64,
    pub path: PathBuf,
    /// Size of the image on disk.
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub frames: Vec<FrameRecord>,
    pub accuracy: SeekAccuracy,
    /// Frames whose seek call itself failed.
    pub seek_failures: u64,
    /// Player seeks resolved by timeout instead of a completion signal.
    pub seek_timeouts: u64,
    /// Frames that reused the previous image after a capture error.
    pub repeated_frames: u64,
}

pub struct FrameCaptureLoop<'a> {
    fps: u32,
    settle_delay: Duration,
    policy: &'a SyncPolicy,
    reporter: &'a ProgressReporter,
    frames_dir: PathBuf,
}

impl<'a> FrameCaptureLoop<'a> {
    #[must_use]
    pub fn new(
        fps: u32,
        settle_delay: Duration,
        policy: &'a SyncPolicy,
        reporter: &'a ProgressReporter,
        frames_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fps,
            settle_delay,
            policy,
            reporter,
            frames_dir: frames_dir.into(),
        }
    }

    /// Capture frames `0..total` from `surface`.
    pub async fn run(&self, surface: &mut dyn RenderSurface, total: u64) -> Result<CaptureReport> {
        fs::create_dir_all(&self.frames_dir).await?;
        let mut report = CaptureReport {
            frames: Vec::with_capacity(usize::try_from(total).unwrap_or(0)),
            ..Default::default()
        };
        let every = self.policy.progress_every.max(1);

        for index in 0..total {
            let time = frame_time(index, self.fps);
            let sampled = self.policy.samples(index);

            // A seek that only resolved by timeout still counts against accuracy.
            let seek_ok = match surface.seek_to(time).await {
                Ok(seek) if seek.timed_out > 0 => {
                    let timeout = ExportError::SeekTimeout {
                        target: time,
                        timeout: self.policy.seek_timeout(),
                    };
                    debug!(frame = index, players = seek.timed_out, "{timeout}");
                    report.seek_timeouts += u64::from(seek.timed_out);
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    warn!(frame = index, time, error = %e, "seek failed, capturing anyway");
                    report.seek_failures += 1;
                    false
                }
            };

            if !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }

            let path = JobLayout::frame_file(&self.frames_dir, index);
            let bytes = match surface.capture_frame().await {
                Ok(image) => {
                    fs::write(&path, &image).await?;
                    image.len() as u64
                }
                Err(e) => match report.frames.last() {
                    Some(previous) => {
                        warn!(frame = index, error = %e, "capture failed, repeating previous frame");
                        fs::copy(&previous.path, &path).await?;
                        report.repeated_frames += 1;
                        previous.bytes
                    }
                    None => return Err(e),
                },
            };

            if sampled {
                if seek_ok {
                    self.sample(surface, time, &mut report.accuracy).await;
                } else {
                    report.accuracy.record_failure();
                }
            }

            report.frames.push(FrameRecord {
                index,
                timestamp: time,
                path,
                bytes,
            });

            // 100 belongs to `completed` alone.
            if index % every == 0 {
                self.reporter
                    .report(percent(index, total).min(99), ExportStatus::RenderingFrames);
            }
        }

        info!(
            frames = total,
            accuracy = report.accuracy.success_ratio(),
            seek_timeouts = report.seek_timeouts,
            "capture complete"
        );
        Ok(report)
    }

    async fn sample(&self, surface: &mut dyn RenderSurface, target: f64, accuracy: &mut SeekAccuracy) {
        match surface.playback_position().await {
            Ok(Some(position)) => {
                let ok = accuracy.record(target, position, self.policy.accuracy_tolerance_secs);
                debug!(target, position, ok, "seek accuracy sample");
            }
            // No media players in the scene: nothing to drift.
            Ok(None) => {}
            Err(e) => {
                warn!(target, error = %e, "could not read playback position");
                accuracy.record_failure();
            }
        }
    }
}
