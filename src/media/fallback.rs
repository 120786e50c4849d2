//! Direct-from-source frame extraction
//!
//! Used in place of the surface capture when seek synchronization was poor
//! and the scene is a single video. Frames are decoded into a scratch
//! directory first and only swapped into `frames/` once the full, contiguous
//! sequence `0..total` exists. A failed extraction or swap leaves the
//! captured frames intact.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use super::{ExtractRequest, MediaTools};
use crate::capture::FrameRecord;
use crate::error::{ExportError, Result};
use crate::job::{frame_time, JobLayout};

/// Replaces a captured frame sequence with frames decoded from one video.
pub struct FallbackExtractor<'a> {
    tools: &'a dyn MediaTools,
    fps: u32,
}

impl<'a> FallbackExtractor<'a> {
    #[must_use]
    pub fn new(tools: &'a dyn MediaTools, fps: u32) -> Self {
        Self { tools, fps }
    }

    /// Extract `total` frames of `source` into `frames_dir`, via `scratch_dir`.
    pub async fn run(
        &self,
        source: &Path,
        duration: f64,
        total: u64,
        scratch_dir: &Path,
        frames_dir: &Path,
    ) -> Result<Vec<FrameRecord>> {
        if fs::try_exists(scratch_dir).await.unwrap_or(false) {
            fs::remove_dir_all(scratch_dir).await?;
        }
        fs::create_dir_all(scratch_dir).await?;

        let request = ExtractRequest {
            source: source.to_path_buf(),
            fps: self.fps,
            duration,
            max_frames: total,
            output_pattern: JobLayout::frame_pattern(scratch_dir),
        };
        self.tools.extract_frames(&request).await?;

        let produced = contiguous_prefix(scratch_dir, total).await;
        if produced == 0 && total > 0 {
            return Err(ExportError::Fallback(format!(
                "extraction from {} produced no frames",
                source.display()
            )));
        }
        if produced < total {
            // Rounding at the tail commonly drops a frame or two; hold the last one.
            warn!(produced, total, "padding short extraction with last frame");
            let last = JobLayout::frame_file(scratch_dir, produced - 1);
            for index in produced..total {
                fs::copy(&last, JobLayout::frame_file(scratch_dir, index)).await?;
            }
        }

        swap_dirs(scratch_dir, frames_dir).await?;

        let mut records = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        for index in 0..total {
            let path = JobLayout::frame_file(frames_dir, index);
            let bytes = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            records.push(FrameRecord {
                index,
                timestamp: frame_time(index, self.fps),
                path,
                bytes,
            });
        }

        info!(frames = total, source = %source.display(), "fallback extraction complete");
        Ok(records)
    }
}

/// Move `replacement` into `target`'s place.
///
/// `target` is parked under a backup name until the replacement is in
/// place, and restored if the swap fails.
async fn swap_dirs(replacement: &Path, target: &Path) -> Result<()> {
    let backup = target.with_extension("captured");
    if fs::try_exists(&backup).await.unwrap_or(false) {
        fs::remove_dir_all(&backup).await?;
    }
    fs::rename(target, &backup)
        .await
        .map_err(|e| ExportError::Fallback(format!("cannot park {}: {e}", target.display())))?;

    if let Err(e) = fs::rename(replacement, target).await {
        if let Err(restore) = fs::rename(&backup, target).await {
            warn!(backup = %backup.display(), error = %restore, "could not restore captured frames");
        }
        return Err(ExportError::Fallback(format!(
            "cannot move extracted frames into {}: {e}",
            target.display()
        )));
    }

    if let Err(e) = fs::remove_dir_all(&backup).await {
        warn!(path = %backup.display(), error = %e, "could not remove replaced frames");
    }
    Ok(())
}

/// Count frames `0..n` present without a gap, capped at `limit`.
async fn contiguous_prefix(dir: &Path, limit: u64) -> u64 {
    let mut n = 0;
    while n < limit && is_file(&JobLayout::frame_file(dir, n)).await {
        n += 1;
    }
    n
}

async fn is_file(path: &PathBuf) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
