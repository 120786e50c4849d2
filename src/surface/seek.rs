//! Bounded per-player seeking

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::sync::SyncPolicy;

/// One playable media element inside the surface.
#[async_trait]
pub trait PlayerHandle: Send {
    /// Current playback position in seconds.
    async fn current_time(&mut self) -> Result<f64>;

    /// Request a new position. Completion is signalled separately.
    async fn begin_seek(&mut self, time: f64) -> Result<()>;

    /// Resolve once the player reports its seek finished.
    async fn wait_seeked(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResolution {
    /// Already within tolerance; nothing was awaited.
    Snapped,
    Seeked,
    /// No completion signal before the timeout; resolved anyway.
    TimedOut,
}

/// Move `player` to `target`, waiting at most `policy.seek_timeout()`.
pub async fn seek_player<P>(player: &mut P, target: f64, policy: &SyncPolicy) -> Result<SeekResolution>
where
    P: PlayerHandle + ?Sized,
{
    let current = player.current_time().await?;
    if (current - target).abs() < policy.seek_tolerance_secs {
        return Ok(SeekResolution::Snapped);
    }

    player.begin_seek(target).await?;
    match tokio::time::timeout(policy.seek_timeout(), player.wait_seeked()).await {
        Ok(Ok(())) => {
            debug!(target, from = current, "seeked");
            Ok(SeekResolution::Seeked)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(target, timeout = ?policy.seek_timeout(), "seek completion not signalled, continuing");
            Ok(SeekResolution::TimedOut)
        }
    }
}
