//! Audio track extraction for the final mux

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::MediaTools;
use crate::scene::SceneDescription;

/// Pulls the audio track of the scene's first playable video.
pub struct AudioExtractor<'a> {
    tools: &'a dyn MediaTools,
}

impl<'a> AudioExtractor<'a> {
    #[must_use]
    pub fn new(tools: &'a dyn MediaTools) -> Self {
        Self { tools }
    }

    /// Extract audio into `dest`.
    ///
    /// The element's `muted` flag is ignored: it only affects preview. Any
    /// failure is logged and yields `None` so the export continues silently.
    pub async fn extract(&self, scene: &SceneDescription, dest: &Path) -> Option<PathBuf> {
        let source = scene.videos().find_map(|v| v.existing_local_path())?;

        match self.tools.extract_audio(&source, dest).await {
            Ok(()) if dest.is_file() => {
                info!(source = %source.display(), "extracted audio track");
                Some(dest.to_path_buf())
            }
            Ok(()) => {
                warn!(source = %source.display(), "audio extraction produced no file");
                None
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "continuing without audio");
                let _ = tokio::fs::remove_file(dest).await;
                None
            }
        }
    }
}
