//! Export job identity, lifecycle and working-directory layout

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::scene::SceneDescription;

static EXPORT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

/// Lifecycle of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Staging,
    ResolvingDuration,
    Rendering,
    Merging,
    Uploading,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Validate an export id so it can safely name a directory.
pub fn validate_export_id(id: &str) -> Result<()> {
    if EXPORT_ID.is_match(id) {
        Ok(())
    } else {
        Err(ExportError::InvalidExportId(id.to_string()))
    }
}

/// Paths inside `<work_root>/<export_id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    export_id: String,
    root: PathBuf,
}

impl JobLayout {
    #[must_use]
    pub fn new(work_root: &Path, export_id: &str) -> Self {
        Self {
            export_id: export_id.to_string(),
            root: work_root.join(export_id),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    #[must_use]
    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Scratch directory for direct-from-source extraction.
    #[must_use]
    pub fn fallback_dir(&self) -> PathBuf {
        self.root.join("fallback")
    }

    #[must_use]
    pub fn audio_path(&self) -> PathBuf {
        self.root.join("audio.aac")
    }

    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.root.join(format!("{}.mp4", self.export_id))
    }

    /// Path of frame `index` inside `dir`.
    #[must_use]
    pub fn frame_file(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("frame_{index:05}.png"))
    }

    /// ffmpeg image-sequence pattern matching [`JobLayout::frame_file`].
    #[must_use]
    pub fn frame_pattern(dir: &Path) -> PathBuf {
        dir.join("frame_%05d.png")
    }

    /// Create the job root and its asset/frame directories.
    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.assets_dir()).await?;
        tokio::fs::create_dir_all(self.frames_dir()).await?;
        Ok(())
    }
}

/// One export run. Owns its working directory exclusively.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: String,
    pub scene: SceneDescription,
    pub webhook_url: Option<String>,
    pub layout: JobLayout,
    state: JobState,
}

impl ExportJob {
    pub fn new(
        id: &str,
        scene: SceneDescription,
        webhook_url: Option<String>,
        work_root: &Path,
    ) -> Result<Self> {
        validate_export_id(id)?;
        scene.validate()?;
        Ok(Self {
            id: id.to_string(),
            layout: JobLayout::new(work_root, id),
            scene,
            webhook_url,
            state: JobState::Staging,
        })
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn set_state(&mut self, next: JobState) {
        debug!(export_id = %self.id, from = ?self.state, to = ?next, "job state");
        self.state = next;
    }
}

/// Finished jobs kept for status queries before the oldest are evicted.
pub const FINISHED_RETAINED: usize = 256;

#[derive(Debug, Default)]
struct Registry {
    states: HashMap<String, JobState>,
    /// Terminal job ids, oldest first.
    finished: VecDeque<String>,
}

/// Latest known state of jobs submitted in this process.
///
/// Running jobs are always tracked. Only the most recent
/// [`FINISHED_RETAINED`] finished jobs are remembered.
#[derive(Debug, Default)]
pub struct JobRegistry {
    inner: RwLock<Registry>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `export_id` for a new run.
    ///
    /// Fails with [`ExportError::JobInProgress`] while another run with the
    /// same id has not finished, since both would share one working directory.
    pub async fn try_claim(&self, export_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.states.get(export_id).is_some_and(|s| !s.is_terminal()) {
            return Err(ExportError::JobInProgress(export_id.to_string()));
        }
        inner.finished.retain(|id| id != export_id);
        inner.states.insert(export_id.to_string(), JobState::Staging);
        Ok(())
    }

    /// Forget a claim that never turned into a job.
    pub async fn release(&self, export_id: &str) {
        let mut inner = self.inner.write().await;
        inner.states.remove(export_id);
        inner.finished.retain(|id| id != export_id);
    }

    pub async fn set(&self, export_id: &str, state: JobState) {
        let mut inner = self.inner.write().await;
        inner.states.insert(export_id.to_string(), state);
        if !state.is_terminal() {
            return;
        }
        inner.finished.retain(|id| id != export_id);
        inner.finished.push_back(export_id.to_string());
        while inner.finished.len() > FINISHED_RETAINED {
            if let Some(evicted) = inner.finished.pop_front() {
                inner.states.remove(&evicted);
            }
        }
    }

    pub async fn get(&self, export_id: &str) -> Option<JobState> {
        self.inner.read().await.states.get(export_id).copied()
    }

    /// Number of jobs not yet in a terminal state.
    pub async fn active(&self) -> usize {
        self.inner
            .read()
            .await
            .states
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }
}

/// `floor(duration * fps)`.
#[must_use]
pub fn total_frames(duration_secs: f64, fps: u32) -> u64 {
    if duration_secs <= 0.0 || !duration_secs.is_finite() {
        return 0;
    }
    (duration_secs * f64::from(fps)).floor() as u64
}

/// Target timestamp of frame `index`.
#[must_use]
pub fn frame_time(index: u64, fps: u32) -> f64 {
    index as f64 / f64::from(fps)
}
