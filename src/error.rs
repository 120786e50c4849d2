//! Export error taxonomy
//!
//! Every failure an export run can hit maps to one variant here. Variants
//! are split into recoverable kinds (the pipeline degrades locally and keeps
//! going) and fatal kinds (the job is reported as `failed` and the error
//! propagates to the caller). See [`ExportError::is_fatal`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Export pipeline errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("asset download failed for {url}: {reason}")]
    AssetDownload { url: String, reason: String },

    #[error("duration probe failed for {}: {reason}", path.display())]
    DurationProbe { path: PathBuf, reason: String },

    #[error("audio extraction failed: {0}")]
    AudioExtract(String),

    #[error("render surface not ready after {0:?}")]
    RenderSurfaceTimeout(Duration),

    #[error("seek to {target:.3}s did not complete within {timeout:?}")]
    SeekTimeout { target: f64, timeout: Duration },

    #[error("encoder exited with {status}: {diagnostics}")]
    Encode { status: String, diagnostics: String },

    #[error("upload rejected with HTTP {status}: {body}")]
    Upload { status: u16, body: String },

    #[error("failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress webhook failed: {0}")]
    Webhook(String),

    #[error("fallback extraction failed: {0}")]
    Fallback(String),

    #[error("export '{0}' is already running")]
    JobInProgress(String),

    #[error("render surface protocol error: {0}")]
    Surface(String),

    #[error("invalid export id '{0}': only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidExportId(String),

    #[error("invalid scene description: {0}")]
    InvalidScene(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ExportError {
    /// Returns `true` if this error must abort the job.
    ///
    /// Per-element and per-frame failures (downloads, probes, audio
    /// extraction, individual seeks) are absorbed where they happen.
    /// Cleanup failures are never escalated since the job outcome is
    /// already decided by the time cleanup runs.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AssetDownload { .. }
                | Self::DurationProbe { .. }
                | Self::AudioExtract(_)
                | Self::SeekTimeout { .. }
                | Self::Webhook(_)
                | Self::Fallback(_)
                | Self::Cleanup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds_are_not_fatal() {
        let errors = [
            ExportError::AssetDownload {
                url: "https://cdn.example.com/a.png".into(),
                reason: "404".into(),
            },
            ExportError::DurationProbe {
                path: PathBuf::from("/tmp/a.mp4"),
                reason: "no format section".into(),
            },
            ExportError::AudioExtract("no audio stream".into()),
            ExportError::Webhook("connection refused".into()),
            ExportError::Fallback("extraction produced no frames".into()),
            ExportError::SeekTimeout {
                target: 1.5,
                timeout: Duration::from_secs(2),
            },
        ];
        for err in &errors {
            assert!(!err.is_fatal(), "{err} should be recoverable");
        }
    }

    #[test]
    fn stage_failures_are_fatal() {
        assert!(ExportError::RenderSurfaceTimeout(Duration::from_secs(30)).is_fatal());
        assert!(ExportError::JobInProgress("job-1".into()).is_fatal());
        assert!(ExportError::Encode {
            status: "exit status: 1".into(),
            diagnostics: "Invalid argument".into(),
        }
        .is_fatal());
        assert!(ExportError::Upload {
            status: 500,
            body: String::new(),
        }
        .is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = ExportError::Upload {
            status: 413,
            body: "payload too large".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("413"));
        assert!(msg.contains("payload too large"));
    }
}
