//! ffmpeg / ffprobe subprocess implementation of [`MediaTools`]

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{EncodeRequest, ExtractRequest, MediaTools};
use crate::error::{ExportError, Result};

/// Lines of encoder stderr kept in an [`ExportError::Encode`].
const DIAGNOSTIC_LINES: usize = 20;

/// ffmpeg-based media tools
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    /// Video codec arguments for the final mux
    video_codec: Vec<String>,
}

impl FfmpegTools {
    /// Use explicit binary paths
    #[must_use]
    pub fn with_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg.into(),
            ffprobe_path: ffprobe.into(),
            video_codec: ["-c:v", "libx264", "-preset", "medium", "-crf", "18"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Check if ffmpeg and ffprobe are available
    pub async fn check_available(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for (name, path) in [("ffmpeg", &self.ffmpeg_path), ("ffprobe", &self.ffprobe_path)] {
            let ok = Command::new(path)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            results.push((name.to_string(), ok));
        }
        results
    }

    fn probe_args(path: &Path) -> Vec<String> {
        vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "json".into(),
            path.to_string_lossy().into_owned(),
        ]
    }

    fn audio_args(video: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            video.to_string_lossy().into_owned(),
            "-vn".into(),
            "-map".into(),
            "0:a:0".into(),
            "-acodec".into(),
            "copy".into(),
            "-y".into(),
            output.to_string_lossy().into_owned(),
        ]
    }

    fn encode_args(&self, request: &EncodeRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(ToString::to_string)
            .collect();

        // Frame sequence input
        args.extend([
            "-framerate".into(),
            request.fps.to_string(),
            "-start_number".into(),
            "0".into(),
            "-i".into(),
            request.frame_pattern.to_string_lossy().into_owned(),
        ]);

        if let Some(audio) = &request.audio {
            args.extend(["-i".into(), audio.to_string_lossy().into_owned()]);
            args.extend(["-map", "0:v:0", "-map", "1:a:0", "-c:a", "aac"].iter().map(ToString::to_string));
        }

        args.extend(self.video_codec.iter().cloned());
        args.extend([
            "-pix_fmt".into(),
            request.pixel_format.clone(),
            "-r".into(),
            request.fps.to_string(),
            "-movflags".into(),
            "+faststart".into(),
            "-y".into(),
            request.output.to_string_lossy().into_owned(),
        ]);

        args
    }

    fn extract_args(request: &ExtractRequest) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            request.source.to_string_lossy().into_owned(),
            "-t".into(),
            format!("{:.3}", request.duration),
            "-vf".into(),
            format!("fps={}", request.fps),
            "-frames:v".into(),
            request.max_frames.to_string(),
            "-start_number".into(),
            "0".into(),
            "-y".into(),
            request.output_pattern.to_string_lossy().into_owned(),
        ]
    }

    /// Parse `format.duration` from ffprobe JSON
    fn parse_duration(stdout: &[u8]) -> Option<f64> {
        let probe: FfprobeOutput = serde_json::from_slice(stdout).ok()?;
        let duration: f64 = probe.format?.duration?.trim().parse().ok()?;
        (duration.is_finite() && duration >= 0.0).then_some(duration)
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<std::process::Output> {
        debug!("ffmpeg args: {:?}", args);
        Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ExportError::MissingDependency(format!(
                    "cannot run {}: {e}",
                    self.ffmpeg_path.display()
                ))
            })
    }
}

/// Keep the tail of stderr, where ffmpeg puts the actual failure.
fn diagnostics(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args(Self::probe_args(path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExportError::DurationProbe {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExportError::DurationProbe {
                path: path.to_path_buf(),
                reason: diagnostics(&output.stderr),
            });
        }

        Self::parse_duration(&output.stdout).ok_or_else(|| ExportError::DurationProbe {
            path: path.to_path_buf(),
            reason: "no duration in ffprobe output".into(),
        })
    }

    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        let result = self.run_ffmpeg(&Self::audio_args(video, output)).await?;
        if !result.status.success() {
            return Err(ExportError::AudioExtract(diagnostics(&result.stderr)));
        }
        Ok(())
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<()> {
        let result = self.run_ffmpeg(&self.encode_args(request)).await?;
        if !result.status.success() {
            let diagnostics = diagnostics(&result.stderr);
            warn!("ffmpeg encode failed: {}", diagnostics);
            return Err(ExportError::Encode {
                status: result.status.to_string(),
                diagnostics,
            });
        }
        info!("Encoded {:?}", request.output);
        Ok(())
    }

    async fn extract_frames(&self, request: &ExtractRequest) -> Result<()> {
        let result = self.run_ffmpeg(&Self::extract_args(request)).await?;
        if !result.status.success() {
            return Err(ExportError::Encode {
                status: result.status.to_string(),
                diagnostics: diagnostics(&result.stderr),
            });
        }
        Ok(())
    }
}

/// `FFprobe` JSON output structure
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}
