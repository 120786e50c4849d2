//! Scene description model
//!
//! A [`SceneDescription`] is an immutable value: every transformation
//! (asset resolution, source rewriting for the surface) returns a new copy
//! and leaves the caller's scene untouched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Kind of a timed scene element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Video,
    Image,
    Text,
}

/// Placement of an element on the canvas, in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Visibility window on the scene timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default)]
    pub start: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

/// Text styling for `text` elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
}

/// One timed visual element of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaElement {
    #[serde(default)]
    pub id: String,
    pub kind: ElementKind,
    /// Remote URL or local path. Text elements usually have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Remote reference this element was staged from, kept for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
    /// Preview mute flag. Export audio ignores it.
    #[serde(default)]
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

impl MediaElement {
    /// Returns `true` if the source is an `http(s)` URL.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.source.as_deref().is_some_and(is_remote_reference)
    }

    /// Local filesystem path of the source, if it is not remote.
    ///
    /// `file://` URLs are unwrapped.
    #[must_use]
    pub fn local_path(&self) -> Option<PathBuf> {
        let source = self.source.as_deref()?;
        if is_remote_reference(source) || source.is_empty() {
            return None;
        }
        if source.starts_with("file://") {
            return url::Url::parse(source).ok()?.to_file_path().ok();
        }
        Some(PathBuf::from(source))
    }

    /// Local source path if the file actually exists on disk.
    #[must_use]
    pub fn existing_local_path(&self) -> Option<PathBuf> {
        self.local_path().filter(|p| p.is_file())
    }

    /// Copy of this element with a new source, remembering the previous one.
    #[must_use]
    pub fn with_resolved_source(&self, local: &Path) -> Self {
        Self {
            original_source: self.original_source.clone().or_else(|| self.source.clone()),
            source: Some(local.to_string_lossy().into_owned()),
            ..self.clone()
        }
    }
}

/// Returns `true` for `http://` and `https://` references.
#[must_use]
pub fn is_remote_reference(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_background() -> String {
    "#000000".to_string()
}

/// Declarative timed scene: canvas plus ordered elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub elements: Vec<MediaElement>,
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            background: default_background(),
            elements: Vec::new(),
        }
    }
}

impl SceneDescription {
    /// Parse and validate a scene from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let scene: Self = serde_json::from_str(json)?;
        scene.validate()?;
        Ok(scene)
    }

    /// Check canvas and element invariants.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidScene(format!(
                "canvas must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        for (i, el) in self.elements.iter().enumerate() {
            if el.geometry.width < 0.0 || el.geometry.height < 0.0 {
                return Err(ExportError::InvalidScene(format!(
                    "element {i} has negative size"
                )));
            }
            if let Some(Timing { start, end: Some(end) }) = el.timing {
                if end < start {
                    return Err(ExportError::InvalidScene(format!(
                        "element {i} ends ({end}s) before it starts ({start}s)"
                    )));
                }
            }
            if matches!(el.kind, ElementKind::Video | ElementKind::Image) && el.source.is_none() {
                return Err(ExportError::InvalidScene(format!(
                    "{:?} element {i} has no source",
                    el.kind
                )));
            }
        }
        Ok(())
    }

    /// Iterate over video elements in scene order.
    pub fn videos(&self) -> impl Iterator<Item = &MediaElement> {
        self.elements.iter().filter(|e| e.kind == ElementKind::Video)
    }

    /// Number of video elements.
    #[must_use]
    pub fn video_count(&self) -> usize {
        self.videos().count()
    }

    /// New scene with every element passed through `f`.
    #[must_use]
    pub fn map_elements<F>(&self, f: F) -> Self
    where
        F: FnMut(&MediaElement) -> MediaElement,
    {
        Self {
            elements: self.elements.iter().map(f).collect(),
            ..self.clone()
        }
    }

    /// New scene with sources rewritten into an address the surface can fetch.
    ///
    /// Elements whose source is still remote are left alone.
    #[must_use]
    pub fn rewrite_for_surface<F>(&self, mut address: F) -> Self
    where
        F: FnMut(&Path) -> Option<String>,
    {
        self.map_elements(|el| match el.local_path() {
            Some(path) => match address(&path) {
                Some(rewritten) => MediaElement {
                    source: Some(rewritten),
                    ..el.clone()
                },
                None => el.clone(),
            },
            None => el.clone(),
        })
    }
}

/// How local sources are addressed in the payload pushed to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAddressing {
    /// Keep the original remote reference when one exists.
    Remote,
    /// `file://` URLs.
    FileUrl,
    /// Virtual paths served by the fetch interceptor.
    #[default]
    Intercepted,
}

/// Build a `file://` URL for a local path.
#[must_use]
pub fn file_url(path: &Path) -> Option<String> {
    url::Url::from_file_path(path).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r##"{
            "width": 1280,
            "height": 720,
            "background": "#101010",
            "elements": [
                {"id": "v1", "kind": "video", "source": "https://cdn.example.com/clip.mp4",
                 "x": 0, "y": 0, "width": 1280, "height": 720, "muted": true},
                {"id": "t1", "kind": "text", "text": "Hello",
                 "x": 40, "y": 600, "width": 400, "height": 80,
                 "timing": {"start": 1.0, "end": 4.0},
                 "style": {"fontFamily": "Inter", "fontSize": 48, "color": "#fff"}}
            ]
        }"##
    }

    #[test]
    fn parse_scene() {
        let scene = SceneDescription::from_json(sample_json()).unwrap();
        assert_eq!(scene.width, 1280);
        assert_eq!(scene.elements.len(), 2);
        assert_eq!(scene.video_count(), 1);
        assert!(scene.elements[0].is_remote());
        assert!(scene.elements[0].muted);
        let style = scene.elements[1].style.as_ref().unwrap();
        assert_eq!(style.font_family.as_deref(), Some("Inter"));
    }

    #[test]
    fn canvas_defaults() {
        let scene = SceneDescription::from_json(r#"{"elements": []}"#).unwrap();
        assert_eq!((scene.width, scene.height), (1920, 1080));
        assert_eq!(scene.background, "#000000");
    }

    #[test]
    fn rejects_inverted_timing() {
        let json = r#"{"elements": [{"kind": "text", "text": "x", "x": 0, "y": 0,
            "width": 1, "height": 1, "timing": {"start": 3, "end": 1}}]}"#;
        assert!(SceneDescription::from_json(json).is_err());
    }

    #[test]
    fn rejects_video_without_source() {
        let json = r#"{"elements": [{"kind": "video", "x": 0, "y": 0, "width": 1, "height": 1}]}"#;
        assert!(SceneDescription::from_json(json).is_err());
    }

    #[test]
    fn resolution_does_not_mutate_original() {
        let scene = SceneDescription::from_json(sample_json()).unwrap();
        let before = scene.clone();
        let staged = scene.map_elements(|el| {
            if el.is_remote() {
                el.with_resolved_source(Path::new("/tmp/job/assets/abc.mp4"))
            } else {
                el.clone()
            }
        });

        assert_eq!(scene, before);
        assert_eq!(staged.elements[0].source.as_deref(), Some("/tmp/job/assets/abc.mp4"));
        assert_eq!(
            staged.elements[0].original_source.as_deref(),
            Some("https://cdn.example.com/clip.mp4")
        );
    }

    #[test]
    fn rewrite_only_touches_local_sources() {
        let scene = SceneDescription::from_json(sample_json()).unwrap();
        let staged = scene.map_elements(|el| {
            if el.is_remote() {
                el.with_resolved_source(Path::new("/tmp/job/assets/abc.mp4"))
            } else {
                el.clone()
            }
        });
        let rewritten = staged.rewrite_for_surface(|p| {
            Some(format!("/__assets/{}", p.file_name()?.to_string_lossy()))
        });
        assert_eq!(rewritten.elements[0].source.as_deref(), Some("/__assets/abc.mp4"));
        assert_eq!(rewritten.elements[1].source, None);

        // Unstaged remote sources pass through
        let untouched = scene.rewrite_for_surface(|_| Some("nope".into()));
        assert_eq!(untouched, scene);
    }

    #[test]
    fn local_path_handles_file_urls() {
        let el = MediaElement {
            id: String::new(),
            kind: ElementKind::Image,
            source: Some("file:///var/media/a.png".into()),
            original_source: None,
            geometry: Geometry::default(),
            timing: None,
            text: None,
            style: None,
            muted: false,
            volume: None,
        };
        assert_eq!(el.local_path(), Some(PathBuf::from("/var/media/a.png")));
    }
}
