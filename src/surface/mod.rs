//! Render surface protocol
//!
//! The surface is an external process that owns the scene graph and the
//! drawing engine. We only drive it: load a scene, serve its media fetches
//! from the staged asset directory, seek every player to a timeline position,
//! and grab the composited frame.
//!
//! [`RenderSurface`] is the seam between the capture loop and the transport.
//! [`remote::RemoteSurface`] speaks JSON-RPC over a WebSocket; tests plug in
//! deterministic doubles.

pub mod intercept;
pub mod remote;
pub mod seek;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::scene::{file_url, SceneDescription, SourceAddressing};

pub use intercept::{AssetInterceptor, FetchRequest, FetchResponse};
pub use remote::{RemoteConnector, RemoteSurface};
pub use seek::{seek_player, PlayerHandle, SeekResolution};

/// Per-call summary of a `seek_to` across every player in the surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeekReport {
    pub players: u32,
    /// Already within tolerance, no wait.
    pub snapped: u32,
    /// Seek completion signalled in time.
    pub seeked: u32,
    /// Gave up waiting after the seek timeout.
    pub timed_out: u32,
}

impl SeekReport {
    pub fn record(&mut self, resolution: SeekResolution) {
        self.players += 1;
        match resolution {
            SeekResolution::Snapped => self.snapped += 1,
            SeekResolution::Seeked => self.seeked += 1,
            SeekResolution::TimedOut => self.timed_out += 1,
        }
    }
}

/// A loaded, seekable, capturable scene.
#[async_trait]
pub trait RenderSurface: Send {
    /// Push the scene and block until the surface reports ready.
    ///
    /// Exceeding the ready timeout is [`crate::ExportError::RenderSurfaceTimeout`].
    async fn load(&mut self, scene: &SceneDescription) -> Result<()>;

    /// Serve a media fetch from local disk. `None` means pass through to the network.
    async fn intercept_fetch(&mut self, request: &FetchRequest) -> Result<Option<FetchResponse>>;

    /// Move every playable element to `time` seconds. Never blocks past the
    /// per-player seek timeout.
    async fn seek_to(&mut self, time: f64) -> Result<SeekReport>;

    /// Redraw and return the composited frame as PNG bytes.
    async fn capture_frame(&mut self) -> Result<Vec<u8>>;

    /// Playback position of the first media player, if the scene has any.
    async fn playback_position(&mut self) -> Result<Option<f64>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens a surface session bound to a job's staged assets.
#[async_trait]
pub trait SurfaceConnector: Send + Sync {
    async fn connect(&self, interceptor: Arc<AssetInterceptor>) -> Result<Box<dyn RenderSurface>>;
}

/// Rewrite element sources into what the surface should fetch.
///
/// `Remote` prefers the original remote reference and falls back to a
/// `file://` URL for purely local media. `Intercepted` uses the
/// interceptor's virtual paths, falling back to `file://` for anything it
/// does not serve.
#[must_use]
pub fn surface_payload(
    scene: &SceneDescription,
    addressing: SourceAddressing,
    interceptor: &AssetInterceptor,
) -> SceneDescription {
    match addressing {
        SourceAddressing::Remote => scene.map_elements(|el| match &el.original_source {
            Some(original) => crate::scene::MediaElement {
                source: Some(original.clone()),
                ..el.clone()
            },
            None => el.clone(),
        })
        .rewrite_for_surface(file_url),
        SourceAddressing::FileUrl => scene.rewrite_for_surface(file_url),
        SourceAddressing::Intercepted => scene.rewrite_for_surface(|path| {
            interceptor
                .virtual_path_for(path)
                .or_else(|| file_url(path))
        }),
    }
}
