//! JSON-RPC 2.0 render surface over WebSocket
//!
//! The surface host exposes these methods:
//!
//! | method                | params          | result                  |
//! |-----------------------|-----------------|-------------------------|
//! | `surface.load`        | `{scene}`       | any                     |
//! | `surface.ready`       | `{}`            | `bool`                  |
//! | `surface.players`     | `{}`            | `[id]`                  |
//! | `surface.positions`   | `{}`            | `[seconds]`             |
//! | `surface.capture`     | `{format}`      | base64 PNG or data URL  |
//! | `player.currentTime`  | `{id}`          | `seconds`               |
//! | `player.seek`         | `{id, time}`    | any                     |
//! | `player.waitSeeked`   | `{id}`          | any, sent on `seeked`   |
//!
//! The host may call back with `asset.fetch {url, method, range}` while any
//! of our requests is outstanding. Those are answered from the job's
//! [`AssetInterceptor`] with `{status, headers, body_base64}` or
//! `{passthrough: true}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::intercept::{AssetInterceptor, FetchRequest, FetchResponse};
use super::seek::{seek_player, PlayerHandle};
use super::{RenderSurface, SeekReport, SurfaceConnector};
use crate::codec::{base64_decode, base64_encode, strip_data_url};
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::scene::SceneDescription;
use crate::sync::SyncPolicy;

/// Upper bound for a single request/response exchange.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_millis(100);

/// Message received from the surface host.
#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    Response {
        id: u64,
        result: std::result::Result<Value, Value>,
    },
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
    },
    Unknown,
}

fn classify(text: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        return Ok(match value.get("id") {
            Some(id) if !id.is_null() => Inbound::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
            },
            _ => Inbound::Notification {
                method: method.to_string(),
            },
        });
    }

    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        return Ok(Inbound::Unknown);
    };
    let result = match value.get("error") {
        Some(error) => Err(error.clone()),
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    Ok(Inbound::Response { id, result })
}

fn fetch_reply(response: Option<FetchResponse>) -> Value {
    let Some(response) = response else {
        return json!({ "passthrough": true });
    };
    let headers: serde_json::Map<String, Value> = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();
    json!({
        "status": response.status.as_u16(),
        "headers": headers,
        "body_base64": base64_encode(&response.body),
    })
}

fn error_reply(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a call produced no result.
#[derive(Debug)]
enum CallError {
    /// No response arrived before the deadline.
    TimedOut { method: String, timeout: Duration },
    Failed(ExportError),
}

impl From<ExportError> for CallError {
    fn from(e: ExportError) -> Self {
        Self::Failed(e)
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(e.into())
    }
}

impl From<CallError> for ExportError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::TimedOut { method, timeout } => {
                ExportError::Surface(format!("timeout ({timeout:?}) waiting for response to '{method}'"))
            }
            CallError::Failed(e) => e,
        }
    }
}

/// Request/response correlation plus inbound fetch servicing.
struct SurfaceRpc {
    stream: WsStream,
    request_id: u64,
    interceptor: Arc<AssetInterceptor>,
}

impl SurfaceRpc {
    async fn send(&mut self, message: &Value) -> Result<()> {
        self.stream
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| ExportError::Surface(format!("send failed: {e}")))
    }

    async fn call<R: DeserializeOwned>(&mut self, method: &str, params: Value, timeout: Duration) -> Result<R> {
        Ok(self.call_within(method, params, timeout).await?)
    }

    /// Send a request and wait for its response, answering host callbacks meanwhile.
    async fn call_within<R: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> std::result::Result<R, CallError> {
        self.request_id += 1;
        let id = self.request_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await?;

        let deadline = Instant::now() + timeout;
        loop {
            let Ok(next) = tokio::time::timeout_at(deadline, self.stream.next()).await else {
                return Err(CallError::TimedOut {
                    method: method.to_string(),
                    timeout,
                });
            };
            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.stream.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(ExportError::Surface(format!("surface closed the connection: {frame:?}")).into());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ExportError::Surface(format!("receive failed: {e}")).into()),
                None => return Err(ExportError::Surface("surface connection closed".into()).into()),
            };

            match classify(&text)? {
                Inbound::Response { id: got, result } if got == id => {
                    return match result {
                        Ok(value) => Ok(serde_json::from_value(value)?),
                        Err(error) => Err(ExportError::Surface(format!("'{method}' failed: {error}")).into()),
                    };
                }
                // Late answer to a call abandoned by an outer timeout.
                Inbound::Response { id: stale, .. } => debug!(stale, "dropping stale response"),
                Inbound::Request { id, method, params } => self.serve(id, &method, params).await?,
                Inbound::Notification { method } => debug!(method = %method, "surface notification"),
                Inbound::Unknown => debug!("ignoring unrecognised surface message"),
            }
        }
    }

    async fn serve(&mut self, id: Value, method: &str, params: Value) -> Result<()> {
        let reply = match method {
            "asset.fetch" => match serde_json::from_value::<FetchRequest>(params) {
                Ok(request) => match self.interceptor.intercept(&request).await {
                    Ok(response) => json!({ "jsonrpc": "2.0", "id": id, "result": fetch_reply(response) }),
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "intercepted fetch failed");
                        error_reply(id, -32000, e.to_string())
                    }
                },
                Err(e) => error_reply(id, -32602, format!("invalid params: {e}")),
            },
            other => error_reply(id, -32601, format!("method not found: {other}")),
        };
        self.send(&reply).await
    }
}

/// One `<video>`-like player addressed by id.
struct RemotePlayer<'a> {
    rpc: &'a mut SurfaceRpc,
    id: String,
}

#[async_trait]
impl PlayerHandle for RemotePlayer<'_> {
    async fn current_time(&mut self) -> Result<f64> {
        self.rpc
            .call("player.currentTime", json!({ "id": self.id }), CALL_TIMEOUT)
            .await
    }

    async fn begin_seek(&mut self, time: f64) -> Result<()> {
        let _: Value = self
            .rpc
            .call("player.seek", json!({ "id": self.id, "time": time }), CALL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn wait_seeked(&mut self) -> Result<()> {
        let _: Value = self
            .rpc
            .call("player.waitSeeked", json!({ "id": self.id }), CALL_TIMEOUT)
            .await?;
        Ok(())
    }
}

/// Render surface hosted in another process, reached over WebSocket.
pub struct RemoteSurface {
    rpc: SurfaceRpc,
    policy: SyncPolicy,
    ready_timeout: Duration,
}

impl RemoteSurface {
    /// Connect to a surface host at a `ws://` or `wss://` URL.
    pub async fn connect(
        url: &str,
        interceptor: Arc<AssetInterceptor>,
        policy: SyncPolicy,
        ready_timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting render surface at {}", url);
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| ExportError::Surface(format!("cannot reach render surface at {url}: {e}")))?;
        debug!("Surface connected: {:?}", response.status());

        Ok(Self {
            rpc: SurfaceRpc {
                stream,
                request_id: 0,
                interceptor,
            },
            policy,
            ready_timeout,
        })
    }

    async fn player_ids(&mut self) -> Result<Vec<String>> {
        self.rpc.call("surface.players", json!({}), CALL_TIMEOUT).await
    }
}

#[async_trait]
impl RenderSurface for RemoteSurface {
    async fn load(&mut self, scene: &SceneDescription) -> Result<()> {
        let ready_timeout = self.ready_timeout;
        let deadline = Instant::now() + ready_timeout;
        let not_ready = |e: CallError| match e {
            CallError::TimedOut { .. } => ExportError::RenderSurfaceTimeout(ready_timeout),
            CallError::Failed(e) => e,
        };
        let _: Value = self
            .rpc
            .call_within("surface.load", json!({ "scene": scene }), ready_timeout)
            .await
            .map_err(not_ready)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ExportError::RenderSurfaceTimeout(ready_timeout));
            }
            match self
                .rpc
                .call_within::<bool>("surface.ready", json!({}), remaining.min(CALL_TIMEOUT))
                .await
            {
                Ok(true) => {
                    info!(elements = scene.elements.len(), "surface ready");
                    return Ok(());
                }
                Ok(false) => tokio::time::sleep(READY_POLL.min(remaining)).await,
                Err(CallError::TimedOut { .. }) if Instant::now() >= deadline => {
                    return Err(ExportError::RenderSurfaceTimeout(ready_timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn intercept_fetch(&mut self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
        self.rpc.interceptor.intercept(request).await
    }

    async fn seek_to(&mut self, time: f64) -> Result<SeekReport> {
        let mut report = SeekReport::default();
        for id in self.player_ids().await? {
            let mut player = RemotePlayer {
                rpc: &mut self.rpc,
                id,
            };
            report.record(seek_player(&mut player, time, &self.policy).await?);
        }
        Ok(report)
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>> {
        let payload: String = self
            .rpc
            .call("surface.capture", json!({ "format": "png" }), CALL_TIMEOUT)
            .await?;
        base64_decode(strip_data_url(&payload))
    }

    async fn playback_position(&mut self) -> Result<Option<f64>> {
        let positions: Vec<f64> = self
            .rpc
            .call("surface.positions", json!({}), CALL_TIMEOUT)
            .await?;
        Ok(positions.first().copied())
    }

    async fn close(&mut self) -> Result<()> {
        self.rpc
            .stream
            .close(None)
            .await
            .map_err(|e| ExportError::Surface(format!("close failed: {e}")))?;
        info!("Surface connection closed");
        Ok(())
    }
}

/// Opens [`RemoteSurface`] sessions against a configured host.
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    url: String,
    policy: SyncPolicy,
    ready_timeout: Duration,
}

impl RemoteConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, policy: SyncPolicy, ready_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            policy,
            ready_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.surface_url, config.sync.clone(), config.ready_timeout())
    }
}

#[async_trait]
impl SurfaceConnector for RemoteConnector {
    async fn connect(&self, interceptor: Arc<AssetInterceptor>) -> Result<Box<dyn RenderSurface>> {
        let surface =
            RemoteSurface::connect(&self.url, interceptor, self.policy.clone(), self.ready_timeout).await?;
        Ok(Box::new(surface))
    }
}
