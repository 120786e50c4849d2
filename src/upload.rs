//! Artifact upload to the storage backend

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::error::{ExportError, Result};

/// Route on the backend that stores finished exports.
pub const STORE_PATH: &str = "/export/webhook/store";

/// Pushes a merged artifact somewhere durable.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, export_id: &str, artifact: &Path) -> Result<()>;
}

/// Multipart `POST {base}/export/webhook/store` with `export_id` and `video`.
pub struct BackendUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl BackendUploader {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: store_endpoint(base_url),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn store_endpoint(base_url: &str) -> String {
    format!("{}{STORE_PATH}", base_url.trim_end_matches('/'))
}

#[async_trait]
impl ArtifactUploader for BackendUploader {
    async fn upload(&self, export_id: &str, artifact: &Path) -> Result<()> {
        let data = tokio::fs::read(artifact).await?;
        let size = data.len();
        let video = Part::bytes(data)
            .file_name(format!("{export_id}.mp4"))
            .mime_str("video/mp4")?;
        let form = Form::new()
            .text("export_id", export_id.to_string())
            .part("video", video);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Upload {
                status: status.as_u16(),
                body,
            });
        }

        info!(export_id, bytes = size, endpoint = %self.endpoint, "uploaded artifact");
        Ok(())
    }
}
