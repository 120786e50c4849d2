//! Job submission
//!
//! [`ExportService::submit`] validates the request, starts the pipeline on
//! the runtime and returns a `started` acknowledgement straight away. The
//! outcome is only observable through progress events, the uploaded
//! artifact, or [`ExportService::status`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;
use crate::job::{validate_export_id, JobState};
use crate::pipeline::{ExportOutcome, ExportPipeline};
use crate::scene::SceneDescription;

/// One export submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub scene: SceneDescription,
    #[serde(alias = "export_id")]
    pub export_id: String,
    #[serde(default, alias = "webhook_url", skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Copy the merged file here before the job directory is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_output: Option<PathBuf>,
}

impl ExportRequest {
    #[must_use]
    pub fn new(export_id: impl Into<String>, scene: SceneDescription) -> Self {
        Self {
            scene,
            export_id: export_id.into(),
            webhook_url: None,
            keep_output: None,
        }
    }

    #[must_use]
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_keep_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.keep_output = Some(path.into());
        self
    }
}

/// Immediate reply to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    pub status: String,
    pub export_id: String,
}

pub struct ExportService {
    pipeline: Arc<ExportPipeline>,
}

impl ExportService {
    #[must_use]
    pub fn new(pipeline: ExportPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Start `request` in the background.
    ///
    /// Only id and scene validation, and the check that no run with the same
    /// id is in flight, happen before the acknowledgement. Every later
    /// failure is reported through the job's progress events.
    pub async fn submit(&self, request: ExportRequest) -> Result<(SubmitAck, JoinHandle<Result<ExportOutcome>>)> {
        validate_export_id(&request.export_id)?;
        request.scene.validate()?;
        let registry = self.pipeline.registry();
        registry.try_claim(&request.export_id).await?;

        let ack = SubmitAck {
            status: "started".to_string(),
            export_id: request.export_id.clone(),
        };
        info!(export_id = %ack.export_id, active = registry.active().await, "export started");

        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::spawn(async move {
            let export_id = request.export_id.clone();
            let result = pipeline.run_claimed(request).await;
            if let Err(e) = &result {
                error!(export_id = %export_id, error = %e, "export failed");
            }
            result
        });
        Ok((ack, handle))
    }

    /// Latest known state of a submitted job.
    pub async fn status(&self, export_id: &str) -> Option<JobState> {
        self.pipeline.registry().get(export_id).await
    }

    #[must_use]
    pub fn pipeline(&self) -> &ExportPipeline {
        &self.pipeline
    }
}
