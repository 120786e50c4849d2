//! Progress events
//!
//! Delivery is fire-and-forget: [`ProgressReporter::report`] queues the event
//! and returns immediately, and a failed delivery is only logged. Call
//! [`ProgressReporter::flush`] before the job finishes to let queued events
//! land.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ExportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    RenderingFrames,
    MergingVideo,
    Uploading,
    Completed,
    Failed,
}

/// Body posted to the progress webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub export_id: String,
    /// 0-100
    pub progress: u8,
    pub status: ExportStatus,
}

/// Where progress events go.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn deliver(&self, event: &ProgressEvent) -> Result<()>;
}

/// POSTs events as JSON to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProgressSink for WebhookSink {
    async fn deliver(&self, event: &ProgressEvent) -> Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Webhook(format!("{} answered {status}", self.url)));
        }
        Ok(())
    }
}

/// `round(done / total * 100)`, clamped to 100.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (done as f64 / total as f64 * 100.0).round();
    p.clamp(0.0, 100.0) as u8
}

/// Per-job progress publisher. Reported percentages never go backwards.
///
/// Events are handed to a single delivery task over a channel, so the sink
/// sees them in the order they were reported.
pub struct ProgressReporter {
    export_id: String,
    last: AtomicU8,
    queue: Mutex<Option<mpsc::UnboundedSender<ProgressEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressReporter {
    /// Create a reporter. With a sink this spawns the delivery task, so it
    /// must be called inside a tokio runtime.
    #[must_use]
    pub fn new(export_id: impl Into<String>, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        let (queue, worker) = match sink {
            Some(sink) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(tokio::spawn(deliver_in_order(sink, rx))))
            }
            None => (None, None),
        };
        Self {
            export_id: export_id.into(),
            last: AtomicU8::new(0),
            queue: Mutex::new(queue),
            worker: Mutex::new(worker),
        }
    }

    /// A reporter that only tracks the last percentage.
    #[must_use]
    pub fn silent(export_id: impl Into<String>) -> Self {
        Self::new(export_id, None)
    }

    /// Highest percentage reported so far.
    #[must_use]
    pub fn last_progress(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }

    /// Publish `progress` with `status` without waiting for delivery.
    pub fn report(&self, progress: u8, status: ExportStatus) {
        let progress = self.last.fetch_max(progress.min(100), Ordering::Relaxed).max(progress.min(100));
        self.dispatch(ProgressEvent {
            export_id: self.export_id.clone(),
            progress,
            status,
        });
    }

    /// Publish `failed` carrying the last reported percentage.
    pub fn fail(&self) {
        self.dispatch(ProgressEvent {
            export_id: self.export_id.clone(),
            progress: self.last_progress(),
            status: ExportStatus::Failed,
        });
    }

    fn dispatch(&self, event: ProgressEvent) {
        debug!(export_id = %event.export_id, progress = event.progress, status = ?event.status, "progress");
        let Ok(queue) = self.queue.lock() else {
            return;
        };
        if let Some(tx) = queue.as_ref() {
            if tx.send(event).is_err() {
                warn!(export_id = %self.export_id, "progress delivery task is gone, event dropped");
            }
        }
    }

    /// Close the queue and wait until every reported event was delivered.
    /// Events reported afterwards are only tracked, not sent.
    pub async fn flush(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn deliver_in_order(sink: Arc<dyn ProgressSink>, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.deliver(&event).await {
            warn!(export_id = %event.export_id, status = ?event.status, error = %e, "progress delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn deliver(&self, event: &ProgressEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(ExportError::Webhook("webhook down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 192), 0);
        assert_eq!(percent(5, 192), 3);
        assert_eq!(percent(96, 192), 50);
        assert_eq!(percent(192, 192), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn status_wire_names() {
        let event = ProgressEvent {
            export_id: "job-1".into(),
            progress: 40,
            status: ExportStatus::RenderingFrames,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "rendering_frames");
        assert_eq!(json["export_id"], "job-1");
        assert_eq!(
            serde_json::to_value(ExportStatus::MergingVideo).unwrap(),
            "merging_video"
        );
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_fail_reuses_last() {
        let sink = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new("job-1", Some(sink.clone() as Arc<dyn ProgressSink>));

        reporter.report(30, ExportStatus::RenderingFrames);
        reporter.report(10, ExportStatus::RenderingFrames);
        assert_eq!(reporter.last_progress(), 30);
        reporter.fail();
        reporter.flush().await;

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.progress == 30));
        assert!(events
            .iter()
            .any(|e| e.status == ExportStatus::Failed && e.progress == 30));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let sink = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let reporter = ProgressReporter::new("job-2", Some(sink.clone() as Arc<dyn ProgressSink>));
        reporter.report(100, ExportStatus::Completed);
        reporter.flush().await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    /// Holds the first delivery back so a racing later event would overtake it.
    #[derive(Default)]
    struct SlowFirst {
        events: Mutex<Vec<ProgressEvent>>,
        seen: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ProgressSink for SlowFirst {
        async fn deliver(&self, event: &ProgressEvent) -> Result<()> {
            if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn events_arrive_in_report_order() {
        let sink = Arc::new(SlowFirst::default());
        let reporter = ProgressReporter::new("job-4", Some(sink.clone() as Arc<dyn ProgressSink>));

        reporter.report(10, ExportStatus::RenderingFrames);
        reporter.report(90, ExportStatus::MergingVideo);
        reporter.fail();
        reporter.flush().await;

        let statuses: Vec<_> = sink.events.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![ExportStatus::RenderingFrames, ExportStatus::MergingVideo, ExportStatus::Failed]
        );
    }

    #[tokio::test]
    async fn reports_after_flush_are_not_sent() {
        let sink = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new("job-5", Some(sink.clone() as Arc<dyn ProgressSink>));
        reporter.report(20, ExportStatus::RenderingFrames);
        reporter.flush().await;
        reporter.report(40, ExportStatus::RenderingFrames);
        reporter.flush().await;

        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert_eq!(reporter.last_progress(), 40);
    }

    #[tokio::test]
    async fn silent_reporter_tracks_progress() {
        let reporter = ProgressReporter::silent("job-3");
        reporter.report(55, ExportStatus::RenderingFrames);
        reporter.flush().await;
        assert_eq!(reporter.last_progress(), 55);
    }
}
