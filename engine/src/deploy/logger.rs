//! Per-deployment log fan-out: process log, log file and optional live sink

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::filesys::file::File;

/// Capacity of a caller's live log queue
pub const DEFAULT_SINK_CAPACITY: usize = 10;

/// Producer side of a live log queue; dropping every sender closes it
pub type LogSink = mpsc::Sender<String>;

/// Consumer side of a live log queue
pub type LogStream = mpsc::Receiver<String>;

/// Create a bounded live log queue
pub fn log_channel(capacity: usize) -> (LogSink, LogStream) {
    mpsc::channel(capacity.max(1))
}

/// Writes each pipeline line to every destination, one line at a time
pub struct DeployLogger {
    deployment_id: String,
    file: Option<File>,
    sink: Mutex<Option<LogSink>>,
}

impl DeployLogger {
    pub fn new(deployment_id: impl Into<String>, file: Option<File>, sink: Option<LogSink>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            file,
            sink: Mutex::new(sink),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Record one line
    pub async fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let mut sink = self.sink.lock().await;

        info!(deployment = %self.deployment_id, "{}", message);

        if let Some(file) = &self.file {
            let line = format!("[{}] {}", Utc::now().to_rfc3339(), message);
            if let Err(e) = file.append_line(&line).await {
                warn!("Failed to write deployment log {}: {}", file.path().display(), e);
            }
        }

        if let Some(tx) = sink.as_ref() {
            if tx.send(message.to_string()).await.is_err() {
                // consumer went away
                *sink = None;
            }
        }
    }

    /// Close the live sink; later lines only reach the log file
    pub async fn close(&self) {
        self.sink.lock().await.take();
    }
}
