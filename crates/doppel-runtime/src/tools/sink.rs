use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Notification, ToolError, ToolSink};

/// Writes notifications to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingToolSink;

#[async_trait]
impl ToolSink for LoggingToolSink {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        tracing::info!(
            tool = notification.tool_name(),
            message = %notification.message(),
            "Notification recorded"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Keeps notifications in memory, optionally failing every call.
#[derive(Debug, Default)]
pub struct RecordingToolSink {
    received: Mutex<Vec<Notification>>,
    failure: Option<String>,
}

impl RecordingToolSink {
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            failure: Some(reason.into()),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ToolSink for RecordingToolSink {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        if let Some(reason) = &self.failure {
            return Err(ToolError::Sink(reason.clone()));
        }
        self.received.lock().push(notification.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
