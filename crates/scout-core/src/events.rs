//! Events surfaced to the UI layer.
//!
//! The coordinator never renders anything itself. Toasts, activity-log entries
//! and state snapshots are pushed through an [`EventSink`] supplied by the
//! embedding front end.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::chat::ChatMessage;
use crate::jobs::JobStatusSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: Level,
    pub message: String,
    /// Correlation id for support diagnosis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Toast {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }
}

/// An entry in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            job_id: None,
            url: None,
            at: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn for_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Everything the coordinator reports to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    Toast(Toast),
    Log(LogEntry),
    JobUpdated { summary: JobStatusSummary },
    MessageUpdated { message: ChatMessage },
}

/// Receiver of UI events.
///
/// Implementations must not block; they are called from background tasks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// No-op implementation for headless use and tests
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: UiEvent) {}
}

/// Forwards events into an unbounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: UiEvent) {
        // A closed receiver means the UI is gone; nothing left to tell.
        let _ = self.tx.send(event);
    }
}
