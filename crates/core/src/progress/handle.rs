use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stage::StageKind;

/// Severity of a relayed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    fn label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        }
    }
}

/// Discrete progress of a run, emitted by the stages as work happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        stage: StageKind,
        total_items: usize,
    },
    ItemCompleted {
        stage: StageKind,
        key: String,
        success: bool,
        completed: usize,
        total: usize,
    },
    StageFinished {
        stage: StageKind,
        succeeded: usize,
        total: usize,
    },
    /// A formatted `HH:MM:SS [LEVEL] message` line.
    Log { level: LogLevel, line: String },
}

impl ProgressEvent {
    /// Completion fraction carried by the event, derived from real item counts.
    pub fn percent(&self) -> Option<f32> {
        match self {
            Self::ItemCompleted {
                completed, total, ..
            } if *total > 0 => Some(*completed as f32 * 100.0 / *total as f32),
            Self::StageFinished { .. } => Some(100.0),
            _ => None,
        }
    }
}

/// Handle the stages use to report progress and log lines.
///
/// Cheaply cloneable. Every log call also goes to `tracing`. Events are sent
/// through a bounded channel; when the receiver is gone the event is dropped
/// and the run continues.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressHandle {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A handle that only logs through `tracing`.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Progress receiver dropped, event discarded");
            }
        }
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{}", message);
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{}", message);
        self.log(LogLevel::Warning, message).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!("{}", message);
        self.log(LogLevel::Error, message).await;
    }

    pub async fn success(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{}", message);
        self.log(LogLevel::Success, message).await;
    }

    async fn log(&self, level: LogLevel, message: &str) {
        if self.tx.is_none() {
            return;
        }
        let line = format!(
            "{} [{}] {}",
            Local::now().format("%H:%M:%S"),
            level.label(),
            message
        );
        self.emit(ProgressEvent::Log { level, line }).await;
    }
}

/// Create a progress channel.
///
/// Returns the handle to give to the stages and the receiver to drain with a
/// [`LogBuffer`](super::LogBuffer) or a [`LogRelay`](super::LogRelay).
pub fn progress_channel(capacity: usize) -> (ProgressHandle, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressHandle::new(tx), rx)
}
