use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::handle::{LogLevel, ProgressEvent};

/// Default number of lines kept in a [`LogBuffer`].
pub const DEFAULT_LOG_LINES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub line: String,
}

/// Result of one non-blocking drain.
#[derive(Debug, Default)]
pub struct Drained {
    /// Every event taken from the queue, log lines included.
    pub events: Vec<ProgressEvent>,
    /// All senders are gone and the queue is empty.
    pub disconnected: bool,
}

/// The visible log of one run: the most recent lines, oldest evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<LogLine>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, level: LogLevel, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            level,
            line: line.into(),
        });
    }

    /// Take everything currently queued without waiting.
    ///
    /// Log events are appended to the buffer. Safe to call repeatedly on an
    /// empty queue.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<ProgressEvent>) -> Drained {
        let mut drained = Drained::default();
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let ProgressEvent::Log { level, line } = &event {
                        self.push(*level, line.clone());
                    }
                    drained.events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    break;
                }
            }
        }
        drained
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// The full visible log, oldest line first.
    pub fn render(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.line.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
