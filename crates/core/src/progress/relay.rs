use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::buffer::LogBuffer;
use super::handle::ProgressEvent;

/// Callback invoked with each non-empty batch of drained events.
pub type RelayCallback = Arc<dyn Fn(&[ProgressEvent]) + Send + Sync>;

/// Periodically drains a progress channel into a shared [`LogBuffer`].
///
/// Runs until every sender is dropped and the queue is empty, so the last
/// lines of a run are always delivered.
pub struct LogRelay {
    rx: mpsc::Receiver<ProgressEvent>,
    buffer: Arc<RwLock<LogBuffer>>,
    tick: Duration,
    on_events: Option<RelayCallback>,
}

impl LogRelay {
    pub fn new(
        rx: mpsc::Receiver<ProgressEvent>,
        buffer: Arc<RwLock<LogBuffer>>,
        tick: Duration,
    ) -> Self {
        Self {
            rx,
            buffer,
            tick,
            on_events: None,
        }
    }

    pub fn with_callback(mut self, callback: RelayCallback) -> Self {
        self.on_events = Some(callback);
        self
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.tick.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let drained = {
                let mut buffer = self.buffer.write().await;
                buffer.drain(&mut self.rx)
            };

            if !drained.events.is_empty() {
                if let Some(callback) = &self.on_events {
                    callback(&drained.events);
                }
            }

            if drained.disconnected {
                debug!("Progress channel closed, relay stopping");
                break;
            }
        }
    }
}
