//! Progress events and the live run log.
//!
//! Stages report through a [`ProgressHandle`]. The receiving side drains the
//! channel into a bounded [`LogBuffer`], either on demand or through a
//! [`LogRelay`] ticking in the background.

mod buffer;
mod handle;
mod relay;

pub use buffer::{Drained, LogBuffer, LogLine, DEFAULT_LOG_LINES};
pub use handle::{progress_channel, LogLevel, ProgressEvent, ProgressHandle};
pub use relay::{LogRelay, RelayCallback};
