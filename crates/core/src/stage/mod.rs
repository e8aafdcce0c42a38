//! The three pipeline stages.
//!
//! Each stage takes a [`CancellationToken`] and a [`ProgressHandle`]. The
//! token is only looked at between units of work: before starting, between
//! items and after the last item. A call already handed to a collaborator is
//! never interrupted. Expected failures are reported in the result, never as
//! an `Err`.

mod extraction;
mod load;
mod transform;
mod types;

pub use extraction::ExtractionStage;
pub use load::LoadStage;
pub use transform::{render_query, TransformStage, NO_VERSION_REASON};
pub use types::{ItemOutcome, Outcome, StageKind, StageOutcome, StageResult};

use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::progress::ProgressHandle;

/// Returns true when the run was stopped, after logging where.
pub(crate) async fn stopped(
    cancel: &CancellationToken,
    stage: StageKind,
    checkpoint: &str,
    progress: &ProgressHandle,
) -> bool {
    if !cancel.is_cancelled() {
        return false;
    }
    progress
        .warn(format!("Stop requested, {stage} halted {checkpoint}"))
        .await;
    metrics::record_cancellation(stage);
    true
}
