//! Pipeline orchestrator.
//!
//! The only component aware of cross-stage ordering: it runs extraction, load
//! and transform in sequence and folds their outcomes into a
//! [`PipelineReport`].

mod runner;
mod types;

pub use runner::PipelineOrchestrator;
pub use types::{PipelineReport, PipelineRequest};
