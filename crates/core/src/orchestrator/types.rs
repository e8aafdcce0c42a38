//! Types for the pipeline orchestrator.

use serde::{Deserialize, Serialize};

use crate::stage::{StageKind, StageResult};

/// What a pipeline run should do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Extract only this source; every active source when `None`.
    #[serde(default)]
    pub source_filter: Option<String>,
    #[serde(default)]
    pub skip_extraction: bool,
    #[serde(default)]
    pub skip_load: bool,
}

/// Aggregated outcome of a pipeline run.
///
/// A stage that did not run is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub extraction: Option<StageResult>,
    pub load: Option<bool>,
    pub transform: Option<StageResult>,
    /// Set when the run stopped early because a stage reported failure.
    pub halted_after: Option<StageKind>,
}

impl PipelineReport {
    /// True when transform ran and every view was built.
    ///
    /// Extraction and load failures are reported but do not affect this.
    pub fn success(&self) -> bool {
        self.transform
            .as_ref()
            .is_some_and(|t| t.all_succeeded())
    }

    /// Whether an extraction or load that ran reported failure.
    pub fn upstream_failed(&self) -> bool {
        let extraction_failed = self
            .extraction
            .as_ref()
            .is_some_and(|e| !e.all_succeeded());
        extraction_failed || self.load == Some(false)
    }

    /// `succeeded`, `partial` or `failed`.
    pub fn status_label(&self) -> &'static str {
        if self.success() {
            if self.upstream_failed() {
                "partial"
            } else {
                "succeeded"
            }
        } else if self
            .transform
            .as_ref()
            .is_some_and(|t| t.succeeded_count() > 0)
        {
            "partial"
        } else {
            "failed"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Outcome;

    fn result(outcomes: &[(&str, bool)]) -> StageResult {
        let mut result = StageResult::new();
        for (key, ok) in outcomes {
            let outcome = if *ok {
                Outcome::Succeeded
            } else {
                Outcome::Failed("boom".to_string())
            };
            result.record(*key, outcome);
        }
        result
    }

    #[test]
    fn test_success_depends_only_on_transform() {
        let report = PipelineReport {
            extraction: Some(result(&[("a", true), ("b", false)])),
            load: Some(false),
            transform: Some(result(&[("v1", true), ("v2", true)])),
            halted_after: None,
        };
        assert!(report.success());
        assert!(report.upstream_failed());
        assert_eq!(report.status_label(), "partial");
    }

    #[test]
    fn test_missing_transform_is_failure() {
        let report = PipelineReport {
            extraction: Some(result(&[("a", false)])),
            halted_after: Some(StageKind::Extraction),
            ..Default::default()
        };
        assert!(!report.success());
        assert_eq!(report.status_label(), "failed");
    }

    #[test]
    fn test_labels() {
        let clean = PipelineReport {
            transform: Some(result(&[("v1", true)])),
            ..Default::default()
        };
        assert_eq!(clean.status_label(), "succeeded");

        let some_views = PipelineReport {
            transform: Some(result(&[("v1", true), ("v2", false)])),
            ..Default::default()
        };
        assert!(!some_views.success());
        assert_eq!(some_views.status_label(), "partial");
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: PipelineRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, PipelineRequest::default());
    }
}
