//! Result types shared by the stages and the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The independently launchable run types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extraction,
    Load,
    Transform,
    /// The three stages in sequence.
    Pipeline,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Extraction,
        StageKind::Load,
        StageKind::Transform,
        StageKind::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Load => "load",
            Self::Transform => "transform",
            Self::Pipeline => "pipeline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one item (a source or a view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed(String),
    /// Not attempted because something it depends on did not succeed.
    Skipped(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub key: String,
    pub outcome: Outcome,
}

/// Per-item outcomes of one stage invocation, in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub items: Vec<ItemOutcome>,
}

impl StageResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, outcome: Outcome) {
        self.items.push(ItemOutcome {
            key: key.into(),
            outcome,
        });
    }

    pub fn get(&self, key: &str) -> Option<&Outcome> {
        self.items.iter().find(|i| i.key == key).map(|i| &i.outcome)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_success()).count()
    }

    /// True when every item succeeded (vacuously true when empty).
    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.outcome.is_success())
    }

    /// The `key -> success` mapping; skipped items count as failures.
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.items
            .iter()
            .map(|i| (i.key.clone(), i.outcome.is_success()))
            .collect()
    }

    /// Label used for metrics and summaries.
    pub fn status_label(&self) -> &'static str {
        if self.all_succeeded() {
            "succeeded"
        } else if self.succeeded_count() > 0 {
            "partial"
        } else {
            "failed"
        }
    }

    pub(crate) fn outcome_labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.items.iter().map(|i| i.outcome.label())
    }
}

/// What a cancellable stage call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Completed(T),
    /// Stopped at a checkpoint; no result is reported.
    Cancelled,
}

impl<T> StageOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Completed(value) => StageOutcome::Completed(f(value)),
            Self::Cancelled => StageOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(StageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StageKind::parse("deploy"), None);
        assert_eq!(
            serde_json::to_string(&StageKind::Extraction).unwrap(),
            "\"extraction\""
        );
    }

    #[test]
    fn test_stage_result_aggregation() {
        let mut result = StageResult::new();
        result.record("a", Outcome::Succeeded);
        result.record("b", Outcome::Failed("timeout".to_string()));
        result.record("c", Outcome::Skipped("b failed".to_string()));

        assert_eq!(result.len(), 3);
        assert_eq!(result.succeeded_count(), 1);
        assert!(!result.all_succeeded());
        assert_eq!(result.status_label(), "partial");

        let map = result.as_map();
        assert_eq!(map.get("a"), Some(&true));
        assert_eq!(map.get("b"), Some(&false));
        assert_eq!(map.get("c"), Some(&false));
    }

    #[test]
    fn test_empty_result_is_vacuously_successful() {
        let result = StageResult::new();
        assert!(result.all_succeeded());
        assert!(result.is_empty());
    }

    #[test]
    fn test_all_failed_label() {
        let mut result = StageResult::new();
        result.record("a", Outcome::Failed("boom".to_string()));
        assert_eq!(result.status_label(), "failed");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(Outcome::Failed("boom".to_string())).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");

        let json = serde_json::to_value(Outcome::Succeeded).unwrap();
        assert_eq!(json["status"], "succeeded");
    }

    #[test]
    fn test_stage_outcome_helpers() {
        let done: StageOutcome<bool> = StageOutcome::Completed(true);
        assert_eq!(done.clone().completed(), Some(true));
        assert!(!done.is_cancelled());
        assert!(StageOutcome::<bool>::Cancelled.is_cancelled());
    }
}
