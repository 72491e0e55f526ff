//! Canonical result records produced once per evaluation case.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key used for the implicit passing score when a case records nothing.
pub const DEFAULT_SCORE_KEY: &str = "correctness";

/// A single named judgment attached to a case result.
///
/// A score normally carries `passed`, `value` or both. One with neither is
/// kept as an informational annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Score {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Score {
    /// Boolean pass/fail score.
    pub fn passed(key: impl Into<String>, passed: bool) -> Self {
        Self {
            key: key.into(),
            passed: Some(passed),
            value: None,
            notes: None,
        }
    }

    /// Numeric score.
    pub fn value(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            passed: None,
            value: Some(value),
            notes: None,
        }
    }

    /// Attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Whether this score carries no judgment at all.
    pub fn is_informational(&self) -> bool {
        self.passed.is_none() && self.value.is_none()
    }
}

/// Immutable outcome of one evaluation case.
///
/// `input`, `output` and `reference` are opaque to the harness; `Value::Null`
/// means absent. Score order is insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalResult {
    #[serde(default)]
    pub input: Value,

    #[serde(default)]
    pub output: Value,

    #[serde(default)]
    pub reference: Value,

    #[serde(default)]
    pub scores: Option<Vec<Score>>,

    #[serde(default)]
    pub error: Option<String>,

    /// Seconds.
    #[serde(default)]
    pub latency: Option<f64>,

    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,

    #[serde(default)]
    pub run_data: Option<Map<String, Value>>,
}

impl EvalResult {
    pub fn new(input: impl Into<Value>, output: impl Into<Value>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Minimal result for a case that failed before producing anything.
    pub fn from_error(input: Value, message: impl Into<String>) -> Self {
        Self {
            input,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<Value>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_score(mut self, score: Score) -> Self {
        self.scores.get_or_insert_with(Vec::new).push(score);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_run_data(mut self, run_data: Map<String, Value>) -> Self {
        self.run_data = Some(run_data);
        self
    }

    /// Append a score, creating the list if needed.
    pub fn push_score(&mut self, score: Score) {
        self.scores.get_or_insert_with(Vec::new).push(score);
    }

    pub fn has_scores(&self) -> bool {
        self.scores.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// True when any score explicitly passed.
    pub fn has_passing_score(&self) -> bool {
        self.scores
            .as_ref()
            .is_some_and(|s| s.iter().any(|score| score.passed == Some(true)))
    }

    /// Inject the implicit passing score when the result has neither scores
    /// nor an error. Returns whether it was applied.
    ///
    /// This is the "no assertion = pass" policy. It is intentional, and it
    /// means a case that forgot to score anything reports as passed.
    pub fn ensure_default_score(&mut self, key: Option<&str>) -> bool {
        if self.has_scores() || self.error.is_some() {
            return false;
        }
        let key = key.unwrap_or(DEFAULT_SCORE_KEY);
        tracing::debug!(score_key = %key, "no scores recorded, applying implicit pass");
        self.scores = Some(vec![Score::passed(key, true)]);
        true
    }
}
