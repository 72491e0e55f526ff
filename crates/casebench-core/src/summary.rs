//! Flat result records and aggregate run statistics.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::function::EvalFunction;
use crate::result::EvalResult;

/// Lifecycle of a case in a live run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl CaseStatus {
    /// Whether the case will not change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One case result as handed to reporting and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(alias = "function")]
    pub function_name: String,

    pub dataset: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,

    pub result: EvalResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CaseStatus>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ResultRecord {
    pub fn new(function: &EvalFunction, result: EvalResult) -> Self {
        Self {
            function_name: function.name().to_string(),
            dataset: function.dataset(),
            labels: function.labels().to_vec(),
            result,
            status: None,
        }
    }

    /// Placeholder row for a case that has not started yet.
    pub fn pending(function: &EvalFunction) -> Self {
        let config = function.config();
        let result = EvalResult {
            input: config.input.clone(),
            reference: config.reference.clone(),
            metadata: config.metadata.clone(),
            ..EvalResult::default()
        };
        Self::new(function, result).with_status(CaseStatus::Pending)
    }

    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// `Error` when the result carries an error, `Completed` otherwise.
    pub fn finished_status(&self) -> CaseStatus {
        if self.has_error() {
            CaseStatus::Error
        } else {
            CaseStatus::Completed
        }
    }

    pub fn has_error(&self) -> bool {
        self.result.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Aggregate statistics plus the flat record list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_evaluations: usize,
    pub total_functions: usize,
    pub total_errors: usize,
    pub total_passed: usize,
    pub total_with_scores: usize,
    /// Mean over results that report a latency; `0.0` when none do.
    pub average_latency: f64,
    pub results: Vec<ResultRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_config: Option<Value>,
}

impl RunSummary {
    /// Compute statistics over `records`. The totals do not depend on order.
    pub fn from_records(records: Vec<ResultRecord>) -> Self {
        let total_errors = records.iter().filter(|r| r.has_error()).count();
        let total_with_scores = records.iter().filter(|r| r.result.has_scores()).count();
        let total_passed = records
            .iter()
            .filter(|r| r.result.has_passing_score())
            .count();
        let total_functions = records
            .iter()
            .map(|r| r.function_name.as_str())
            .collect::<HashSet<_>>()
            .len();

        let latencies: Vec<f64> = records.iter().filter_map(|r| r.result.latency).collect();
        let average_latency = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Self {
            total_evaluations: records.len(),
            total_functions,
            total_errors,
            total_passed,
            total_with_scores,
            average_latency,
            results: records,
            rerun_config: None,
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn with_rerun_config(mut self, config: Value) -> Self {
        self.rerun_config = Some(config);
        self
    }

    /// Flat results in record order.
    pub fn eval_results(&self) -> Vec<EvalResult> {
        self.results.iter().map(|r| r.result.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Score;
    use serde_json::json;

    fn record(name: &str, result: EvalResult) -> ResultRecord {
        ResultRecord {
            function_name: name.to_string(),
            dataset: "ds".to_string(),
            labels: vec![],
            result,
            status: None,
        }
    }

    fn sample() -> Vec<ResultRecord> {
        vec![
            record(
                "a",
                EvalResult::new("1", "x")
                    .with_score(Score::passed("correctness", true))
                    .with_latency(1.0),
            ),
            record(
                "a",
                EvalResult::new("2", "y")
                    .with_score(Score::passed("correctness", false))
                    .with_latency(3.0),
            ),
            record("b", EvalResult::from_error(json!("3"), "boom")),
            record("c", EvalResult::new("4", "z").with_score(Score::value("sim", 0.2))),
        ]
    }

    #[test]
    fn test_summary_statistics() {
        let summary = RunSummary::from_records(sample());
        assert_eq!(summary.total_evaluations, 4);
        assert_eq!(summary.total_functions, 3);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.total_passed, 1);
        assert_eq!(summary.total_with_scores, 3);
        assert!((summary.average_latency - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_is_order_independent() {
        let forward = RunSummary::from_records(sample());
        let mut reversed_records = sample();
        reversed_records.reverse();
        let reversed = RunSummary::from_records(reversed_records);
        assert_eq!(forward.total_passed, reversed.total_passed);
        assert_eq!(forward.total_functions, reversed.total_functions);
        assert_eq!(forward.average_latency, reversed.average_latency);
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::empty();
        assert_eq!(summary.total_evaluations, 0);
        assert_eq!(summary.average_latency, 0.0);
    }

    #[test]
    fn test_record_accepts_function_alias_and_nulls() {
        let record: ResultRecord = serde_json::from_value(json!({
            "function": "legacy",
            "dataset": "ds",
            "labels": null,
            "result": {"input": "i", "output": null, "scores": null},
            "status": "running"
        }))
        .expect("deserialize");
        assert_eq!(record.function_name, "legacy");
        assert!(record.labels.is_empty());
        assert_eq!(record.status, Some(CaseStatus::Running));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let rec = record("a", EvalResult::default()).with_status(CaseStatus::Cancelled);
        let value = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(value["status"], json!("cancelled"));
        assert!(CaseStatus::Cancelled.is_terminal());
        assert!(!CaseStatus::Running.is_terminal());
    }
}
