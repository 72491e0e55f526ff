//! Structured lifecycle events for evaluation runs.
//!
//! Every emission carries a stable `event` field so log pipelines can key on
//! it: `run.started`, `run.finished`, `run.cancelled`, `case.started`,
//! `case.completed`, `discovery.manifest_skipped` and
//! `discovery.unknown_default`.

use std::path::Path;

use tracing::{info, warn};

/// RAII guard that enters a run-scoped span for as long as it lives.
///
/// ```ignore
/// let _span = RunSpan::enter("2026-10-15T09-30-00Z-1a2b3c4d");
/// // events emitted here carry run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span itself, for instrumenting futures that move between
/// threads.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("casebench.run", run_id = %run_id)
}

pub fn emit_run_started(total_functions: usize, concurrency: usize) {
    info!(
        event = "run.started",
        total_functions = total_functions,
        concurrency = concurrency,
    );
}

/// Emit event: run finished with its headline totals.
pub fn emit_run_finished(duration_ms: u64, total_evaluations: usize, total_errors: usize) {
    info!(
        event = "run.finished",
        duration_ms = duration_ms,
        total_evaluations = total_evaluations,
        total_errors = total_errors,
    );
}

/// Emit event: a stop request was observed; `completed` cases were reported.
pub fn emit_run_cancelled(completed: usize, total: usize) {
    warn!(event = "run.cancelled", completed = completed, total = total);
}

pub fn emit_case_started(function: &str) {
    tracing::debug!(event = "case.started", function = %function);
}

pub fn emit_case_completed(function: &str, latency: Option<f64>, error: Option<&str>) {
    match error {
        Some(error) => info!(
            event = "case.completed",
            function = %function,
            latency = latency.unwrap_or_default(),
            error = %error,
        ),
        None => info!(
            event = "case.completed",
            function = %function,
            latency = latency.unwrap_or_default(),
        ),
    }
}

/// Emit event: a manifest contributed nothing (warning level).
pub fn emit_manifest_skipped(path: &Path, reason: &dyn std::fmt::Display) {
    warn!(
        event = "discovery.manifest_skipped",
        path = %path.display(),
        reason = %reason,
    );
}

/// Emit event: a `[defaults]` key outside the allow-list was ignored.
pub fn emit_unknown_default(path: &Path, key: &str) {
    warn!(
        event = "discovery.unknown_default",
        path = %path.display(),
        key = %key,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let _span = RunSpan::enter("test-run");
        emit_run_started(3, 2);
        emit_case_started("f");
        emit_case_completed("f", Some(0.1), None);
        emit_case_completed("g", None, Some("boom"));
        emit_run_cancelled(1, 3);
        emit_run_finished(12, 3, 1);
        emit_manifest_skipped(Path::new("evals/bad.toml"), &"parse error");
        emit_unknown_default(Path::new("evals/a.toml"), "colour");
    }
}
