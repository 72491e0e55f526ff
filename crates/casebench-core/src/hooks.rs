//! Hooks attached to evaluation functions: post-processing evaluators and
//! pre-run targets.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::context::EvalContext;
use crate::result::{EvalResult, Score};

/// What an evaluator hands back for a finalized result.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluatorOutput {
    /// Replace the result entirely.
    Replace(EvalResult),
    /// Append one score.
    Score(Score),
    /// Append several scores, in order.
    Scores(Vec<Score>),
    /// A score-shaped object, or an array of them.
    Value(Value),
}

impl From<Score> for EvaluatorOutput {
    fn from(score: Score) -> Self {
        Self::Score(score)
    }
}

impl From<Vec<Score>> for EvaluatorOutput {
    fn from(scores: Vec<Score>) -> Self {
        Self::Scores(scores)
    }
}

impl From<EvalResult> for EvaluatorOutput {
    fn from(result: EvalResult) -> Self {
        Self::Replace(result)
    }
}

type SyncEvaluatorFn = dyn Fn(&EvalResult) -> anyhow::Result<EvaluatorOutput> + Send + Sync;
type AsyncEvaluatorFn =
    dyn Fn(EvalResult) -> BoxFuture<'static, anyhow::Result<EvaluatorOutput>> + Send + Sync;

#[derive(Clone)]
enum EvaluatorKind {
    Sync(Arc<SyncEvaluatorFn>),
    Async(Arc<AsyncEvaluatorFn>),
}

/// Post-processing step applied to each finalized result of a case.
#[derive(Clone)]
pub struct Evaluator {
    name: String,
    kind: EvaluatorKind,
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("name", &self.name)
            .field("is_async", &self.is_async())
            .finish()
    }
}

impl Evaluator {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EvalResult) -> anyhow::Result<EvaluatorOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: EvaluatorKind::Sync(Arc::new(f)),
        }
    }

    pub fn new_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(EvalResult) -> BoxFuture<'static, anyhow::Result<EvaluatorOutput>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            kind: EvaluatorKind::Async(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, EvaluatorKind::Async(_))
    }

    /// Run the evaluator and merge its output into `result`.
    ///
    /// An evaluator that errors or panics marks the result with an error
    /// instead of propagating.
    pub async fn apply(&self, result: EvalResult) -> EvalResult {
        let output = match &self.kind {
            EvaluatorKind::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(&result)))
                .unwrap_or_else(|payload| Err(panic_error(payload))),
            EvaluatorKind::Async(f) => AssertUnwindSafe(f(result.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(payload))),
        };

        match output.and_then(|out| merge_output(result.clone(), out)) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(evaluator = %self.name, error = %e, "evaluator failed");
                let mut failed = result;
                failed.error = Some(format!("evaluator {} failed: {e:#}", self.name));
                failed
            }
        }
    }
}

fn merge_output(mut result: EvalResult, output: EvaluatorOutput) -> anyhow::Result<EvalResult> {
    match output {
        EvaluatorOutput::Replace(replacement) => return Ok(replacement),
        EvaluatorOutput::Score(score) => result.push_score(score),
        EvaluatorOutput::Scores(scores) => {
            for score in scores {
                result.push_score(score);
            }
        }
        EvaluatorOutput::Value(Value::Array(items)) => {
            for item in items {
                result.push_score(serde_json::from_value(item)?);
            }
        }
        EvaluatorOutput::Value(value) => result.push_score(serde_json::from_value(value)?),
    }
    Ok(result)
}

type SyncTargetFn = dyn Fn(&mut EvalContext) -> anyhow::Result<Option<Value>> + Send + Sync;
type AsyncTargetFn = dyn for<'a> Fn(&'a mut EvalContext) -> BoxFuture<'a, anyhow::Result<Option<Value>>>
    + Send
    + Sync;

#[derive(Clone)]
enum TargetKind {
    Sync(Arc<SyncTargetFn>),
    Async(Arc<AsyncTargetFn>),
}

/// System under test, run against the context before the case body.
///
/// A returned payload goes through [`EvalContext::add_output`].
#[derive(Clone)]
pub struct Target {
    name: String,
    kind: TargetKind,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target").field("name", &self.name).finish()
    }
}

impl Target {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut EvalContext) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: TargetKind::Sync(Arc::new(f)),
        }
    }

    pub fn new_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut EvalContext) -> BoxFuture<'a, anyhow::Result<Option<Value>>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            kind: TargetKind::Async(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, TargetKind::Async(_))
    }

    pub(crate) async fn run(&self, ctx: &mut EvalContext) -> anyhow::Result<()> {
        let payload = match &self.kind {
            TargetKind::Sync(f) => f(ctx)?,
            TargetKind::Async(f) => f(ctx).await?,
        };
        if let Some(payload) = payload {
            ctx.add_output(payload);
        }
        Ok(())
    }

    /// Run a sync target on the current thread. `None` for async targets.
    pub(crate) fn run_blocking(&self, ctx: &mut EvalContext) -> Option<anyhow::Result<()>> {
        let TargetKind::Sync(f) = &self.kind else {
            return None;
        };
        let payload = match f(ctx) {
            Ok(payload) => payload,
            Err(e) => return Some(Err(e)),
        };
        if let Some(payload) = payload {
            ctx.add_output(payload);
        }
        Some(Ok(()))
    }
}

/// Render a panic payload as an error message.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "case panicked".to_string()
    }
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    anyhow::anyhow!("panicked: {}", panic_message(payload))
}
