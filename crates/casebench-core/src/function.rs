//! Evaluation function wrapper.
//!
//! [`EvalFunction`] adapts one case body into a uniform "invoke once, get
//! results" contract. Whether the body takes an [`EvalContext`] and whether
//! it is async is fixed at construction. Every failure a body can produce
//! (error, assertion, panic, timeout, unsupported return shape) is folded
//! into the returned [`EvalResult`]s; nothing escapes [`EvalFunction::execute`].

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::context::{EvalContext, ScoreSpec};
use crate::error::{EvalError, Result};
use crate::hooks::{panic_error, Evaluator, Target};
use crate::outcome::{AssertionFailed, CaseOutcome};
use crate::result::EvalResult;

/// Keyword arguments passed to a case body.
pub type CaseArgs = Map<String, Value>;

/// Field names an `EvalResult` object may carry.
const RESULT_FIELDS: [&str; 8] = [
    "input",
    "output",
    "reference",
    "scores",
    "error",
    "latency",
    "metadata",
    "run_data",
];

/// What a case body hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseReturn {
    /// Finalize the context implicitly. Requires a context.
    Auto,
    /// Finalize the context explicitly.
    Context,
    Result(EvalResult),
    Results(Vec<EvalResult>),
    /// Dynamically shaped return; must decode to one result or an array.
    Value(Value),
}

impl From<EvalResult> for CaseReturn {
    fn from(result: EvalResult) -> Self {
        Self::Result(result)
    }
}

impl From<Vec<EvalResult>> for CaseReturn {
    fn from(results: Vec<EvalResult>) -> Self {
        Self::Results(results)
    }
}

type SyncContextFn =
    dyn Fn(&mut EvalContext, &CaseArgs) -> anyhow::Result<CaseReturn> + Send + Sync;
type AsyncContextFn = dyn for<'a> Fn(&'a mut EvalContext, CaseArgs) -> BoxFuture<'a, anyhow::Result<CaseReturn>>
    + Send
    + Sync;
type SyncPlainFn = dyn Fn(&CaseArgs) -> anyhow::Result<CaseReturn> + Send + Sync;
type AsyncPlainFn =
    dyn Fn(CaseArgs) -> BoxFuture<'static, anyhow::Result<CaseReturn>> + Send + Sync;

#[derive(Clone)]
enum CaseBody {
    SyncContext(Arc<SyncContextFn>),
    AsyncContext(Arc<AsyncContextFn>),
    SyncPlain(Arc<SyncPlainFn>),
    AsyncPlain(Arc<AsyncPlainFn>),
}

/// Where synchronous bodies run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDispatch {
    /// Call directly on the current task.
    #[default]
    Inline,
    /// Offload to the runtime's blocking pool.
    BlockingPool,
}

/// Registration site of a case function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    pub fn file_stem(&self) -> Option<String> {
        file_stem(&self.file)
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
}

/// Configuration attached to a function.
///
/// `Option` fields distinguish "not provided" from "provided but empty";
/// discovery only fills the former from file defaults. `Value::Null` plays
/// the same role for the seed values.
#[derive(Debug, Clone, Default)]
pub struct EvalConfig {
    pub dataset: Option<String>,
    pub labels: Option<Vec<String>>,
    pub evaluators: Option<Vec<Evaluator>>,
    /// Outer `None`: not provided. `Some(None)`: explicitly no default key.
    pub default_score_key: Option<Option<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub metadata_from_params: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub target: Option<Target>,
    pub input: Value,
    pub reference: Value,
    pub output: Value,
    pub run_data: Option<Map<String, Value>>,
    pub latency: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
#[error("evaluation timed out after {}s", .0.as_secs_f64())]
struct CaseTimedOut(Duration);

/// One runnable evaluation case.
#[derive(Clone)]
pub struct EvalFunction {
    name: String,
    body: CaseBody,
    config: EvalConfig,
    bound_args: CaseArgs,
    location: Option<SourceLocation>,
}

impl fmt::Debug for EvalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalFunction")
            .field("name", &self.name)
            .field("is_async", &self.is_async())
            .field("has_context", &self.has_context())
            .field("config", &self.config)
            .field("bound_args", &self.bound_args)
            .field("location", &self.location)
            .finish()
    }
}

impl EvalFunction {
    fn from_body(name: impl Into<String>, body: CaseBody) -> Self {
        Self {
            name: name.into(),
            body,
            config: EvalConfig::default(),
            bound_args: CaseArgs::new(),
            location: None,
        }
    }

    /// Synchronous body taking a context.
    pub fn with_context<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut EvalContext, &CaseArgs) -> anyhow::Result<CaseReturn> + Send + Sync + 'static,
    {
        Self::from_body(name, CaseBody::SyncContext(Arc::new(f)))
    }

    /// Async body taking a context. Box the future with
    /// [`FutureExt::boxed`](futures::FutureExt::boxed).
    pub fn with_context_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut EvalContext, CaseArgs) -> BoxFuture<'a, anyhow::Result<CaseReturn>>
            + Send
            + Sync
            + 'static,
    {
        Self::from_body(name, CaseBody::AsyncContext(Arc::new(f)))
    }

    /// Synchronous body without a context.
    pub fn plain<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CaseArgs) -> anyhow::Result<CaseReturn> + Send + Sync + 'static,
    {
        Self::from_body(name, CaseBody::SyncPlain(Arc::new(f)))
    }

    /// Async body without a context.
    pub fn plain_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CaseArgs) -> BoxFuture<'static, anyhow::Result<CaseReturn>> + Send + Sync + 'static,
    {
        Self::from_body(name, CaseBody::AsyncPlain(Arc::new(f)))
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.config.dataset = Some(dataset.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.config
            .evaluators
            .get_or_insert_with(Vec::new)
            .push(evaluator);
        self
    }

    pub fn with_evaluators(mut self, evaluators: Vec<Evaluator>) -> Self {
        self.config.evaluators = Some(evaluators);
        self
    }

    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.config.input = input.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<Value>) -> Self {
        self.config.reference = reference.into();
        self
    }

    pub fn with_default_score_key(mut self, key: impl Into<String>) -> Self {
        self.config.default_score_key = Some(Some(key.into()));
        self
    }

    /// Disable the default score key; un-keyed scores then fail.
    pub fn without_default_score_key(mut self) -> Self {
        self.config.default_score_key = Some(None);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.config.metadata = Some(metadata);
        self
    }

    /// Copy these call arguments into the context metadata on every call.
    pub fn with_metadata_from_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.metadata_from_params = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.config.target = Some(target);
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Arguments merged under every call's own arguments.
    pub fn with_bound_args(mut self, args: CaseArgs) -> Self {
        self.bound_args = args;
        self
    }

    pub(crate) fn renamed(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(
            self.body,
            CaseBody::AsyncContext(_) | CaseBody::AsyncPlain(_)
        )
    }

    pub fn has_context(&self) -> bool {
        matches!(
            self.body,
            CaseBody::SyncContext(_) | CaseBody::AsyncContext(_)
        )
    }

    /// Explicit dataset, else the source file stem, else `"default"`.
    pub fn dataset(&self) -> String {
        self.config
            .dataset
            .clone()
            .or_else(|| self.location.as_ref().and_then(SourceLocation::file_stem))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn labels(&self) -> &[String] {
        self.config.labels.as_deref().unwrap_or(&[])
    }

    pub fn evaluators(&self) -> &[Evaluator] {
        self.config.evaluators.as_deref().unwrap_or(&[])
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeout = timeout;
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn bound_args(&self) -> &CaseArgs {
        &self.bound_args
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EvalConfig {
        &mut self.config
    }

    /// Run the case once and return its finalized results.
    ///
    /// Latency covers the target and the body; evaluators run afterwards and
    /// are not timed.
    pub async fn execute(&self, args: CaseArgs, dispatch: SyncDispatch) -> Vec<EvalResult> {
        let started = Instant::now();
        let outcome = self.invoke(args, dispatch).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut results = outcome.into_results();
        if !results.is_empty() {
            let share = elapsed / results.len() as f64;
            for result in results.iter_mut().filter(|r| r.latency.is_none()) {
                result.latency = Some(share);
            }
        }

        let evaluators = self.evaluators();
        if evaluators.is_empty() {
            return results;
        }
        let mut finalized = Vec::with_capacity(results.len());
        for mut result in results {
            for evaluator in evaluators {
                result = evaluator.apply(result).await;
            }
            finalized.push(result);
        }
        finalized
    }

    /// Entry point for async callers. Synchronous bodies run inline on the
    /// calling task. A configured timeout needs a tokio runtime.
    pub async fn call_async(&self, args: CaseArgs) -> Vec<EvalResult> {
        self.execute(args, SyncDispatch::Inline).await
    }

    /// Blocking entry point, usable with or without a running runtime.
    pub fn call(&self, args: CaseArgs) -> Result<Vec<EvalResult>> {
        let this = self.clone();
        crate::background::block_on(async move {
            this.execute(args, SyncDispatch::BlockingPool).await
        })
    }

    /// Invoke the body and classify what happened, before latency and
    /// evaluators are applied.
    pub async fn invoke(&self, args: CaseArgs, dispatch: SyncDispatch) -> CaseOutcome {
        let args = self.merged_args(args);
        let fallback_input = args.get("input").cloned().unwrap_or(Value::Null);
        let timeout = self.config.timeout;

        match &self.body {
            CaseBody::AsyncContext(f) => {
                let mut ctx = self.seed_context(&args);
                let res = within(
                    timeout,
                    guarded(async {
                        self.run_target(&mut ctx).await?;
                        f(&mut ctx, args).await
                    }),
                )
                .await;
                classify(Some(ctx), res, fallback_input)
            }
            CaseBody::SyncContext(f) => {
                let mut ctx = self.seed_context(&args);
                let (ctx, res) = match dispatch {
                    SyncDispatch::Inline => {
                        let started = Instant::now();
                        let prepared = guarded(self.run_target(&mut ctx)).await;
                        let res = prepared.and_then(|()| {
                            catch_unwind(AssertUnwindSafe(|| f(&mut ctx, &args)))
                                .unwrap_or_else(|payload| Err(panic_error(payload)))
                        });
                        (ctx, check_elapsed(timeout, started, res))
                    }
                    SyncDispatch::BlockingPool => {
                        // Sync targets run on the worker alongside the body.
                        let (pooled, prepared) = match &self.config.target {
                            Some(target) if !target.is_async() => (Some(target.clone()), Ok(())),
                            _ => (None, guarded(self.run_target(&mut ctx)).await),
                        };
                        match prepared {
                            Ok(()) => {
                                run_context_in_pool(Arc::clone(f), pooled, ctx, args, timeout).await
                            }
                            Err(e) => (ctx, Err(e)),
                        }
                    }
                };
                classify(Some(ctx), res, fallback_input)
            }
            CaseBody::SyncPlain(f) => {
                self.warn_ignored_target();
                let res = match dispatch {
                    SyncDispatch::Inline => {
                        let started = Instant::now();
                        let res = catch_unwind(AssertUnwindSafe(|| f(&args)))
                            .unwrap_or_else(|payload| Err(panic_error(payload)));
                        check_elapsed(timeout, started, res)
                    }
                    SyncDispatch::BlockingPool => {
                        let f = Arc::clone(f);
                        let task = tokio::task::spawn_blocking(move || {
                            catch_unwind(AssertUnwindSafe(|| f(&args)))
                                .unwrap_or_else(|payload| Err(panic_error(payload)))
                        });
                        within(timeout, async move {
                            task.await
                                .unwrap_or_else(|e| Err(anyhow::anyhow!("case worker failed: {e}")))
                        })
                        .await
                    }
                };
                classify(None, res, fallback_input)
            }
            CaseBody::AsyncPlain(f) => {
                self.warn_ignored_target();
                let res = within(timeout, guarded(f(args))).await;
                classify(None, res, fallback_input)
            }
        }
    }

    fn merged_args(&self, args: CaseArgs) -> CaseArgs {
        if self.bound_args.is_empty() {
            return args;
        }
        let mut merged = self.bound_args.clone();
        merged.extend(args);
        merged
    }

    fn seed_context(&self, args: &CaseArgs) -> EvalContext {
        let config = &self.config;
        let mut ctx = EvalContext::new();
        ctx.input = config.input.clone();
        ctx.reference = config.reference.clone();
        ctx.output = config.output.clone();
        ctx.latency = config.latency;
        if let Some(run_data) = &config.run_data {
            ctx.run_data = run_data.clone();
        }
        if let Some(metadata) = &config.metadata {
            ctx.metadata = metadata.clone();
        }
        if let Some(key) = &config.default_score_key {
            ctx.default_score_key = key.clone();
        }
        for name in config.metadata_from_params.iter().flatten() {
            if let Some(value) = args.get(name) {
                ctx.metadata.insert(name.clone(), value.clone());
            }
        }
        if ctx.input.is_null() {
            if let Some(input) = args.get("input") {
                ctx.input = input.clone();
            }
        }
        ctx
    }

    async fn run_target(&self, ctx: &mut EvalContext) -> anyhow::Result<()> {
        match &self.config.target {
            Some(target) => target.run(ctx).await,
            None => Ok(()),
        }
    }

    fn warn_ignored_target(&self) {
        if let Some(target) = &self.config.target {
            tracing::warn!(
                function = %self.name,
                target = %target.name(),
                "target ignored for a function without a context"
            );
        }
    }
}

async fn run_context_in_pool(
    f: Arc<SyncContextFn>,
    target: Option<Target>,
    mut ctx: EvalContext,
    args: CaseArgs,
    timeout: Option<Duration>,
) -> (EvalContext, anyhow::Result<CaseReturn>) {
    // On timeout the worker keeps running detached; the last state it
    // published through the mirror is reported.
    let mirror = ctx.mirrored();
    let task = tokio::task::spawn_blocking(move || {
        let res = catch_unwind(AssertUnwindSafe(|| {
            if let Some(Err(e)) = target.as_ref().and_then(|t| t.run_blocking(&mut ctx)) {
                return Err(e);
            }
            f(&mut ctx, &args)
        }))
        .unwrap_or_else(|payload| Err(panic_error(payload)));
        ctx.detach_mirror();
        (ctx, res)
    });
    let joined = within(timeout, async move {
        task.await
            .map_err(|e| anyhow::anyhow!("case worker failed: {e}"))
    })
    .await;
    match joined {
        Ok((ctx, res)) => (ctx, res),
        Err(e) => (mirror.latest().unwrap_or_default(), Err(e)),
    }
}

async fn within<T, F>(timeout: Option<Duration>, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::Error::new(CaseTimedOut(limit)))?,
        None => fut.await,
    }
}

async fn guarded<T, F>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_error(payload)))
}

fn check_elapsed<T>(
    timeout: Option<Duration>,
    started: Instant,
    res: anyhow::Result<T>,
) -> anyhow::Result<T> {
    match timeout {
        Some(limit) if started.elapsed() > limit => Err(CaseTimedOut(limit).into()),
        _ => res,
    }
}

fn classify(
    ctx: Option<EvalContext>,
    res: anyhow::Result<CaseReturn>,
    fallback_input: Value,
) -> CaseOutcome {
    let err = match res.and_then(|ret| normalize(ret, ctx.as_ref()).map_err(anyhow::Error::from)) {
        Ok(results) => return CaseOutcome::Completed(results),
        Err(e) => e,
    };

    let Some(mut ctx) = ctx else {
        let message = format!("{err:#}");
        return CaseOutcome::Error {
            partial: EvalResult::from_error(fallback_input, message.clone()),
            message,
        };
    };

    if let Some(assertion) = err.downcast_ref::<AssertionFailed>() {
        match ctx.add_score_with(ScoreSpec::of(false).notes(assertion.notes())) {
            Ok(_) => return CaseOutcome::ScoredFailure(ctx.build()),
            Err(key_err) => {
                let message = key_err.to_string();
                return CaseOutcome::Error {
                    partial: ctx.build_with_error(message.clone()),
                    message,
                };
            }
        }
    }

    let message = format!("{err:#}");
    CaseOutcome::Error {
        partial: ctx.build_with_error(message.clone()),
        message,
    }
}

fn normalize(ret: CaseReturn, ctx: Option<&EvalContext>) -> Result<Vec<EvalResult>> {
    match ret {
        CaseReturn::Auto | CaseReturn::Context => match ctx {
            Some(ctx) => Ok(vec![ctx.build()]),
            None => Err(EvalError::InvalidReturnType {
                received: "auto-return without a context".to_string(),
            }),
        },
        CaseReturn::Result(result) => Ok(vec![result]),
        CaseReturn::Results(results) => Ok(results),
        CaseReturn::Value(value) => decode_results(value),
    }
}

fn decode_results(value: Value) -> Result<Vec<EvalResult>> {
    match value {
        Value::Object(obj) => Ok(vec![decode_result(obj)?]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => decode_result(obj),
                other => Err(invalid_return(&other)),
            })
            .collect(),
        other => Err(invalid_return(&other)),
    }
}

fn decode_result(obj: Map<String, Value>) -> Result<EvalResult> {
    if obj.keys().any(|k| !RESULT_FIELDS.contains(&k.as_str())) {
        return Err(EvalError::InvalidReturnType {
            received: "object".to_string(),
        });
    }
    Ok(serde_json::from_value(Value::Object(obj))?)
}

fn invalid_return(value: &Value) -> EvalError {
    let received = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    EvalError::InvalidReturnType {
        received: received.to_string(),
    }
}
