//! Case execution: sequential or bounded-concurrent, with progress hooks and
//! cooperative cancellation.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use casebench_core::{
    obs, CaseArgs, EvalFunction, EvalRegistry, EvalResult, ResultRecord, RunSummary,
    SyncDispatch,
};
use casebench_store::write_summary_json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::discovery::{discover, DiscoveryFilter};

/// Called when a case begins, with its position in dispatch order.
pub type StartHook = Arc<dyn Fn(usize, &EvalFunction) + Send + Sync>;

/// Called once per finalized record, in completion order.
pub type CompleteHook = Arc<dyn Fn(usize, &EvalFunction, &ResultRecord) + Send + Sync>;

/// Called once a function has reported all of its records, including when it
/// reported none. Not called for functions cut short by cancellation.
pub type FinishHook = Arc<dyn Fn(usize, &EvalFunction) + Send + Sync>;

/// Optional progress callbacks. Absent hooks change nothing but reporting.
#[derive(Clone, Default)]
pub struct RunHooks {
    on_start: Option<StartHook>,
    on_complete: Option<CompleteHook>,
    on_finish: Option<FinishHook>,
}

impl fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

impl RunHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EvalFunction) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EvalFunction, &ResultRecord) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EvalFunction) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(f));
        self
    }

    fn started(&self, idx: usize, func: &EvalFunction) {
        obs::emit_case_started(func.name());
        if let Some(hook) = &self.on_start {
            hook(idx, func);
        }
    }

    fn completed(&self, idx: usize, func: &EvalFunction, record: &ResultRecord) {
        obs::emit_case_completed(
            func.name(),
            record.result.latency,
            record.result.error.as_deref(),
        );
        if let Some(hook) = &self.on_complete {
            hook(idx, func, record);
        }
    }

    fn finished(&self, idx: usize, func: &EvalFunction) {
        if let Some(hook) = &self.on_finish {
            hook(idx, func);
        }
    }
}

/// Options for a discover-and-run pass.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub filter: DiscoveryFilter,
    pub limit: Option<usize>,
    /// `0` runs sequentially.
    pub concurrency: usize,
    /// Overrides every function's own timeout when set.
    pub timeout: Option<Duration>,
    pub output_file: Option<PathBuf>,
}

/// Executes discovered functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalRunner {
    concurrency: usize,
    timeout: Option<Duration>,
}

impl EvalRunner {
    pub fn new(concurrency: usize, timeout: Option<Duration>) -> Self {
        Self {
            concurrency,
            timeout,
        }
    }

    pub fn from_options(options: &RunOptions) -> Self {
        Self::new(options.concurrency, options.timeout)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run every function once and return one record per result, in
    /// dispatch order regardless of completion order.
    ///
    /// Once `cancel` is observed nothing new starts, and results of cases
    /// still in flight are dropped without being reported.
    pub async fn run_all(
        &self,
        functions: Vec<EvalFunction>,
        hooks: &RunHooks,
        cancel: &CancelToken,
    ) -> Vec<ResultRecord> {
        let total = functions.len();
        let functions: Vec<Arc<EvalFunction>> = functions
            .into_iter()
            .map(|mut func| {
                if self.timeout.is_some() {
                    func.set_timeout(self.timeout);
                }
                Arc::new(func)
            })
            .collect();

        obs::emit_run_started(total, self.concurrency);
        let started = Instant::now();

        let records = if self.concurrency == 0 {
            run_sequential(&functions, hooks, cancel).await
        } else {
            run_concurrent(&functions, self.concurrency, hooks, cancel).await
        };

        if cancel.is_cancelled() {
            obs::emit_run_cancelled(records.len(), total);
        }
        let errors = records.iter().filter(|r| r.has_error()).count();
        obs::emit_run_finished(started.elapsed().as_millis() as u64, records.len(), errors);
        records
    }

    /// Aggregate statistics over `records`.
    pub fn summarize(records: Vec<ResultRecord>) -> RunSummary {
        RunSummary::from_records(records)
    }

    /// Discover from `path`, apply the limit, run and summarize. Writes the
    /// summary to `options.output_file` when set.
    pub async fn run(
        &self,
        registry: &EvalRegistry,
        path: &Path,
        options: &RunOptions,
    ) -> anyhow::Result<RunSummary> {
        self.run_with(registry, path, options, &RunHooks::default(), &CancelToken::new())
            .await
    }

    /// [`run`](Self::run) with progress hooks and a stop signal.
    pub async fn run_with(
        &self,
        registry: &EvalRegistry,
        path: &Path,
        options: &RunOptions,
        hooks: &RunHooks,
        cancel: &CancelToken,
    ) -> anyhow::Result<RunSummary> {
        let functions = discover_limited(registry, path, options)?;
        let records = self.run_all(functions, hooks, cancel).await;
        let summary = Self::summarize(records);

        if let Some(output) = &options.output_file {
            write_summary_json(output, &summary)
                .with_context(|| format!("failed to write results to {}", output.display()))?;
            tracing::info!(path = %output.display(), "results written");
        }
        Ok(summary)
    }
}

/// Discovery followed by the limit in `options`.
pub fn discover_limited(
    registry: &EvalRegistry,
    path: &Path,
    options: &RunOptions,
) -> anyhow::Result<Vec<EvalFunction>> {
    let mut functions = discover(registry, path, &options.filter)
        .with_context(|| format!("discovery failed for {}", path.display()))?;
    if let Some(limit) = options.limit {
        functions.truncate(limit);
    }
    Ok(functions)
}

/// Final record for one result. Results with neither scores nor an error
/// get the implicit passing score here.
fn finalize(func: &EvalFunction, mut result: EvalResult) -> ResultRecord {
    let key = func.config().default_score_key.clone().flatten();
    result.ensure_default_score(key.as_deref());
    ResultRecord::new(func, result)
}

/// Error record for a case whose task died before reporting.
fn lost_case(func: &EvalFunction, message: String) -> ResultRecord {
    let input = func.config().input.clone();
    ResultRecord::new(func, EvalResult::from_error(input, message))
}

async fn run_sequential(
    functions: &[Arc<EvalFunction>],
    hooks: &RunHooks,
    cancel: &CancelToken,
) -> Vec<ResultRecord> {
    let mut records = Vec::new();
    'cases: for (idx, func) in functions.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        hooks.started(idx, func);
        if cancel.is_cancelled() {
            break;
        }
        let results = func
            .execute(CaseArgs::new(), SyncDispatch::BlockingPool)
            .await;
        for result in results {
            if cancel.is_cancelled() {
                break 'cases;
            }
            let record = finalize(func, result);
            hooks.completed(idx, func, &record);
            records.push(record);
        }
        hooks.finished(idx, func);
    }
    records
}

async fn run_concurrent(
    functions: &[Arc<EvalFunction>],
    concurrency: usize,
    hooks: &RunHooks,
    cancel: &CancelToken,
) -> Vec<ResultRecord> {
    let gate = Arc::new(Semaphore::new(concurrency));
    let mut join_set = JoinSet::new();
    let mut next = 0;
    let mut ordered: Vec<(usize, ResultRecord)> = Vec::new();
    let mut in_flight = HashMap::new();

    loop {
        while join_set.len() < concurrency && next < functions.len() && !cancel.is_cancelled() {
            let idx = next;
            next += 1;
            let func = Arc::clone(&functions[idx]);
            let gate = Arc::clone(&gate);
            let hooks = hooks.clone();
            let cancel = cancel.clone();
            let task = join_set.spawn(async move {
                let _permit = gate.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                hooks.started(idx, &func);
                let results = func
                    .execute(CaseArgs::new(), SyncDispatch::BlockingPool)
                    .await;
                Some((idx, results))
            });
            in_flight.insert(task.id(), idx);
        }

        let Some(joined) = join_set.join_next_with_id().await else {
            break;
        };
        if cancel.is_cancelled() {
            // Blocking work already running keeps going in the pool; its
            // result is never read.
            join_set.abort_all();
            break;
        }
        match joined {
            Ok((id, Some((idx, results)))) => {
                in_flight.remove(&id);
                let func = &functions[idx];
                for result in results {
                    let record = finalize(func, result);
                    hooks.completed(idx, func, &record);
                    ordered.push((idx, record));
                }
                hooks.finished(idx, func);
            }
            Ok((id, None)) => {
                in_flight.remove(&id);
            }
            Err(e) => {
                tracing::error!(error = %e, "case task failed");
                let Some(idx) = in_flight.remove(&e.id()) else {
                    continue;
                };
                let func = &functions[idx];
                let message = match e.try_into_panic() {
                    Ok(payload) => format!("case task panicked: {}", panic_text(&*payload)),
                    Err(e) => format!("case task failed: {e}"),
                };
                let record = lost_case(func, message);
                hooks.completed(idx, func, &record);
                ordered.push((idx, record));
                hooks.finished(idx, func);
            }
        }
    }

    ordered.sort_by_key(|(idx, _)| *idx);
    ordered.into_iter().map(|(_, record)| record).collect()
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
