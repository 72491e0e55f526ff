//! Live runs: seed pending rows, persist a snapshot on every status change,
//! and leave every row in a terminal state when the run ends.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use casebench_core::{obs, CaseStatus, EvalFunction, EvalRegistry, ResultRecord, RunSummary};
use casebench_store::ResultStore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::runner::{discover_limited, EvalRunner, RunHooks};

/// Shared live state. Each mutation and the snapshot it produces happen
/// under the one lock, so persisted snapshots are never interleaved.
struct LiveRun {
    run_id: String,
    store: Arc<dyn ResultStore>,
    rerun_config: Value,
    /// One slot per function in dispatch order. A slot starts with a single
    /// placeholder row; functions yielding several results grow their slot.
    rows: Mutex<Vec<Vec<ResultRecord>>>,
}

impl LiveRun {
    fn update(&self, f: impl FnOnce(&mut Vec<Vec<ResultRecord>>)) -> RunSummary {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rows);
        let summary = self.snapshot(&rows);
        if let Err(e) = self.store.save_run(&self.run_id, &summary) {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist run snapshot");
        }
        summary
    }

    fn snapshot(&self, rows: &[Vec<ResultRecord>]) -> RunSummary {
        RunSummary::from_records(rows.iter().flatten().cloned().collect())
            .with_rerun_config(self.rerun_config.clone())
    }

    fn mark_running(&self, idx: usize) {
        self.update(|rows| {
            if let Some(row) = rows.get_mut(idx).and_then(|slot| slot.first_mut()) {
                if row.status == Some(CaseStatus::Pending) {
                    row.status = Some(CaseStatus::Running);
                }
            }
        });
    }

    fn complete(&self, idx: usize, record: &ResultRecord) {
        let record = record.clone().with_status(record.finished_status());
        self.update(|rows| {
            let Some(slot) = rows.get_mut(idx) else {
                rows.push(vec![record]);
                return;
            };
            let placeholder = slot
                .first()
                .is_some_and(|row| !row.status.is_some_and(|s| s.is_terminal()));
            if placeholder && slot.len() == 1 {
                slot[0] = record;
            } else {
                slot.push(record);
            }
        });
    }

    /// A function reported everything it had. A placeholder still open at
    /// this point belongs to a function that produced no results.
    fn resolve(&self, idx: usize) {
        self.update(|rows| {
            for row in rows.get_mut(idx).into_iter().flatten() {
                if !row.status.is_some_and(|s| s.is_terminal()) {
                    row.status = Some(CaseStatus::Completed);
                }
            }
        });
    }

    /// Close every row that never finished and persist the final snapshot.
    /// Open rows are cancelled only when a stop was requested.
    fn finish(&self, cancelled: bool) -> RunSummary {
        self.update(|rows| {
            for row in rows.iter_mut().flatten() {
                if row.status.is_some_and(|s| s.is_terminal()) {
                    continue;
                }
                if cancelled {
                    row.status = Some(CaseStatus::Cancelled);
                    row.result.output = Value::Null;
                } else {
                    tracing::warn!(function = %row.function_name, "row left open by a finished run");
                    row.status = Some(CaseStatus::Completed);
                }
            }
        })
    }
}

/// A seeded run, ready to start.
pub struct RunHandle {
    pub run_id: String,
    pub functions: Vec<EvalFunction>,
    pub rerun_config: Value,
    pub cancel: CancelToken,
    runner: EvalRunner,
    live: Arc<LiveRun>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("functions", &self.functions.len())
            .field("runner", &self.runner)
            .finish()
    }
}

impl RunHandle {
    /// Spawn execution on the current tokio runtime. The task resolves to
    /// the final persisted summary.
    ///
    /// Keep a clone of [`cancel`](Self::cancel) to stop the run.
    pub fn start(self) -> JoinHandle<RunSummary> {
        let span = obs::run_span(&self.run_id);
        tokio::spawn(
            async move {
                if !self.functions.is_empty() {
                    let running = Arc::clone(&self.live);
                    let done = Arc::clone(&self.live);
                    let resolved = Arc::clone(&self.live);
                    let hooks = RunHooks::new()
                        .on_start(move |idx, _func| running.mark_running(idx))
                        .on_complete(move |idx, _func, record| done.complete(idx, record))
                        .on_finish(move |idx, _func| resolved.resolve(idx));
                    self.runner
                        .run_all(self.functions, &hooks, &self.cancel)
                        .await;
                }
                self.live.finish(self.cancel.is_cancelled())
            }
            .instrument(span),
        )
    }

    /// Current state of every row.
    pub fn snapshot(&self) -> RunSummary {
        let rows = self.live.rows.lock().unwrap_or_else(PoisonError::into_inner);
        self.live.snapshot(&rows)
    }
}

/// [`start_run`] persisting into the JSON store at `config.results_dir`.
pub fn start_configured_run(config: &RunConfig, registry: &EvalRegistry) -> anyhow::Result<RunHandle> {
    let store = config.store()?;
    start_run(config, registry, Arc::new(store))
}

/// Discover the functions `config` selects, seed one pending row per
/// function and persist the initial snapshot under a fresh run id.
pub fn start_run(
    config: &RunConfig,
    registry: &EvalRegistry,
    store: Arc<dyn ResultStore>,
) -> anyhow::Result<RunHandle> {
    let path = config.eval_path()?;
    let options = config.to_options();
    let functions = discover_limited(registry, path, &options)?;
    let rerun_config = serde_json::to_value(config).context("failed to encode rerun config")?;

    let run_id = store.generate_run_id();
    let rows = functions
        .iter()
        .map(|func| vec![ResultRecord::pending(func)])
        .collect();
    let live = Arc::new(LiveRun {
        run_id: run_id.clone(),
        store: Arc::clone(&store),
        rerun_config: rerun_config.clone(),
        rows: Mutex::new(rows),
    });

    let initial = {
        let rows = live.rows.lock().unwrap_or_else(PoisonError::into_inner);
        live.snapshot(&rows)
    };
    store
        .save_run(&run_id, &initial)
        .with_context(|| format!("failed to persist run {run_id}"))?;
    tracing::info!(run_id = %run_id, functions = functions.len(), "run seeded");

    Ok(RunHandle {
        run_id,
        functions,
        rerun_config,
        cancel: CancelToken::new(),
        runner: EvalRunner::from_options(&options),
        live,
    })
}
