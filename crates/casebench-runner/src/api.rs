//! Programmatic entry point mixing functions, templates and eval paths.

use std::path::PathBuf;

use anyhow::Context;
use casebench_core::{EvalFunction, EvalRegistry, EvalResult, ParametrizedEval};

use crate::cancel::CancelToken;
use crate::discovery::{discover, DiscoveryFilter};
use crate::runner::{EvalRunner, RunHooks, RunOptions};

/// Something to run.
#[derive(Debug, Clone)]
pub enum EvalItem {
    Function(EvalFunction),
    /// Expanded in place.
    Template(ParametrizedEval),
    /// Discovered with the dataset and label filters of the run options.
    Path(PathBuf),
}

impl From<EvalFunction> for EvalItem {
    fn from(f: EvalFunction) -> Self {
        Self::Function(f)
    }
}

impl From<ParametrizedEval> for EvalItem {
    fn from(t: ParametrizedEval) -> Self {
        Self::Template(t)
    }
}

impl From<PathBuf> for EvalItem {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

/// Collect `items`, apply `options.limit` to the combined list, run and
/// return the flat results in order.
pub async fn run_evals(
    registry: &EvalRegistry,
    items: Vec<EvalItem>,
    options: &RunOptions,
) -> anyhow::Result<Vec<EvalResult>> {
    let path_filter = DiscoveryFilter {
        function_name: None,
        ..options.filter.clone()
    };

    let mut functions = Vec::new();
    for item in items {
        match item {
            EvalItem::Function(f) => functions.push(f),
            EvalItem::Template(t) => functions.extend(t.expand()),
            EvalItem::Path(path) => {
                let found = discover(registry, &path, &path_filter)
                    .with_context(|| format!("discovery failed for {}", path.display()))?;
                functions.extend(found);
            }
        }
    }
    if let Some(limit) = options.limit {
        functions.truncate(limit);
    }
    if functions.is_empty() {
        return Ok(Vec::new());
    }

    let records = EvalRunner::from_options(options)
        .run_all(functions, &RunHooks::default(), &CancelToken::new())
        .await;
    Ok(records.into_iter().map(|r| r.result).collect())
}
