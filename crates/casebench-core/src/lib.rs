//! casebench core library
//!
//! Result model, the [`EvalContext`] result builder, the [`EvalFunction`]
//! wrapper, parametrization and the case registry. Orchestration lives in
//! `casebench-runner`, persistence in `casebench-store`.

pub mod background;
pub mod context;
pub mod error;
pub mod function;
pub mod hooks;
pub mod obs;
pub mod outcome;
pub mod parametrize;
pub mod registry;
pub mod result;
pub mod summary;
pub mod telemetry;

pub use context::{EvalContext, OutputOverrides, ScoreSpec, ScoreValue, OUTPUT_FIELDS};
pub use error::{EvalError, Result};
pub use function::{
    CaseArgs, CaseReturn, EvalConfig, EvalFunction, SourceLocation, SyncDispatch,
};
pub use hooks::{Evaluator, EvaluatorOutput, Target};
pub use outcome::{AssertionFailed, CaseOutcome};
pub use parametrize::{ParametrizedEval, Parametrize, CONTEXT_FIELDS};
pub use registry::{qualified_name, EvalRegistry, RegisteredEval};
pub use result::{EvalResult, Score, DEFAULT_SCORE_KEY};
pub use summary::{CaseStatus, ResultRecord, RunSummary};

/// casebench version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
