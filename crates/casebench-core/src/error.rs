//! Error taxonomy for casebench configuration and protocol violations.
//!
//! These are author-facing errors: bad parametrization arity, missing score
//! keys, return shapes the wrapper cannot normalize. Failures that belong to
//! a single evaluation case never surface here; the function wrapper folds
//! them into the case's [`EvalResult`](crate::EvalResult).

/// casebench domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("expected {expected} values for ({names}), got {actual}")]
    ArityMismatch {
        names: String,
        expected: usize,
        actual: usize,
    },

    #[error("single value provided but {expected} parameters expected ({names})")]
    SingleValueArity { names: String, expected: usize },

    #[error("must specify score key or set default_score_key")]
    MissingScoreKey,

    #[error(
        "evaluation function must return EvalResult, a list of EvalResult, the context, \
         or auto-return (with a context), got {received}"
    )]
    InvalidReturnType { received: String },

    #[error("evaluation already registered: {0}")]
    DuplicateRegistration(String),

    #[error("parameter ids do not match parameter sets: {ids} ids for {sets} sets")]
    IdCountMismatch { ids: usize, sets: usize },

    #[error("background runtime error: {0}")]
    Runtime(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for casebench domain operations.
pub type Result<T> = std::result::Result<T, EvalError>;
