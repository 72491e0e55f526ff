//! Case invocation outcomes and the assertion-failure signal.
//!
//! Case bodies return `anyhow::Result`. Exactly one error type,
//! [`AssertionFailed`], is treated as a scored validation failure; every
//! other error (and every panic) is a hard case error.

use std::fmt;

use crate::result::EvalResult;

/// Validation failure raised from inside a case body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailed {
    message: String,
}

impl AssertionFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Notes text for the failing score.
    pub fn notes(&self) -> &str {
        if self.message.is_empty() {
            "Assertion failed"
        } else {
            &self.message
        }
    }
}

impl fmt::Display for AssertionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.notes())
    }
}

impl std::error::Error for AssertionFailed {}

/// Return `Err(AssertionFailed)` from the enclosing case body unless the
/// condition holds.
///
/// ```ignore
/// eval_assert!(ctx.output == ctx.reference, "expected {}", ctx.reference);
/// ```
#[macro_export]
macro_rules! eval_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err(
                $crate::AssertionFailed::new(::std::string::String::new()).into(),
            );
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::std::result::Result::Err(
                $crate::AssertionFailed::new(::std::format!($($arg)+)).into(),
            );
        }
    };
}

/// Equality form of [`eval_assert!`]; the default message shows both sides.
#[macro_export]
macro_rules! eval_assert_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (l, r) => {
                if !(*l == *r) {
                    return ::std::result::Result::Err(
                        $crate::AssertionFailed::new(::std::format!("{:?} != {:?}", l, r)).into(),
                    );
                }
            }
        }
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        if !($left == $right) {
            return ::std::result::Result::Err(
                $crate::AssertionFailed::new(::std::format!($($arg)+)).into(),
            );
        }
    };
}

/// Classified result of one case invocation, before latency and evaluators.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    /// The body returned normally.
    Completed(Vec<EvalResult>),
    /// The body failed an assertion; the result carries a failing score.
    ScoredFailure(EvalResult),
    /// The body errored, panicked or timed out; `partial` carries the error.
    Error { message: String, partial: EvalResult },
}

impl CaseOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn into_results(self) -> Vec<EvalResult> {
        match self {
            Self::Completed(results) => results,
            Self::ScoredFailure(result) => vec![result],
            Self::Error { partial, .. } => vec![partial],
        }
    }
}
