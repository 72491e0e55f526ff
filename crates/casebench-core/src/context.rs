//! Mutable result builder used inside evaluation cases.
//!
//! An [`EvalContext`] accumulates input, output, scores and free-form data
//! while a case runs, and converts into an immutable [`EvalResult`] at the
//! end. Everything assigned before a failure survives into the final record,
//! which is what lets the function wrapper report partial data for cases
//! that error out half-way.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::error::{EvalError, Result};
use crate::result::{EvalResult, Score, DEFAULT_SCORE_KEY};

/// Keys [`EvalContext::add_output`] extracts from an object payload.
pub const OUTPUT_FIELDS: [&str; 4] = ["output", "latency", "run_data", "metadata"];

/// Positional score payload: a pass/fail flag or a numeric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreValue {
    Passed(bool),
    Value(f64),
}

impl ScoreValue {
    /// Dispatch an arbitrary JSON value the way a positional score argument is
    /// interpreted: booleans pass/fail, numbers are values, anything else is
    /// coerced by truthiness. `null` means "no positional value".
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Passed(*b)),
            Value::Number(n) => n.as_f64().map(Self::Value),
            Value::String(s) => Some(Self::Passed(!s.is_empty())),
            Value::Array(a) => Some(Self::Passed(!a.is_empty())),
            Value::Object(o) => Some(Self::Passed(!o.is_empty())),
        }
    }
}

impl From<bool> for ScoreValue {
    fn from(b: bool) -> Self {
        Self::Passed(b)
    }
}

macro_rules! numeric_score_value {
    ($($t:ty),*) => {
        $(impl From<$t> for ScoreValue {
            fn from(v: $t) -> Self {
                Self::Value(v as f64)
            }
        })*
    };
}

numeric_score_value!(f64, f32, i32, i64, u32, u64, usize);

/// Full-control score description for [`EvalContext::add_score_with`].
///
/// Explicit `passed`/`value` settings take precedence over whatever the
/// positional value dispatched to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSpec {
    positional: Option<ScoreValue>,
    key: Option<String>,
    notes: Option<String>,
    passed: Option<bool>,
    value: Option<f64>,
}

impl ScoreSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a positional value.
    pub fn of(value: impl Into<ScoreValue>) -> Self {
        Self {
            positional: Some(value.into()),
            ..Self::default()
        }
    }

    /// Start from a JSON value, dispatched like a positional argument.
    pub fn of_json(value: &Value) -> Self {
        Self {
            positional: ScoreValue::from_json(value),
            ..Self::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Explicit field overrides for [`EvalContext::add_output_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputOverrides {
    pub output: Option<Value>,
    pub latency: Option<f64>,
    pub run_data: Option<Map<String, Value>>,
    pub metadata: Option<Map<String, Value>>,
}

impl OutputOverrides {
    pub fn latency(mut self, latency: f64) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn output(mut self, output: impl Into<Value>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn run_data(mut self, run_data: Map<String, Value>) -> Self {
        self.run_data = Some(run_data);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Mutable accumulator for an [`EvalResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvalContext {
    pub input: Value,
    pub output: Value,
    pub reference: Value,
    pub default_score_key: Option<String>,
    pub metadata: Map<String, Value>,
    pub run_data: Map<String, Value>,
    /// Seconds. An explicit value here wins over the measured latency.
    pub latency: Option<f64>,
    scores: Vec<Score>,
    error: Option<String>,
    mirror: Option<ContextMirror>,
}

/// Copy of a context's state, refreshed after every builder call.
///
/// Lets a caller read what a case body has recorded so far while the body is
/// still running on another thread.
#[derive(Clone, Default)]
pub(crate) struct ContextMirror(Arc<Mutex<Option<EvalContext>>>);

impl ContextMirror {
    fn publish(&self, ctx: &EvalContext) {
        let mut copy = ctx.clone();
        copy.mirror = None;
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(copy);
    }

    /// Last published state, if any.
    pub(crate) fn latest(&self) -> Option<EvalContext> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl fmt::Debug for ContextMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextMirror")
    }
}

// A mirror is a view, not state.
impl PartialEq for ContextMirror {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            input: Value::Null,
            output: Value::Null,
            reference: Value::Null,
            default_score_key: Some(DEFAULT_SCORE_KEY.to_string()),
            metadata: Map::new(),
            run_data: Map::new(),
            latency: None,
            scores: Vec::new(),
            error: None,
            mirror: None,
        }
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with a preset input.
    pub fn with_input(input: impl Into<Value>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// Attach a mirror and publish the current state to it.
    pub(crate) fn mirrored(&mut self) -> ContextMirror {
        let mirror = ContextMirror::default();
        mirror.publish(self);
        self.mirror = Some(mirror.clone());
        mirror
    }

    /// Drop the mirror, if any.
    pub(crate) fn detach_mirror(&mut self) {
        self.mirror = None;
    }

    fn publish(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.publish(self);
        }
    }

    /// Scores recorded so far, in insertion order.
    pub fn scores(&self) -> &[Score] {
        &self.scores
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Smart output assignment.
    ///
    /// An object containing any of `output`, `latency`, `run_data` or
    /// `metadata` is unpacked into those fields (`run_data` and `metadata`
    /// merge key by key). Any other value is stored verbatim as `output`.
    pub fn add_output(&mut self, data: impl Into<Value>) -> &mut Self {
        self.add_output_with(data, OutputOverrides::default())
    }

    /// [`add_output`](Self::add_output) followed by explicit overrides, which
    /// always win over extracted values.
    pub fn add_output_with(
        &mut self,
        data: impl Into<Value>,
        overrides: OutputOverrides,
    ) -> &mut Self {
        match data.into() {
            Value::Object(mut obj) if OUTPUT_FIELDS.iter().any(|k| obj.contains_key(*k)) => {
                if let Some(output) = obj.remove("output") {
                    self.output = output;
                }
                if let Some(latency) = obj.remove("latency") {
                    self.latency = latency.as_f64();
                }
                if let Some(Value::Object(run_data)) = obj.remove("run_data") {
                    self.run_data.extend(run_data);
                }
                if let Some(Value::Object(metadata)) = obj.remove("metadata") {
                    self.metadata.extend(metadata);
                }
            }
            other => self.output = other,
        }

        if let Some(output) = overrides.output {
            self.output = output;
        }
        if let Some(latency) = overrides.latency {
            self.latency = Some(latency);
        }
        if let Some(run_data) = overrides.run_data {
            self.run_data = run_data;
        }
        if let Some(metadata) = overrides.metadata {
            self.metadata = metadata;
        }
        self.publish();
        self
    }

    /// Record a score under the default key.
    ///
    /// `true`/`false` become `passed`, numbers become `value`. Empty notes
    /// are dropped.
    pub fn add_score(&mut self, value: impl Into<ScoreValue>, notes: &str) -> Result<&mut Self> {
        self.add_score_with(ScoreSpec::of(value).notes(notes))
    }

    /// Record a score with full control over key, flags and notes.
    pub fn add_score_with(&mut self, spec: ScoreSpec) -> Result<&mut Self> {
        let key = spec
            .key
            .or_else(|| self.default_score_key.clone())
            .filter(|k| !k.is_empty())
            .ok_or(EvalError::MissingScoreKey)?;

        let mut score = Score {
            key,
            passed: None,
            value: None,
            notes: spec.notes.filter(|n| !n.is_empty()),
        };
        match spec.positional {
            Some(ScoreValue::Passed(p)) => score.passed = Some(p),
            Some(ScoreValue::Value(v)) => score.value = Some(v),
            None => {}
        }
        if spec.passed.is_some() {
            score.passed = spec.passed;
        }
        if spec.value.is_some() {
            score.value = spec.value;
        }

        self.scores.push(score);
        self.publish();
        Ok(self)
    }

    /// Use raw parameters as the case input and expose them as metadata.
    pub fn set_params(&mut self, params: Map<String, Value>) -> &mut Self {
        self.metadata
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.input = Value::Object(params);
        self.publish();
        self
    }

    /// Snapshot the accumulated state.
    ///
    /// With no scores and no error the implicit passing score is added.
    /// Empty maps become absent.
    pub fn build(&self) -> EvalResult {
        let mut result = EvalResult {
            input: self.input.clone(),
            output: self.output.clone(),
            reference: self.reference.clone(),
            scores: (!self.scores.is_empty()).then(|| self.scores.clone()),
            error: self.error.clone(),
            latency: self.latency,
            metadata: (!self.metadata.is_empty()).then(|| self.metadata.clone()),
            run_data: (!self.run_data.is_empty()).then(|| self.run_data.clone()),
        };
        result.ensure_default_score(self.default_score_key.as_deref());
        result
    }

    /// Set the error and build, keeping all partial state.
    pub fn build_with_error(&mut self, message: impl Into<String>) -> EvalResult {
        self.error = Some(message.into());
        self.publish();
        self.build()
    }

    /// Scoped use of the context. The closure's return value, including any
    /// error, is passed through untouched.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        f(self)
    }
}
