//! Parametrized templates and their expansion into concrete cases.

use serde_json::{Map, Value};

use crate::error::{EvalError, Result};
use crate::function::{CaseArgs, EvalFunction, SourceLocation};

/// Parameter names routed into the context seed instead of the call
/// arguments when the template takes a context.
pub const CONTEXT_FIELDS: [&str; 6] = ["input", "output", "reference", "metadata", "run_data", "latency"];

/// One layer of parameter sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Parametrize {
    sets: Vec<CaseArgs>,
    ids: Vec<Option<String>>,
}

impl Parametrize {
    /// Normalize `values` against the comma-separated `arg_names`.
    ///
    /// Arrays are zipped positionally, objects pass through, and a bare
    /// scalar is accepted only when a single name is declared.
    pub fn new(arg_names: &str, values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let names: Vec<String> = arg_names
            .split(',')
            .map(|n| n.trim().to_string())
            .collect();

        let sets = values
            .into_iter()
            .map(|value| normalize_set(&names, value))
            .collect::<Result<Vec<_>>>()?;
        let ids = vec![None; sets.len()];
        Ok(Self { sets, ids })
    }

    /// Attach one identifier per parameter set. An empty id counts as unset.
    pub fn with_ids<I, S>(mut self, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Option<String>> = ids
            .into_iter()
            .map(|id| Some(id.into()).filter(|id: &String| !id.is_empty()))
            .collect();
        if ids.len() != self.sets.len() {
            return Err(EvalError::IdCountMismatch {
                ids: ids.len(),
                sets: self.sets.len(),
            });
        }
        self.ids = ids;
        Ok(self)
    }

    pub fn sets(&self) -> &[CaseArgs] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

fn normalize_set(names: &[String], value: Value) -> Result<CaseArgs> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => {
            if items.len() != names.len() {
                return Err(EvalError::ArityMismatch {
                    names: names.join(", "),
                    expected: names.len(),
                    actual: items.len(),
                });
            }
            Ok(names.iter().cloned().zip(items).collect())
        }
        scalar => {
            if names.len() != 1 {
                return Err(EvalError::SingleValueArity {
                    names: names.join(", "),
                    expected: names.len(),
                });
            }
            let mut set = CaseArgs::new();
            set.insert(names[0].clone(), scalar);
            Ok(set)
        }
    }
}

/// A template function plus its accumulated parameter sets. Never executed
/// directly; see [`ParametrizedEval::expand`].
#[derive(Debug, Clone)]
pub struct ParametrizedEval {
    base: EvalFunction,
    sets: Vec<CaseArgs>,
    ids: Vec<Option<String>>,
}

impl EvalFunction {
    /// Turn this function into a parametrized template.
    pub fn parametrize(self, params: Parametrize) -> ParametrizedEval {
        ParametrizedEval {
            base: self,
            sets: params.sets,
            ids: params.ids,
        }
    }
}

impl ParametrizedEval {
    /// Stack another layer: cartesian product with the existing sets.
    ///
    /// Existing sets are the outer loop. Later values win on key collisions
    /// and identifiers join as `"{earlier}-{later}"`.
    pub fn parametrize(self, params: Parametrize) -> Self {
        let mut sets = Vec::with_capacity(self.sets.len() * params.sets.len());
        let mut ids = Vec::with_capacity(sets.capacity());

        for (outer, outer_id) in self.sets.iter().zip(&self.ids) {
            for (inner, inner_id) in params.sets.iter().zip(&params.ids) {
                let mut combined = outer.clone();
                combined.extend(inner.iter().map(|(k, v)| (k.clone(), v.clone())));
                sets.push(combined);

                ids.push(match (outer_id, inner_id) {
                    (Some(a), Some(b)) => Some(format!("{a}-{b}")),
                    (a, b) => a.clone().or_else(|| b.clone()),
                });
            }
        }

        Self {
            base: self.base,
            sets,
            ids,
        }
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    pub fn base(&self) -> &EvalFunction {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut EvalFunction {
        &mut self.base
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.base.location()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Materialize one independent function per parameter set, in order.
    pub fn expand(&self) -> Vec<EvalFunction> {
        let has_context = self.base.has_context();
        let template = self.base.config();

        self.sets
            .iter()
            .zip(&self.ids)
            .enumerate()
            .map(|(idx, (params, id))| {
                let id = id.clone().unwrap_or_else(|| idx.to_string());
                let (seeds, call_params) = if has_context {
                    split_context_fields(params)
                } else {
                    (Map::new(), params.clone())
                };

                let mut bound = self.base.bound_args().clone();
                bound.extend(call_params.iter().map(|(k, v)| (k.clone(), v.clone())));

                let mut child = self
                    .base
                    .clone()
                    .renamed(format!("{}[{}]", self.base.name(), id))
                    .with_bound_args(bound);
                let config = child.config_mut();

                config.input = seeds
                    .get("input")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .or_else(|| (!template.input.is_null()).then(|| template.input.clone()))
                    .or_else(|| (!call_params.is_empty()).then(|| Value::Object(call_params.clone())))
                    .unwrap_or(Value::Null);

                if let Some(reference) = seeds.get("reference") {
                    config.reference = reference.clone();
                }
                if let Some(output) = seeds.get("output") {
                    config.output = output.clone();
                }
                if let Some(latency) = seeds.get("latency") {
                    config.latency = latency.as_f64();
                }
                if let Some(Value::Object(run_data)) = seeds.get("run_data") {
                    config
                        .run_data
                        .get_or_insert_with(Map::new)
                        .extend(run_data.clone());
                }

                let case_metadata = match seeds.get("metadata") {
                    Some(Value::Object(m)) => Some(m),
                    _ => None,
                };
                if template.metadata.is_some() || case_metadata.is_some() || !call_params.is_empty() {
                    let mut metadata = template.metadata.clone().unwrap_or_default();
                    if let Some(case_metadata) = case_metadata {
                        metadata.extend(case_metadata.clone());
                    }
                    metadata.extend(call_params);
                    config.metadata = Some(metadata);
                }

                child
            })
            .collect()
    }
}

fn split_context_fields(params: &CaseArgs) -> (CaseArgs, CaseArgs) {
    params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .partition(|(k, _)| CONTEXT_FIELDS.contains(&k.as_str()))
}
