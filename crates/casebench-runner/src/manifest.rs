//! Eval manifests: TOML files naming a registered module plus file-level
//! defaults for the functions in it.
//!
//! ```toml
//! module = "sentiment"
//! [defaults]
//! dataset = "sentiment_analysis"
//! labels = ["production"]
//! metadata = { model = "gpt-4" }
//! timeout = 5.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use casebench_core::{obs, EvalFunction, EvalRegistry};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ManifestError;

/// Keys accepted under `[defaults]`.
pub const DEFAULT_KEYS: [&str; 10] = [
    "dataset",
    "labels",
    "evaluators",
    "default_score_key",
    "metadata",
    "metadata_from_params",
    "timeout",
    "target",
    "input",
    "reference",
];

#[derive(Debug, Deserialize)]
struct RawManifest {
    module: Option<String>,
    #[serde(default)]
    defaults: toml::Table,
}

/// File-level defaults. Every field is optional; only set fields apply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDefaults {
    pub dataset: Option<String>,
    pub labels: Option<Vec<String>>,
    /// Names of registered evaluators.
    pub evaluators: Option<Vec<String>>,
    pub default_score_key: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub metadata_from_params: Option<Vec<String>>,
    /// Seconds.
    pub timeout: Option<f64>,
    /// Name of a registered target.
    pub target: Option<String>,
    pub input: Option<Value>,
    pub reference: Option<Value>,
}

/// A parsed manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalManifest {
    pub path: PathBuf,
    pub module: String,
    pub defaults: FileDefaults,
}

impl EvalManifest {
    /// Read and parse a manifest. Unknown `[defaults]` keys are dropped with
    /// a warning.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ManifestError> {
        let manifest: RawManifest = toml::from_str(raw)?;

        let mut defaults = manifest.defaults;
        defaults.retain(|key, _| {
            let known = DEFAULT_KEYS.contains(&key);
            if !known {
                obs::emit_unknown_default(path, key);
            }
            known
        });
        let defaults = FileDefaults::deserialize(toml::Value::Table(defaults))?;

        let module = manifest
            .module
            .or_else(|| file_stem(path))
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            module,
            defaults,
        })
    }

    /// Manifest file stem; the dataset of functions that set none.
    pub fn stem(&self) -> String {
        file_stem(&self.path).unwrap_or_else(|| self.module.clone())
    }

    /// Apply the defaults to every unprovided field of `func`.
    ///
    /// Values are cloned per function. `metadata` merges recursively with the
    /// function's own keys on top. Unresolvable target or evaluator names are
    /// skipped with a warning.
    pub fn apply_defaults(&self, func: &mut EvalFunction, registry: &EvalRegistry) {
        let defaults = &self.defaults;
        let name = func.name().to_string();
        let config = func.config_mut();

        if config.dataset.is_none() {
            config.dataset = defaults.dataset.clone();
        }
        if config.labels.is_none() {
            config.labels = defaults.labels.clone();
        }
        if config.default_score_key.is_none() {
            if let Some(key) = &defaults.default_score_key {
                config.default_score_key = Some(Some(key.clone()));
            }
        }
        if config.metadata_from_params.is_none() {
            config.metadata_from_params = defaults.metadata_from_params.clone();
        }
        if config.timeout.is_none() {
            config.timeout = defaults
                .timeout
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64);
        }
        if config.input.is_null() {
            if let Some(input) = &defaults.input {
                config.input = input.clone();
            }
        }
        if config.reference.is_null() {
            if let Some(reference) = &defaults.reference {
                config.reference = reference.clone();
            }
        }
        if let Some(base) = &defaults.metadata {
            let mut merged = base.clone();
            if let Some(own) = config.metadata.take() {
                deep_merge(&mut merged, own);
            }
            config.metadata = Some(merged);
        }

        if config.target.is_none() {
            if let Some(target_name) = &defaults.target {
                match registry.target(target_name) {
                    Some(target) => config.target = Some(target),
                    None => tracing::warn!(
                        path = %self.path.display(),
                        function = %name,
                        target = %target_name,
                        "default target is not registered"
                    ),
                }
            }
        }
        if config.evaluators.is_none() {
            if let Some(names) = &defaults.evaluators {
                let mut evaluators = Vec::with_capacity(names.len());
                for evaluator_name in names {
                    match registry.evaluator(evaluator_name) {
                        Some(evaluator) => evaluators.push(evaluator),
                        None => tracing::warn!(
                            path = %self.path.display(),
                            function = %name,
                            evaluator = %evaluator_name,
                            "default evaluator is not registered"
                        ),
                    }
                }
                config.evaluators = Some(evaluators);
            }
        }
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Overlay `overlay` onto `base`; nested objects merge key by key.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebench_core::{CaseReturn, Evaluator, Target};
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn noop(name: &str) -> EvalFunction {
        EvalFunction::with_context(name, |_ctx, _args| Ok(CaseReturn::Auto))
    }

    #[test]
    fn test_parse_filters_unknown_keys() {
        let manifest = EvalManifest::parse(
            Path::new("evals/sentiment.toml"),
            r#"
                [defaults]
                dataset = "sa"
                labels = ["prod"]
                colour = "blue"
                timeout = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(manifest.module, "sentiment");
        assert_eq!(manifest.defaults.dataset.as_deref(), Some("sa"));
        assert_eq!(manifest.defaults.timeout, Some(2.5));
        assert_eq!(manifest.stem(), "sentiment");
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = EvalManifest::parse(Path::new("a.toml"), "[defaults]\nlabels = 3\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_function_values_win_and_unset_fields_fill() {
        let manifest = EvalManifest::parse(
            Path::new("qa.toml"),
            r#"
                module = "qa_cases"
                [defaults]
                dataset = "file_ds"
                labels = ["file"]
                default_score_key = "accuracy"
                input = "default input"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.module, "qa_cases");
        let registry = EvalRegistry::new();

        let mut explicit = noop("explicit")
            .with_dataset("own_ds")
            .with_labels(Vec::<String>::new());
        manifest.apply_defaults(&mut explicit, &registry);
        assert_eq!(explicit.dataset(), "own_ds");
        assert!(explicit.labels().is_empty());

        let mut bare = noop("bare");
        manifest.apply_defaults(&mut bare, &registry);
        assert_eq!(bare.dataset(), "file_ds");
        assert_eq!(bare.labels(), &["file".to_string()]);
        assert_eq!(
            bare.config().default_score_key,
            Some(Some("accuracy".to_string()))
        );
        assert_eq!(bare.config().input, json!("default input"));
    }

    #[test]
    fn test_metadata_deep_merges() {
        let manifest = EvalManifest::parse(
            Path::new("m.toml"),
            r#"
                [defaults]
                metadata = { model = "gpt-4", params = { temperature = 0.0, top_p = 1.0 } }
            "#,
        )
        .unwrap();
        let mut func = noop("f").with_metadata(obj(json!({"params": {"temperature": 0.7}, "owner": "qa"})));
        manifest.apply_defaults(&mut func, &EvalRegistry::new());

        assert_eq!(
            func.config().metadata.clone().unwrap(),
            obj(json!({
                "model": "gpt-4",
                "owner": "qa",
                "params": {"temperature": 0.7, "top_p": 1.0}
            }))
        );
    }

    #[test]
    fn test_defaults_are_not_shared_between_functions() {
        let manifest = EvalManifest::parse(Path::new("m.toml"), "[defaults]\nlabels = [\"a\"]\n").unwrap();
        let registry = EvalRegistry::new();
        let mut first = noop("first");
        let mut second = noop("second");
        manifest.apply_defaults(&mut first, &registry);
        manifest.apply_defaults(&mut second, &registry);

        first.config_mut().labels.as_mut().unwrap().push("mutated".into());
        assert_eq!(second.labels(), &["a".to_string()]);
        assert_eq!(manifest.defaults.labels, Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_named_hooks_resolve_through_registry() {
        let registry = EvalRegistry::new();
        registry.register_target(Target::new("echo", |_ctx| Ok(None)));
        registry.register_evaluator(Evaluator::new("judge", |r| Ok(r.clone().into())));
        let manifest = EvalManifest::parse(
            Path::new("m.toml"),
            "[defaults]\ntarget = \"echo\"\nevaluators = [\"judge\", \"missing\"]\n",
        )
        .unwrap();

        let mut func = noop("f");
        manifest.apply_defaults(&mut func, &registry);
        assert_eq!(func.config().target.as_ref().map(|t| t.name()), Some("echo"));
        let names: Vec<_> = func.evaluators().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["judge"]);
    }
}
