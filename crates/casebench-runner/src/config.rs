//! Run configuration: TOML file overlaid by environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use casebench_store::JsonFileStore;
use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryFilter;
use crate::error::ConfigError;
use crate::runner::RunOptions;

pub const CONCURRENCY_ENV: &str = "CASEBENCH_CONCURRENCY";
pub const TIMEOUT_ENV: &str = "CASEBENCH_TIMEOUT";
pub const RESULTS_DIR_ENV: &str = "CASEBENCH_RESULTS_DIR";

/// Everything needed to reproduce a run. Stored alongside live results as
/// the rerun configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub path: Option<PathBuf>,
    pub dataset: Option<String>,
    pub labels: Vec<String>,
    pub function_name: Option<String>,
    pub limit: Option<usize>,
    pub concurrency: usize,
    pub timeout_secs: Option<f64>,
    pub output_file: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`; unset or empty variables are ignored.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get(CONCURRENCY_ENV) {
            self.concurrency = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: CONCURRENCY_ENV,
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get(TIMEOUT_ENV) {
            let secs: f64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|s: &f64| s.is_finite() && *s > 0.0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
            self.timeout_secs = Some(secs);
        }
        if let Some(raw) = get(RESULTS_DIR_ENV) {
            self.results_dir = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    /// The eval path, required for any run.
    pub fn eval_path(&self) -> Result<&Path, ConfigError> {
        self.path.as_deref().ok_or(ConfigError::MissingPath)
    }

    /// JSON store rooted at `results_dir`, created if missing.
    pub fn store(&self) -> Result<JsonFileStore, ConfigError> {
        let dir = self
            .results_dir
            .as_deref()
            .ok_or(ConfigError::MissingResultsDir)?;
        Ok(JsonFileStore::new(dir)?)
    }

    pub fn filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            dataset: self.dataset.clone(),
            labels: self.labels.clone(),
            function_name: self.function_name.clone(),
        }
    }

    pub fn to_options(&self) -> RunOptions {
        RunOptions {
            filter: self.filter(),
            limit: self.limit,
            concurrency: self.concurrency,
            timeout: self
                .timeout_secs
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64),
            output_file: self.output_file.clone(),
        }
    }
}
