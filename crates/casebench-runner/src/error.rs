//! Error types for casebench-runner

use std::path::PathBuf;

use casebench_store::StoreError;
use thiserror::Error;

/// Structural discovery failures, returned to the caller.
///
/// Problems inside a single manifest are not errors at this level; the
/// manifest is skipped with a warning.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("eval path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    #[error("path {} is neither an eval manifest (.toml) nor a directory", path.display())]
    PathKind { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single manifest contributed nothing.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no evals registered for module {module:?}")]
    UnknownModule { module: String },
}

/// Run configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("config has no eval path")]
    MissingPath,

    #[error("config has no results directory")]
    MissingResultsDir,

    #[error("failed to open results directory: {0}")]
    Store(#[from] StoreError),
}
