//! casebench-runner: discovery and execution of evaluation cases
//!
//! Discovery resolves TOML eval manifests against an
//! [`EvalRegistry`](casebench_core::EvalRegistry), applying file defaults and
//! filters. [`EvalRunner`] executes the discovered functions sequentially or with bounded
//! concurrency, reporting progress through [`RunHooks`] and honouring a
//! [`CancelToken`]. [`start_run`] wraps a run with live persisted status.

pub mod api;
pub mod cancel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod run_manager;
pub mod runner;

pub use api::{run_evals, EvalItem};
pub use cancel::CancelToken;
pub use config::RunConfig;
pub use discovery::{discover, unique_datasets, unique_labels, DiscoveryFilter};
pub use error::{ConfigError, DiscoveryError, ManifestError};
pub use manifest::{EvalManifest, FileDefaults};
pub use run_manager::{start_configured_run, start_run, RunHandle};
pub use runner::{CompleteHook, EvalRunner, FinishHook, RunHooks, RunOptions, StartHook};
