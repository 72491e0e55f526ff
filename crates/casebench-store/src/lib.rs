//! casebench-store: persistence for run summaries
//!
//! The [`ResultStore`] trait is the seam between orchestration and storage.
//! [`JsonFileStore`] writes one JSON snapshot per run with atomic renames;
//! [`fakes::MemoryResultStore`] records every snapshot for tests.

mod error;
pub mod fakes;
pub mod json_store;
pub mod storage_traits;

pub use error::{StoreError, StoreResult};
pub use json_store::{write_summary_json, JsonFileStore};
pub use storage_traits::{generate_run_id, ResultStore};
