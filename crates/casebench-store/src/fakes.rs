//! In-memory result store for tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use casebench_core::RunSummary;

use crate::error::{StoreError, StoreResult};
use crate::storage_traits::ResultStore;

/// Keeps every snapshot saved for every run, in save order.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    runs: Mutex<HashMap<String, Vec<RunSummary>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots saved for `run_id`, oldest first.
    pub fn snapshots(&self, run_id: &str) -> Vec<RunSummary> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).cloned().unwrap_or_default()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = runs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ResultStore for MemoryResultStore {
    fn save_run(&self, run_id: &str, summary: &RunSummary) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.entry(run_id.to_string())
            .or_default()
            .push(summary.clone());
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> StoreResult<RunSummary> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id)
            .and_then(|snapshots| snapshots.last().cloned())
            .ok_or_else(|| StoreError::NotFound {
                run_id: run_id.to_string(),
            })
    }
}
