//! Persistence contract for run summaries.
//!
//! A store keeps whole [`RunSummary`] snapshots keyed by run id. Live runs
//! save the same id repeatedly; each save replaces the previous snapshot in
//! full, never partially.

use casebench_core::RunSummary;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Backend-agnostic run summary storage.
pub trait ResultStore: Send + Sync {
    /// Persist `summary` as the current snapshot of `run_id`.
    fn save_run(&self, run_id: &str, summary: &RunSummary) -> StoreResult<()>;

    /// Load the latest snapshot of `run_id`.
    fn load_run(&self, run_id: &str) -> StoreResult<RunSummary>;

    /// Fresh, sortable run id.
    fn generate_run_id(&self) -> String {
        generate_run_id()
    }
}

/// UTC timestamp plus a short random suffix, e.g.
/// `2026-10-15T09-30-00Z-1a2b3c4d`.
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y-%m-%dT%H-%M-%SZ"), &suffix[..8])
}

pub(crate) fn validate_run_id(run_id: &str) -> StoreResult<()> {
    let bad = run_id.is_empty()
        || run_id == "."
        || run_id == ".."
        || run_id.contains(['/', '\\']);
    if bad {
        return Err(StoreError::InvalidRunId {
            run_id: run_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_timestamped() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), "2026-10-15T09-30-00Z".len() + 9);
        assert!(a.contains('T'));
        validate_run_id(&a).unwrap();
    }

    #[test]
    fn test_validate_run_id_rejects_paths() {
        for bad in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                validate_run_id(bad),
                Err(StoreError::InvalidRunId { .. })
            ));
        }
    }
}
