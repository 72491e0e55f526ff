//! Filesystem store writing one pretty-printed JSON file per run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use casebench_core::RunSummary;
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};
use crate::storage_traits::{validate_run_id, ResultStore};

/// Layout: `<root>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }

    /// Stored run ids, sorted (oldest first for generated ids).
    pub fn list_runs(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    ids.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ResultStore for JsonFileStore {
    fn save_run(&self, run_id: &str, summary: &RunSummary) -> StoreResult<()> {
        validate_run_id(run_id)?;
        write_summary_json(self.run_path(run_id), summary)?;
        tracing::debug!(run_id = %run_id, results = summary.results.len(), "saved run snapshot");
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> StoreResult<RunSummary> {
        validate_run_id(run_id)?;
        let bytes = fs::read(self.run_path(run_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    run_id: run_id.to_string(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write `summary` to `path` atomically, creating parent directories.
pub fn write_summary_json(path: impl AsRef<Path>, summary: &RunSummary) -> StoreResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    // Temp file in the same directory, then rename over the target.
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, summary)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
