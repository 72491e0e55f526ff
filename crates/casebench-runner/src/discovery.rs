//! Discovery: walk eval manifests, resolve them against the registry, apply
//! file defaults and filters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use casebench_core::{obs, EvalFunction, EvalRegistry};

use crate::error::{DiscoveryError, ManifestError};
use crate::manifest::EvalManifest;

const SKIPPED_DIRS: [&str; 2] = ["__pycache__", "target"];

/// Selection applied after discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Comma-separated alternatives.
    pub dataset: Option<String>,
    /// Any-of.
    pub labels: Vec<String>,
    /// Exact name, or the base name of a parametrized family.
    pub function_name: Option<String>,
}

impl DiscoveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn matches(&self, func: &EvalFunction) -> bool {
        if let Some(datasets) = &self.dataset {
            let dataset = func.dataset();
            if !datasets.split(',').map(str::trim).any(|d| d == dataset) {
                return false;
            }
        }
        if !self.labels.is_empty() && !func.labels().iter().any(|l| self.labels.contains(l)) {
            return false;
        }
        if let Some(name) = &self.function_name {
            let family = format!("{name}[");
            if func.name() != name && !func.name().starts_with(&family) {
                return false;
            }
        }
        true
    }
}

/// Discover functions from a manifest file or a directory of manifests.
pub fn discover(
    registry: &EvalRegistry,
    path: &Path,
    filter: &DiscoveryFilter,
) -> Result<Vec<EvalFunction>, DiscoveryError> {
    if !path.exists() {
        return Err(DiscoveryError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    let manifests = if path.is_dir() {
        let mut found = Vec::new();
        walk(path, &mut found)?;
        found
    } else if is_manifest(path) {
        vec![path.to_path_buf()]
    } else {
        return Err(DiscoveryError::PathKind {
            path: path.to_path_buf(),
        });
    };

    let mut functions = Vec::new();
    for manifest_path in &manifests {
        match load_manifest(registry, manifest_path) {
            Ok(found) => functions.extend(found),
            Err(e) => obs::emit_manifest_skipped(manifest_path, &e),
        }
    }
    functions.retain(|f| filter.matches(f));

    tracing::debug!(
        path = %path.display(),
        manifests = manifests.len(),
        functions = functions.len(),
        "discovery complete"
    );
    Ok(functions)
}

fn load_manifest(
    registry: &EvalRegistry,
    path: &Path,
) -> Result<Vec<EvalFunction>, ManifestError> {
    let manifest = EvalManifest::load(path)?;
    let entries = registry.module(&manifest.module);
    if entries.is_empty() {
        return Err(ManifestError::UnknownModule {
            module: manifest.module,
        });
    }

    let stem = manifest.stem();
    let mut functions = Vec::new();
    for mut entry in entries {
        let base = entry.base_mut();
        manifest.apply_defaults(base, registry);
        if base.config().dataset.is_none() {
            base.config_mut().dataset = Some(stem.clone());
        }
        functions.extend(entry.into_functions());
    }
    Ok(functions)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), DiscoveryError> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
                continue;
            }
            walk(&path, found)?;
        } else if is_manifest(&path) && !name.starts_with('_') {
            found.push(path);
        }
    }
    Ok(())
}

fn is_manifest(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

/// Distinct datasets, sorted.
pub fn unique_datasets(functions: &[EvalFunction]) -> Vec<String> {
    functions
        .iter()
        .map(EvalFunction::dataset)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct labels, sorted.
pub fn unique_labels(functions: &[EvalFunction]) -> Vec<String> {
    functions
        .iter()
        .flat_map(|f| f.labels().iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebench_core::CaseReturn;

    fn noop(name: &str) -> EvalFunction {
        EvalFunction::with_context(name, |_ctx, _args| Ok(CaseReturn::Auto))
    }

    #[test]
    fn test_filter_dataset_alternatives() {
        let filter = DiscoveryFilter::new().with_dataset("qa, math");
        assert!(filter.matches(&noop("a").with_dataset("math")));
        assert!(!filter.matches(&noop("b").with_dataset("geo")));
    }

    #[test]
    fn test_filter_labels_any_of() {
        let filter = DiscoveryFilter::new().with_labels(["prod", "nightly"]);
        assert!(filter.matches(&noop("a").with_labels(["nightly"])));
        assert!(!filter.matches(&noop("b").with_labels(["dev"])));
        assert!(!filter.matches(&noop("c")));
    }

    #[test]
    fn test_filter_name_matches_family() {
        let filter = DiscoveryFilter::new().with_function_name("grid");
        assert!(filter.matches(&noop("grid")));
        assert!(filter.matches(&noop("grid[0]")));
        assert!(!filter.matches(&noop("grid_other")));
    }

    #[test]
    fn test_unique_helpers_sorted() {
        let functions = vec![
            noop("a").with_dataset("z").with_labels(["b", "a"]),
            noop("b").with_dataset("m").with_labels(["a"]),
            noop("c").with_dataset("z"),
        ];
        assert_eq!(unique_datasets(&functions), vec!["m", "z"]);
        assert_eq!(unique_labels(&functions), vec!["a", "b"]);
    }
}
