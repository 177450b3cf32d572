//! Persistence collaborators for committed artifacts.
//!
//! The engine only needs a narrow contract: the highest committed version for
//! a `name:branch`, and a commit that either lands or reports a conflict.
//! Two implementations ship with the crate: an in-memory store for tests and
//! embedded use, and a local filesystem store laid out as
//! `<root>/<name>/<branch>/v<version>.json`.

use crate::artifact::{Artifact, ArtifactRef};
use crate::error::{PipelineError, Result};
use crate::persistence;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Outcome of handing an artifact to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed,
    /// The version was already taken by another writer.
    Conflict,
}

/// Contract between the versioner and wherever artifacts are kept.
pub trait ArtifactStore: Send + Sync {
    /// Highest committed version for `name:branch`, if any.
    fn latest_version(&self, name: &str, branch: &str) -> Result<Option<u32>>;

    /// Store `artifact` under its reference. Must never overwrite.
    fn commit(&self, artifact: &Artifact) -> Result<CommitResult>;

    fn load(&self, reference: &ArtifactRef) -> Result<Option<Artifact>>;

    /// Committed versions for `name:branch`, ascending.
    fn versions(&self, name: &str, branch: &str) -> Result<Vec<u32>>;

    /// All `(name, branch)` pairs with at least one committed version.
    fn labels(&self) -> Result<Vec<(String, String)>>;
}

type BranchKey = (String, String);

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: Mutex<BTreeMap<BranchKey, BTreeMap<u32, Artifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn latest_version(&self, name: &str, branch: &str) -> Result<Option<u32>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts
            .get(&(name.to_string(), branch.to_string()))
            .and_then(|versions| versions.keys().next_back().copied()))
    }

    fn commit(&self, artifact: &Artifact) -> Result<CommitResult> {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        let versions = artifacts
            .entry((artifact.name().to_string(), artifact.branch().to_string()))
            .or_default();
        if versions.contains_key(&artifact.version()) {
            return Ok(CommitResult::Conflict);
        }
        versions.insert(artifact.version(), artifact.clone());
        Ok(CommitResult::Committed)
    }

    fn load(&self, reference: &ArtifactRef) -> Result<Option<Artifact>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts
            .get(&(reference.name.clone(), reference.branch.clone()))
            .and_then(|versions| versions.get(&reference.version))
            .cloned())
    }

    fn versions(&self, name: &str, branch: &str) -> Result<Vec<u32>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts
            .get(&(name.to_string(), branch.to_string()))
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    fn labels(&self) -> Result<Vec<(String, String)>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Store backed by JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn branch_dir(&self, name: &str, branch: &str) -> PathBuf {
        self.root.join(name).join(branch)
    }

    fn artifact_path(&self, reference: &ArtifactRef) -> PathBuf {
        self.branch_dir(&reference.name, &reference.branch)
            .join(format!("v{}.json", reference.version))
    }

    fn store_error(path: &Path, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::Store {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn parse_version_file(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix('v')?
        .strip_suffix(".json")?
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
}

fn subdirectories(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

impl ArtifactStore for LocalArtifactStore {
    fn latest_version(&self, name: &str, branch: &str) -> Result<Option<u32>> {
        Ok(self.versions(name, branch)?.last().copied())
    }

    fn commit(&self, artifact: &Artifact) -> Result<CommitResult> {
        let path = self.artifact_path(artifact.reference());
        let created = persistence::create_new_json(&path, artifact)
            .map_err(|e| Self::store_error(&path, e))?;
        if created {
            tracing::debug!(path = %path.display(), "Wrote artifact");
            Ok(CommitResult::Committed)
        } else {
            Ok(CommitResult::Conflict)
        }
    }

    fn load(&self, reference: &ArtifactRef) -> Result<Option<Artifact>> {
        let path = self.artifact_path(reference);
        persistence::load_json(&path).map_err(|e| Self::store_error(&path, e))
    }

    fn versions(&self, name: &str, branch: &str) -> Result<Vec<u32>> {
        let dir = self.branch_dir(name, branch);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| Self::store_error(&dir, e))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::store_error(&dir, e))?;
            if let Some(version) = entry.file_name().to_str().and_then(parse_version_file) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn labels(&self) -> Result<Vec<(String, String)>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut labels = Vec::new();
        let names = subdirectories(&self.root).map_err(|e| Self::store_error(&self.root, e))?;
        for name in names {
            let name_dir = self.root.join(&name);
            let branches = subdirectories(&name_dir).map_err(|e| Self::store_error(&name_dir, e))?;
            for branch in branches {
                if !self.versions(&name, &branch)?.is_empty() {
                    labels.push((name.clone(), branch));
                }
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactKind, MetricSet, ParamSet};
    use serde_json::json;
    use tempfile::TempDir;

    fn artifact(name: &str, branch: &str, version: u32) -> Artifact {
        Artifact::new(
            ArtifactRef::new(name, branch, version),
            ArtifactKind::Dataset,
            json!({"version": version}),
            MetricSet::new(),
            ParamSet::new(),
            Vec::new(),
            None,
        )
    }

    fn exercise_store(store: &dyn ArtifactStore) {
        assert_eq!(store.latest_version("ds", "dev").unwrap(), None);

        assert_eq!(
            store.commit(&artifact("ds", "dev", 1)).unwrap(),
            CommitResult::Committed
        );
        assert_eq!(
            store.commit(&artifact("ds", "dev", 2)).unwrap(),
            CommitResult::Committed
        );
        assert_eq!(
            store.commit(&artifact("ds", "prod", 1)).unwrap(),
            CommitResult::Committed
        );
        assert_eq!(
            store.commit(&artifact("ds", "dev", 2)).unwrap(),
            CommitResult::Conflict
        );

        assert_eq!(store.latest_version("ds", "dev").unwrap(), Some(2));
        assert_eq!(store.versions("ds", "dev").unwrap(), vec![1, 2]);
        assert_eq!(
            store.labels().unwrap(),
            vec![
                ("ds".to_string(), "dev".to_string()),
                ("ds".to_string(), "prod".to_string())
            ]
        );

        let loaded = store
            .load(&ArtifactRef::new("ds", "dev", 2))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.payload(), &json!({"version": 2}));
        assert!(
            store
                .load(&ArtifactRef::new("ds", "dev", 9))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_in_memory_store_contract() {
        exercise_store(&InMemoryArtifactStore::new());
    }

    #[test]
    fn test_local_store_contract() {
        let dir = TempDir::new().unwrap();
        exercise_store(&LocalArtifactStore::new(dir.path()));
        assert!(dir.path().join("ds").join("dev").join("v1.json").exists());
    }

    #[test]
    fn test_local_store_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.commit(&artifact("ds", "dev", 1)).unwrap();
        let branch_dir = dir.path().join("ds").join("dev");
        std::fs::write(branch_dir.join("notes.txt"), "hi").unwrap();
        std::fs::write(branch_dir.join("v0.json"), "{}").unwrap();
        assert_eq!(store.versions("ds", "dev").unwrap(), vec![1]);
    }

    #[test]
    fn test_parse_version_file() {
        assert_eq!(parse_version_file("v12.json"), Some(12));
        assert_eq!(parse_version_file("v0.json"), None);
        assert_eq!(parse_version_file("v1.tmp"), None);
        assert_eq!(parse_version_file("12.json"), None);
    }
}
