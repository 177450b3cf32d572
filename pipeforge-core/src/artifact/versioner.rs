//! Version assignment and artifact commits.
//!
//! Commits are two-phase. [`ArtifactVersioner::begin`] reserves the next
//! version for a `name:branch` and opens a pending commit that metrics and
//! params can be attached to; [`ArtifactVersioner::finalize`] builds the
//! immutable [`Artifact`] and hands it to the store (or keeps it in process
//! memory). A failed run calls [`ArtifactVersioner::abandon`] instead.

use crate::artifact::{
    Artifact, ArtifactKind, ArtifactLabel, ArtifactRef, ArtifactStore, CommitResult, MetricSet,
    ParamSet, append_metrics, merge_params,
};
use crate::error::{PipelineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Branch used when a label does not name one.
pub const DEFAULT_BRANCH: &str = "dev";

type BranchKey = (String, String);

#[derive(Debug)]
struct PendingCommit {
    kind: ArtifactKind,
    metrics: MetricSet,
    params: ParamSet,
}

#[derive(Debug, Default)]
struct VersionerState {
    /// Artifacts committed with `persist = false`.
    in_memory: BTreeMap<BranchKey, BTreeMap<u32, Artifact>>,
    pending: BTreeMap<ArtifactRef, PendingCommit>,
    /// Pending refs in the order they were begun.
    begun: Vec<ArtifactRef>,
}

impl VersionerState {
    fn highest_in_memory(&self, name: &str, branch: &str) -> Option<u32> {
        self.in_memory
            .get(&(name.to_string(), branch.to_string()))
            .and_then(|versions| versions.keys().next_back().copied())
    }

    fn highest_pending(&self, name: &str, branch: &str) -> Option<u32> {
        self.pending
            .keys()
            .filter(|r| r.name == name && r.branch == branch)
            .map(|r| r.version)
            .max()
    }

    fn take_pending(&mut self, reference: &ArtifactRef) -> Option<PendingCommit> {
        self.begun.retain(|r| r != reference);
        self.pending.remove(reference)
    }
}

fn require_persisted(name: &str, kind: ArtifactKind, persist: bool) -> Result<()> {
    if kind == ArtifactKind::Model && !persist {
        return Err(PipelineError::invalid_declaration(
            name,
            "model artifacts are always persisted",
        ));
    }
    Ok(())
}

/// Options for a one-shot [`ArtifactVersioner::commit`].
#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub kind: ArtifactKind,
    pub metrics: MetricSet,
    pub params: ParamSet,
    pub persist: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            kind: ArtifactKind::Dataset,
            metrics: MetricSet::new(),
            params: ParamSet::new(),
            persist: true,
        }
    }
}

/// Assigns versions and commits artifacts through an [`ArtifactStore`].
pub struct ArtifactVersioner {
    store: Arc<dyn ArtifactStore>,
    default_branch: String,
    state: Mutex<VersionerState>,
}

impl ArtifactVersioner {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            default_branch: DEFAULT_BRANCH.to_string(),
            state: Mutex::new(VersionerState::default()),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    fn state(&self) -> MutexGuard<'_, VersionerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next version of `name:branch` and open a pending commit.
    ///
    /// Versions are assigned here, at reservation time, so they follow the
    /// order in which runs begin. A slow run that began first still lands on
    /// the lower version even if a later run finalizes before it; "latest"
    /// means highest version, not most recently written.
    pub fn begin(&self, name: &str, branch: &str, kind: ArtifactKind) -> Result<ArtifactRef> {
        let label = format!("{name}:{branch}");
        let parsed: ArtifactLabel = label.parse()?;
        if parsed.branch.is_none() || parsed.version.is_some() {
            return Err(PipelineError::invalid_label(label, "expected name:branch"));
        }

        let mut state = self.state();
        let highest = [
            self.store.latest_version(name, branch)?,
            state.highest_in_memory(name, branch),
            state.highest_pending(name, branch),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);

        let reference = ArtifactRef::new(name, branch, highest + 1);
        state.pending.insert(
            reference.clone(),
            PendingCommit {
                kind,
                metrics: MetricSet::new(),
                params: ParamSet::new(),
            },
        );
        state.begun.push(reference.clone());
        tracing::debug!(artifact = %reference, kind = %kind, "Reserved artifact version");
        Ok(reference)
    }

    /// Attach metrics and params to a pending commit. Metric keys that were
    /// already logged accumulate into a sequence; params are last-write-wins.
    pub fn attach(&self, reference: &ArtifactRef, metrics: MetricSet, params: ParamSet) -> Result<()> {
        let mut state = self.state();
        let pending = state
            .pending
            .get_mut(reference)
            .ok_or_else(|| PipelineError::artifact_not_found(reference))?;
        append_metrics(&mut pending.metrics, metrics);
        merge_params(&mut pending.params, params);
        Ok(())
    }

    /// Attach to the most recently begun commit that is still pending.
    pub fn log(&self, metrics: MetricSet, params: ParamSet) -> Result<ArtifactRef> {
        let target = self
            .state()
            .begun
            .last()
            .cloned()
            .ok_or_else(|| PipelineError::artifact_not_found("no pending artifact"))?;
        self.attach(&target, metrics, params)?;
        Ok(target)
    }

    pub fn is_pending(&self, reference: &ArtifactRef) -> bool {
        self.state().pending.contains_key(reference)
    }

    /// Close a pending commit with its payload.
    ///
    /// A store conflict fails with [`PipelineError::VersionConflict`]; the
    /// reservation is dropped and no other version is tried.
    pub fn finalize(
        &self,
        reference: &ArtifactRef,
        payload: Value,
        persist: bool,
        lineage: Vec<String>,
        run_id: Option<Uuid>,
    ) -> Result<Artifact> {
        let mut state = self.state();
        let pending = state
            .take_pending(reference)
            .ok_or_else(|| PipelineError::artifact_not_found(reference))?;
        require_persisted(&reference.name, pending.kind, persist)?;

        let artifact = Artifact::new(
            reference.clone(),
            pending.kind,
            payload,
            pending.metrics,
            pending.params,
            lineage,
            run_id,
        );

        if persist {
            match self.store.commit(&artifact)? {
                CommitResult::Committed => {}
                CommitResult::Conflict => {
                    tracing::warn!(artifact = %reference, "Store rejected artifact version");
                    return Err(PipelineError::VersionConflict {
                        name: reference.name.clone(),
                        branch: reference.branch.clone(),
                        version: reference.version,
                    });
                }
            }
        } else {
            state
                .in_memory
                .entry((reference.name.clone(), reference.branch.clone()))
                .or_default()
                .insert(reference.version, artifact.clone());
        }

        tracing::info!(
            artifact = %reference,
            kind = %artifact.kind(),
            persisted = persist,
            hash = %artifact.content_hash(),
            "Committed artifact"
        );
        Ok(artifact)
    }

    /// Drop a pending commit without producing an artifact.
    pub fn abandon(&self, reference: &ArtifactRef) -> bool {
        let dropped = self.state().take_pending(reference).is_some();
        if dropped {
            tracing::debug!(artifact = %reference, "Abandoned pending artifact");
        }
        dropped
    }

    /// Commit a payload in one step: reserve, attach, finalize.
    pub fn commit(
        &self,
        name: &str,
        branch: &str,
        payload: Value,
        options: CommitOptions,
    ) -> Result<ArtifactRef> {
        require_persisted(name, options.kind, options.persist)?;
        let reference = self.begin(name, branch, options.kind)?;
        if let Err(e) = self.attach(&reference, options.metrics, options.params) {
            self.abandon(&reference);
            return Err(e);
        }
        let artifact = self.finalize(&reference, payload, options.persist, Vec::new(), None)?;
        Ok(artifact.reference().clone())
    }

    /// Look up an artifact. A label without a version resolves to the latest
    /// one; a label without a branch uses the default branch.
    pub fn get(&self, label: &ArtifactLabel) -> Result<Artifact> {
        let branch = label.branch_or(&self.default_branch);
        let version = match label.version {
            Some(version) => version,
            None => self
                .latest(&label.name, branch)?
                .ok_or_else(|| PipelineError::artifact_not_found(label))?,
        };
        let reference = ArtifactRef::new(&label.name, branch, version);

        let in_memory = self
            .state()
            .in_memory
            .get(&(reference.name.clone(), reference.branch.clone()))
            .and_then(|versions| versions.get(&version))
            .cloned();
        if let Some(artifact) = in_memory {
            return Ok(artifact);
        }
        self.store
            .load(&reference)?
            .ok_or_else(|| PipelineError::artifact_not_found(&reference))
    }

    /// Highest committed version of `name:branch`, in the store or in memory.
    pub fn latest(&self, name: &str, branch: &str) -> Result<Option<u32>> {
        let stored = self.store.latest_version(name, branch)?;
        let in_memory = self.state().highest_in_memory(name, branch);
        Ok(stored.max(in_memory))
    }

    /// Committed refs of `name:branch` in version order.
    pub fn list(&self, name: &str, branch: &str) -> Result<Vec<ArtifactRef>> {
        let mut versions = self.store.versions(name, branch)?;
        if let Some(in_memory) = self
            .state()
            .in_memory
            .get(&(name.to_string(), branch.to_string()))
        {
            versions.extend(in_memory.keys().copied());
        }
        versions.sort_unstable();
        versions.dedup();
        Ok(versions
            .into_iter()
            .map(|version| ArtifactRef::new(name, branch, version))
            .collect())
    }
}

impl std::fmt::Debug for ArtifactVersioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactVersioner")
            .field("default_branch", &self.default_branch)
            .finish_non_exhaustive()
    }
}
