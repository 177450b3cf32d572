//! The immutable artifact record.

use crate::artifact::{ArtifactRef, MetricSet, ParamSet};
use crate::node::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dataset,
    Model,
}

impl ArtifactKind {
    /// Artifact kind produced by a sink node, if `kind` is a sink.
    pub fn for_node(kind: NodeKind) -> Option<Self> {
        match kind {
            NodeKind::DatasetSink => Some(ArtifactKind::Dataset),
            NodeKind::ModelSink => Some(ArtifactKind::Model),
            NodeKind::Loader | NodeKind::Transformer => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Dataset => write!(f, "dataset"),
            ArtifactKind::Model => write!(f, "model"),
        }
    }
}

/// A committed, versioned dataset or model.
///
/// Fields are read-only from outside the crate; a new run produces a new
/// version rather than touching an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    reference: ArtifactRef,
    kind: ArtifactKind,
    payload: Value,
    content_hash: String,
    #[serde(default, skip_serializing_if = "MetricSet::is_empty")]
    metrics: MetricSet,
    #[serde(default, skip_serializing_if = "ParamSet::is_empty")]
    params: ParamSet,
    #[serde(default)]
    lineage: Vec<String>,
    run_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl Artifact {
    pub(crate) fn new(
        reference: ArtifactRef,
        kind: ArtifactKind,
        payload: Value,
        metrics: MetricSet,
        params: ParamSet,
        lineage: Vec<String>,
        run_id: Option<Uuid>,
    ) -> Self {
        let content_hash = hash_payload(&payload);
        Self {
            reference,
            kind,
            payload,
            content_hash,
            metrics,
            params,
            lineage,
            run_id,
            created_at: Utc::now(),
        }
    }

    pub fn reference(&self) -> &ArtifactRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn branch(&self) -> &str {
        &self.reference.branch
    }

    pub fn version(&self) -> u32 {
        self.reference.version
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Node names, in execution order, of the run that produced this artifact.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the stored payload still matches its recorded hash.
    pub fn verify_integrity(&self) -> bool {
        hash_payload(&self.payload) == self.content_hash
    }
}

/// SHA-256 of the payload's JSON serialization.
pub fn hash_payload(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Artifact {
        Artifact::new(
            ArtifactRef::new("flavia", "dev", 1),
            ArtifactKind::Dataset,
            json!({"rows": [[0.1, 0.2]]}),
            MetricSet::new(),
            ParamSet::new(),
            vec!["load".into(), "resize".into()],
            Some(Uuid::new_v4()),
        )
    }

    #[test]
    fn test_hash_is_stable() {
        let a = hash_payload(&json!({"b": 1, "a": 2}));
        let b = hash_payload(&json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_artifact_roundtrip_keeps_integrity() {
        let artifact = sample();
        assert!(artifact.verify_integrity());
        let json = serde_json::to_string(&artifact).unwrap();
        let restored: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, artifact);
        assert!(restored.verify_integrity());
        assert_eq!(restored.lineage(), ["load", "resize"]);
    }

    #[test]
    fn test_kind_for_node() {
        assert_eq!(
            ArtifactKind::for_node(NodeKind::ModelSink),
            Some(ArtifactKind::Model)
        );
        assert_eq!(ArtifactKind::for_node(NodeKind::Loader), None);
    }
}
