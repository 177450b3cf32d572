//! Versioned, immutable artifacts and the machinery that commits them.
//!
//! - `label`: `name:branch[:version]` parsing and resolved references
//! - `model`: the [`Artifact`] record and payload hashing
//! - `metrics`: metric/param values and the per-run logging handle
//! - `store`: the persistence contract plus in-memory and local stores
//! - `versioner`: version assignment and two-phase commits

pub mod label;
pub mod metrics;
pub mod model;
pub mod store;
pub mod versioner;

pub use label::{ArtifactLabel, ArtifactRef};
pub use metrics::{
    MetricSet, MetricValue, ParamSet, ParamValue, RunLogger, append_metrics, merge_params,
};
pub use model::{Artifact, ArtifactKind, hash_payload};
pub use store::{ArtifactStore, CommitResult, InMemoryArtifactStore, LocalArtifactStore};
pub use versioner::{ArtifactVersioner, CommitOptions, DEFAULT_BRANCH};
