//! # Pipeforge Core
//!
//! Dependency-graph execution engine for data and model pipelines.
//! Nodes (loaders, transformers, dataset and model sinks) are declared with
//! explicit parents; materializing a sink resolves its ancestors into a DAG,
//! runs them in a deterministic order with per-run memoization, and commits
//! the result as an immutable artifact addressed by `name:branch:version`.
//!
//! ```ignore
//! let pipeline = Pipeline::in_memory();
//! pipeline.register(NodeDecl::loader("load", |_| Ok(json!([1, 2, 3]))))?;
//! pipeline.register(NodeDecl::dataset("numbers", "numbers:dev", |call| {
//!     Ok(call.inputs.single().cloned().unwrap_or_default())
//! }).parent("load"))?;
//! let outcome = pipeline.materialize("numbers")?;
//! assert_eq!(outcome.reference().to_string(), "numbers:dev:1");
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod persistence;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types at the crate root.
pub use artifact::{
    Artifact, ArtifactKind, ArtifactLabel, ArtifactRef, ArtifactStore, ArtifactVersioner,
    CommitOptions, CommitResult, InMemoryArtifactStore, LocalArtifactStore, MetricSet,
    MetricValue, ParamSet, ParamValue,
};
pub use config::{PipelineConfig, StoreBackend, StoreConfig, load_config};
pub use error::{PipelineError, Result};
pub use graph::{GraphBuilder, PipelineGraph};
pub use node::{Node, NodeArgs, NodeCall, NodeDecl, NodeFn, NodeInputs, NodeKind};
pub use pipeline::{Pipeline, RunOutcome};
pub use registry::NodeRegistry;
pub use scheduler::{ExecutionContext, NodeInvocation, Scheduler};
