//! The `Pipeline` facade: declare nodes, then materialize sinks into
//! versioned artifacts.

use crate::artifact::{
    Artifact, ArtifactKind, ArtifactLabel, ArtifactRef, ArtifactStore, ArtifactVersioner,
    InMemoryArtifactStore, MetricSet, ParamSet, RunLogger,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::{GraphBuilder, PipelineGraph};
use crate::node::{Node, NodeDecl};
use crate::registry::NodeRegistry;
use crate::scheduler::{ExecutionContext, Scheduler};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Result of materializing a sink.
#[derive(Debug)]
pub struct RunOutcome {
    pub artifact: Artifact,
    pub context: ExecutionContext,
}

impl RunOutcome {
    pub fn reference(&self) -> &ArtifactRef {
        self.artifact.reference()
    }
}

/// A node registry plus the versioner its sinks commit through.
///
/// Cloning is cheap; clones share declarations and version state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<NodeRegistry>,
    versioner: Arc<ArtifactVersioner>,
}

impl Pipeline {
    /// Build a pipeline with the store described by `config`.
    pub fn new(config: &PipelineConfig, workspace: Option<&Path>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_store(
            config.build_store(workspace),
            config.default_branch.clone(),
        ))
    }

    pub fn with_store(store: Arc<dyn ArtifactStore>, default_branch: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(NodeRegistry::new()),
            versioner: Arc::new(ArtifactVersioner::new(store).with_default_branch(default_branch)),
        }
    }

    /// A pipeline whose artifacts live only in process memory.
    pub fn in_memory() -> Self {
        let config = PipelineConfig::default();
        Self::with_store(Arc::new(InMemoryArtifactStore::new()), config.default_branch)
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn versioner(&self) -> &Arc<ArtifactVersioner> {
        &self.versioner
    }

    pub fn default_branch(&self) -> &str {
        self.versioner.default_branch()
    }

    pub fn register(&self, decl: NodeDecl) -> Result<Arc<Node>> {
        self.registry.register(decl)
    }

    /// Drop every declaration. Committed artifacts are kept.
    pub fn reset(&self) {
        self.registry.reset();
    }

    /// Build the dependency graph of `terminal` without running anything.
    pub fn graph(&self, terminal: &str) -> Result<PipelineGraph> {
        GraphBuilder::new(&self.registry).build(terminal)
    }

    /// Compute `node` in a fresh context. Nothing is committed, even when
    /// `node` is a sink.
    pub fn run(&self, node: &str) -> Result<Value> {
        self.run_in(node, &mut ExecutionContext::new())
    }

    /// Compute `node`, reusing whatever `ctx` already resolved.
    pub fn run_in(&self, node: &str, ctx: &mut ExecutionContext) -> Result<Value> {
        let graph = self.graph(node)?;
        Scheduler::run(&graph, ctx)
    }

    /// Run a sink's graph and commit its output as the next version of the
    /// sink's label.
    pub fn materialize(&self, terminal: &str) -> Result<RunOutcome> {
        self.materialize_in(terminal, ExecutionContext::new())
    }

    pub fn materialize_in(&self, terminal: &str, mut ctx: ExecutionContext) -> Result<RunOutcome> {
        let graph = self.graph(terminal)?;
        let node = Arc::clone(graph.terminal());
        let (sink, kind) = match (&node.sink, ArtifactKind::for_node(node.kind)) {
            (Some(sink), Some(kind)) => (sink, kind),
            _ => {
                return Err(PipelineError::NotATerminal {
                    node: node.name.clone(),
                });
            }
        };

        let branch = sink.label.branch_or(self.versioner.default_branch());
        let reference = self.versioner.begin(&sink.label.name, branch, kind)?;
        tracing::info!(
            run_id = %ctx.run_id(),
            terminal = %node.name,
            artifact = %reference,
            nodes = graph.len(),
            "Materializing artifact"
        );

        let logger = RunLogger::new(&self.versioner, &reference);
        let payload = match Scheduler::run_with_logger(&graph, &mut ctx, Some(logger)) {
            Ok(payload) => payload,
            Err(e) => {
                self.versioner.abandon(&reference);
                tracing::warn!(
                    run_id = %ctx.run_id(),
                    artifact = %reference,
                    error = %e,
                    "Run aborted, nothing committed"
                );
                return Err(e);
            }
        };

        let lineage = graph.order_names().into_iter().map(str::to_string).collect();
        let artifact = self.versioner.finalize(
            &reference,
            payload,
            sink.persist,
            lineage,
            Some(ctx.run_id()),
        )?;
        Ok(RunOutcome {
            artifact,
            context: ctx,
        })
    }

    /// Attach metrics and params to the most recently begun pending artifact.
    pub fn log(&self, metrics: MetricSet, params: ParamSet) -> Result<ArtifactRef> {
        self.versioner.log(metrics, params)
    }

    /// Fetch an artifact by `name[:branch[:version]]`.
    pub fn get(&self, label: &str) -> Result<Artifact> {
        let label: ArtifactLabel = label.parse()?;
        self.versioner.get(&label)
    }
}
