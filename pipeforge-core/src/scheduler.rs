//! Sequential execution of a [`PipelineGraph`] with per-run memoization.

use crate::artifact::RunLogger;
use crate::error::{PipelineError, Result};
use crate::graph::PipelineGraph;
use crate::node::{NodeCall, NodeInputs};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One actual invocation of a node's callable.
#[derive(Debug, Clone)]
pub struct NodeInvocation {
    pub name: String,
    /// Index of the node in the graph's execution order.
    pub position: usize,
    pub elapsed: Duration,
}

/// Results of a single run. Exclusive to that run.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    results: HashMap<String, Value>,
    invocations: Vec<NodeInvocation>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            results: HashMap::new(),
            invocations: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.results.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.results.contains_key(name)
    }

    /// Number of resolved nodes.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Seed a result so the node is treated as already resolved.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.results.insert(name.into(), value);
    }

    pub fn invocations(&self) -> &[NodeInvocation] {
        &self.invocations
    }

    /// How many times `name`'s callable ran in this context.
    pub fn invocation_count(&self, name: &str) -> usize {
        self.invocations.iter().filter(|i| i.name == name).count()
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.invocations.clear();
    }
}

/// Runs graphs node by node in their precomputed order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler;

impl Scheduler {
    pub fn run(graph: &PipelineGraph, ctx: &mut ExecutionContext) -> Result<Value> {
        Self::run_with_logger(graph, ctx, None)
    }

    /// Run `graph` and return the terminal node's value. Every callable
    /// receives `logger`, if one is given.
    ///
    /// Nodes already present in `ctx` are skipped. The first failure aborts
    /// the run; nodes after it do not execute. A panicking callable counts as
    /// a failure of that node.
    pub fn run_with_logger(
        graph: &PipelineGraph,
        ctx: &mut ExecutionContext,
        logger: Option<RunLogger<'_>>,
    ) -> Result<Value> {
        let run_id = ctx.run_id;
        for (position, node) in graph.order().iter().enumerate() {
            if ctx.results.contains_key(&node.name) {
                tracing::debug!(%run_id, node = %node.name, "Node already resolved, skipping");
                continue;
            }

            let mut parent_values = Vec::with_capacity(node.parents.len());
            for parent in &node.parents {
                let value = ctx
                    .results
                    .get(parent)
                    .ok_or_else(|| PipelineError::UnknownNode {
                        name: parent.clone(),
                        referenced_by: Some(node.name.clone()),
                    })?;
                parent_values.push(value);
            }
            let inputs = match parent_values.len() {
                0 => NodeInputs::Empty,
                1 => NodeInputs::Single(parent_values[0]),
                _ => NodeInputs::Many(parent_values),
            };

            let call = NodeCall::new(&node.name, inputs, &node.args).with_logger(logger);
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.callable().call(call)))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("node panicked: {}", panic_message(payload.as_ref())))
                });
            let elapsed = started.elapsed();

            match outcome {
                Ok(value) => {
                    tracing::info!(
                        %run_id,
                        node = %node.name,
                        position,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Node completed"
                    );
                    ctx.results.insert(node.name.clone(), value);
                    ctx.invocations.push(NodeInvocation {
                        name: node.name.clone(),
                        position,
                        elapsed,
                    });
                }
                Err(source) => {
                    tracing::warn!(
                        %run_id,
                        node = %node.name,
                        position,
                        error = %source,
                        "Node failed"
                    );
                    let chain = graph.order()[..=position]
                        .iter()
                        .map(|n| n.name.clone())
                        .collect();
                    return Err(PipelineError::NodeExecution {
                        node: node.name.clone(),
                        position,
                        chain,
                        source,
                    });
                }
            }
        }

        let terminal = graph.terminal();
        ctx.results
            .get(&terminal.name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownNode {
                name: terminal.name.clone(),
                referenced_by: None,
            })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
