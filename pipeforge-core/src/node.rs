//! Node declarations: the data records that stand in for decorated pipeline
//! steps.
//!
//! A node is a name, a kind, an ordered list of parent names, static keyword
//! arguments and an opaque callable. The engine never looks inside the
//! callable; it only assembles its inputs and stores its output.

use crate::artifact::{ArtifactLabel, MetricSet, MetricValue, ParamSet, ParamValue, RunLogger};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Static keyword arguments passed unchanged on every invocation.
pub type NodeArgs = BTreeMap<String, Value>;

/// The four declaration forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Loader,
    Transformer,
    DatasetSink,
    ModelSink,
}

impl NodeKind {
    /// Whether materializing this node produces an artifact.
    pub fn is_sink(&self) -> bool {
        matches!(self, NodeKind::DatasetSink | NodeKind::ModelSink)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Loader => write!(f, "loader"),
            NodeKind::Transformer => write!(f, "transformer"),
            NodeKind::DatasetSink => write!(f, "dataset_sink"),
            NodeKind::ModelSink => write!(f, "model_sink"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loader" => Ok(NodeKind::Loader),
            "transformer" => Ok(NodeKind::Transformer),
            "dataset" | "dataset_sink" => Ok(NodeKind::DatasetSink),
            "model" | "model_sink" => Ok(NodeKind::ModelSink),
            _ => Err(PipelineError::InvalidKind {
                kind: s.to_string(),
            }),
        }
    }
}

/// Upstream values handed to a node, borrowed from the run's results.
#[derive(Debug, Clone)]
pub enum NodeInputs<'a> {
    /// Node has no parents.
    Empty,
    /// Node has exactly one parent.
    Single(&'a Value),
    /// Node has several parents; values follow declaration order.
    Many(Vec<&'a Value>),
}

impl<'a> NodeInputs<'a> {
    pub fn len(&self) -> usize {
        match self {
            NodeInputs::Empty => 0,
            NodeInputs::Single(_) => 1,
            NodeInputs::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The only input, when the node has exactly one parent.
    pub fn single(&self) -> Option<&'a Value> {
        match self {
            NodeInputs::Single(value) => Some(*value),
            _ => None,
        }
    }

    /// Input at `index` in declaration order.
    pub fn get(&self, index: usize) -> Option<&'a Value> {
        match self {
            NodeInputs::Empty => None,
            NodeInputs::Single(value) => (index == 0).then_some(*value),
            NodeInputs::Many(values) => values.get(index).copied(),
        }
    }

    /// All inputs in declaration order.
    pub fn to_vec(&self) -> Vec<&'a Value> {
        match self {
            NodeInputs::Empty => Vec::new(),
            NodeInputs::Single(value) => vec![*value],
            NodeInputs::Many(values) => values.clone(),
        }
    }
}

/// Everything a node's callable receives for one invocation.
pub struct NodeCall<'a> {
    pub name: &'a str,
    pub inputs: NodeInputs<'a>,
    pub args: &'a NodeArgs,
    logger: Option<RunLogger<'a>>,
}

impl<'a> NodeCall<'a> {
    pub fn new(name: &'a str, inputs: NodeInputs<'a>, args: &'a NodeArgs) -> Self {
        Self {
            name,
            inputs,
            args,
            logger: None,
        }
    }

    pub(crate) fn with_logger(mut self, logger: Option<RunLogger<'a>>) -> Self {
        self.logger = logger;
        self
    }

    /// Look up a static argument.
    pub fn arg(&self, key: &str) -> Option<&'a Value> {
        self.args.get(key)
    }

    /// Attach metrics and params to the artifact this run is producing.
    pub fn log(&self, metrics: MetricSet, params: ParamSet) -> Result<()> {
        match &self.logger {
            Some(logger) => logger.attach(metrics, params),
            None => Err(PipelineError::artifact_not_found(format!(
                "no pending artifact for node '{}'",
                self.name
            ))),
        }
    }

    pub fn log_metric(&self, key: &str, value: impl Into<MetricValue>) -> Result<()> {
        let mut metrics = MetricSet::new();
        metrics.insert(key.to_string(), value.into());
        self.log(metrics, ParamSet::new())
    }

    pub fn log_param(&self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let mut params = ParamSet::new();
        params.insert(key.to_string(), value.into());
        self.log(MetricSet::new(), params)
    }
}

/// Capability interface for user logic: take the assembled inputs plus
/// static arguments, return one value.
pub trait NodeFn: Send + Sync {
    fn call(&self, call: NodeCall<'_>) -> anyhow::Result<Value>;
}

impl<F> NodeFn for F
where
    F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, call: NodeCall<'_>) -> anyhow::Result<Value> {
        self(call)
    }
}

/// Label and persistence settings of a dataset or model sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSpec {
    pub label: ArtifactLabel,
    pub persist: bool,
}

/// A registered node.
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub parents: Vec<String>,
    pub args: NodeArgs,
    pub sink: Option<SinkSpec>,
    /// Position in registration order.
    pub seq: usize,
    callable: Arc<dyn NodeFn>,
}

impl Node {
    pub fn callable(&self) -> &dyn NodeFn {
        self.callable.as_ref()
    }

    pub fn is_sink(&self) -> bool {
        self.kind.is_sink()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parents", &self.parents)
            .field("args", &self.args)
            .field("sink", &self.sink)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Builder for a node declaration.
///
/// ```ignore
/// let decl = NodeDecl::transformer("resize", |call| {
///     let images = call.inputs.single().cloned().unwrap_or_default();
///     Ok(resize(images, call.arg("width")))
/// })
/// .parent("load_images")
/// .arg("width", json!(64));
/// ```
pub struct NodeDecl {
    name: String,
    kind: NodeKind,
    parents: Vec<String>,
    args: NodeArgs,
    label: Option<String>,
    persist: bool,
    callable: Arc<dyn NodeFn>,
}

impl NodeDecl {
    /// Declare a node from an already shared callable.
    pub fn from_callable(name: impl Into<String>, kind: NodeKind, callable: Arc<dyn NodeFn>) -> Self {
        Self {
            name: name.into(),
            kind,
            parents: Vec::new(),
            args: NodeArgs::new(),
            label: None,
            persist: true,
            callable,
        }
    }

    pub fn new<F>(name: impl Into<String>, kind: NodeKind, f: F) -> Self
    where
        F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_callable(name, kind, Arc::new(f))
    }

    pub fn loader<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, NodeKind::Loader, f)
    }

    pub fn transformer<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, NodeKind::Transformer, f)
    }

    /// Declare a dataset sink. `label` is `name` or `name:branch`.
    pub fn dataset<F>(name: impl Into<String>, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, NodeKind::DatasetSink, f).label(label)
    }

    /// Declare a model sink. `label` is `name` or `name:branch`.
    pub fn model<F>(name: impl Into<String>, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeCall<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, NodeKind::ModelSink, f).label(label)
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents.extend(parents.into_iter().map(Into::into));
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn args(mut self, args: NodeArgs) -> Self {
        self.args.extend(args);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether a dataset sink hands its artifact to the store (default) or
    /// keeps it in process memory only.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Check the declaration's shape and turn it into a [`Node`].
    pub(crate) fn into_node(self, seq: usize) -> Result<Node> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(PipelineError::invalid_declaration(&self.name, "name is empty"));
        }
        if name.contains(':') {
            return Err(PipelineError::invalid_declaration(
                &name,
                "name must not contain ':'",
            ));
        }

        let mut seen = HashSet::new();
        for parent in &self.parents {
            if !seen.insert(parent.as_str()) {
                return Err(PipelineError::invalid_declaration(
                    &name,
                    format!("parent '{parent}' is listed more than once"),
                ));
            }
        }

        match self.kind {
            NodeKind::Loader if !self.parents.is_empty() => {
                return Err(PipelineError::invalid_declaration(
                    &name,
                    "a loader cannot declare parents",
                ));
            }
            NodeKind::DatasetSink if self.parents.len() > 1 => {
                return Err(PipelineError::invalid_declaration(
                    &name,
                    "a dataset sink takes at most one parent",
                ));
            }
            NodeKind::ModelSink if !self.persist => {
                return Err(PipelineError::invalid_declaration(
                    &name,
                    "model artifacts are always persisted",
                ));
            }
            _ => {}
        }

        let sink = if self.kind.is_sink() {
            let raw = self.label.ok_or_else(|| {
                PipelineError::invalid_declaration(&name, "a sink requires an artifact label")
            })?;
            let label: ArtifactLabel = raw.parse()?;
            if label.version.is_some() {
                return Err(PipelineError::invalid_declaration(
                    &name,
                    format!("sink label '{raw}' must not pin a version"),
                ));
            }
            Some(SinkSpec {
                label,
                persist: self.persist,
            })
        } else {
            None
        };

        Ok(Node {
            name,
            kind: self.kind,
            parents: self.parents,
            args: self.args,
            sink,
            seq,
            callable: self.callable,
        })
    }
}
