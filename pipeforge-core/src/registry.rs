//! The node registry: every declared node, keyed by name.

use crate::error::{PipelineError, Result};
use crate::node::{Node, NodeDecl};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct RegistryInner {
    /// Nodes in registration order.
    nodes: Vec<Arc<Node>>,
    index: HashMap<String, usize>,
    next_seq: usize,
}

/// Explicit, shareable replacement for a process-wide set of decorated steps.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: RwLock<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store a declaration.
    ///
    /// Parents are not checked here; they only need to exist by the time a
    /// graph is built, so nodes may be declared in any order.
    pub fn register(&self, decl: NodeDecl) -> Result<Arc<Node>> {
        let mut inner = self.write();
        let node = Arc::new(decl.into_node(inner.next_seq)?);
        if inner.index.contains_key(&node.name) {
            return Err(PipelineError::DuplicateName {
                name: node.name.clone(),
            });
        }
        inner.next_seq += 1;
        let position = inner.nodes.len();
        inner.index.insert(node.name.clone(), position);
        inner.nodes.push(Arc::clone(&node));
        tracing::debug!(
            node = %node.name,
            kind = %node.kind,
            parents = ?node.parents,
            "Registered node"
        );
        Ok(node)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Node>> {
        let inner = self.read();
        inner
            .index
            .get(name)
            .map(|&i| Arc::clone(&inner.nodes[i]))
            .ok_or_else(|| PipelineError::UnknownNode {
                name: name.to_string(),
                referenced_by: None,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().index.contains_key(name)
    }

    /// Node names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every declaration.
    pub fn reset(&self) {
        let mut inner = self.write();
        *inner = RegistryInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeCall, NodeKind};
    use serde_json::Value;

    fn noop(_call: NodeCall<'_>) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = NodeRegistry::new();
        registry.register(NodeDecl::loader("load", noop)).unwrap();
        let node = registry
            .register(NodeDecl::transformer("resize", noop).parent("load"))
            .unwrap();
        assert_eq!(node.seq, 1);
        assert_eq!(registry.resolve("resize").unwrap().parents, vec!["load"]);
        assert_eq!(registry.names(), vec!["load", "resize"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = NodeRegistry::new();
        registry.register(NodeDecl::loader("load", noop)).unwrap();
        let err = registry
            .register(NodeDecl::new("load", NodeKind::Transformer, noop))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateName { name } if name == "load"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = NodeRegistry::new();
        let err = registry.resolve("ghost").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownNode { ref name, referenced_by: None } if name == "ghost"
        ));
    }

    #[test]
    fn test_parents_may_be_declared_later() {
        let registry = NodeRegistry::new();
        registry
            .register(NodeDecl::transformer("t", noop).parent("later"))
            .unwrap();
        registry.register(NodeDecl::loader("later", noop)).unwrap();
        assert!(registry.contains("later"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = NodeRegistry::new();
        registry.register(NodeDecl::loader("a", noop)).unwrap();
        registry.reset();
        assert!(registry.is_empty());
        let node = registry.register(NodeDecl::loader("a", noop)).unwrap();
        assert_eq!(node.seq, 0);
    }

    #[test]
    fn test_invalid_declaration_does_not_consume_sequence() {
        let registry = NodeRegistry::new();
        assert!(registry.register(NodeDecl::loader("", noop)).is_err());
        let node = registry.register(NodeDecl::loader("ok", noop)).unwrap();
        assert_eq!(node.seq, 0);
    }
}
