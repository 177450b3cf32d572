//! Error types for the pipeforge engine.
//!
//! Uses `thiserror` for a single structured error enum covering declaration,
//! graph construction, execution and artifact versioning failures.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Node '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Invalid node kind: {kind}")]
    InvalidKind { kind: String },

    #[error("Invalid declaration for node '{node}': {message}")]
    InvalidDeclaration { node: String, message: String },

    #[error("{}", unknown_node_message(.name, .referenced_by.as_deref()))]
    UnknownNode {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Node '{node}' is not a dataset or model sink")]
    NotATerminal { node: String },

    #[error(
        "Node '{node}' failed at position {position} (chain: {}): {source}",
        .chain.join(" -> ")
    )]
    NodeExecution {
        node: String,
        position: usize,
        chain: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid artifact label '{label}': {message}")]
    InvalidLabel { label: String, message: String },

    #[error("Version conflict committing {name}:{branch}:{version}")]
    VersionConflict {
        name: String,
        branch: String,
        version: u32,
    },

    #[error("Artifact not found: {label}")]
    ArtifactNotFound { label: String },

    #[error("Artifact store error at {path}: {message}")]
    Store { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn unknown_node_message(name: &str, referenced_by: Option<&str>) -> String {
    match referenced_by {
        Some(parent_of) => format!("Unknown node '{name}' referenced by '{parent_of}'"),
        None => format!("Unknown node '{name}'"),
    }
}

impl PipelineError {
    pub fn invalid_declaration(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_label(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidLabel {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn artifact_not_found(label: impl std::fmt::Display) -> Self {
        Self::ArtifactNotFound {
            label: label.to_string(),
        }
    }

    /// Name of the node this error is attributed to, if any.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::DuplicateName { name } => Some(name),
            Self::InvalidDeclaration { node, .. } => Some(node),
            Self::UnknownNode {
                referenced_by: Some(referrer),
                ..
            } => Some(referrer),
            Self::UnknownNode { name, .. } => Some(name),
            Self::NotATerminal { node } => Some(node),
            Self::NodeExecution { node, .. } => Some(node),
            _ => None,
        }
    }
}
