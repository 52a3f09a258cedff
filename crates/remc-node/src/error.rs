//! Error types for node provisioning.

use remc_core::{ConfigError, NodeType};
use thiserror::Error;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    /// A provisioning step failed. `log` holds the output gathered so far.
    #[error("deployment of node {name} failed")]
    Deployment { name: String, log: String },

    /// The node has no backend resource to act on.
    #[error("backend resource of node {0} is missing")]
    MissingResource(String),

    /// Reconstruction found no backend object for a persisted row.
    #[error("backend object not found: {0}")]
    NotFound(String),

    #[error("no backend registered for node type {0}")]
    UnsupportedBackend(NodeType),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl NodeError {
    /// Whether the persisted row should be flagged stale instead of failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::NotFound(_))
    }

    /// Deployment log, if this is a deployment failure.
    pub fn deployment_log(&self) -> Option<&str> {
        match self {
            NodeError::Deployment { log, .. } => Some(log),
            _ => None,
        }
    }
}
