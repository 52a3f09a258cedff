//! Dispatch table from node type to backend factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use remc_core::{JobSpec, NodeRole, NodeType};
use remc_state::NodeRecord;

use crate::error::{NodeError, NodeResult};
use crate::node::Node;

/// Builds nodes of one backend.
#[async_trait]
pub trait NodeFactory: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// A fresh, `Initialized` node.
    fn new_node(&self, name: &str, spec: &JobSpec, role: NodeRole) -> Box<dyn Node>;

    /// Rebind a persisted row to its backend resource.
    ///
    /// Returns `NodeError::NotFound` when the resource no longer exists.
    async fn restore_node(&self, spec: &JobSpec, record: &NodeRecord) -> NodeResult<Box<dyn Node>>;
}

/// Node type → factory, built once at startup and handed to every job.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<NodeType, Arc<dyn NodeFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same type.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        self.factories.insert(factory.node_type(), factory);
    }

    pub fn with(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, node_type: NodeType) -> NodeResult<Arc<dyn NodeFactory>> {
        self.factories
            .get(&node_type)
            .cloned()
            .ok_or(NodeError::UnsupportedBackend(node_type))
    }

    pub fn node_types(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.factories.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn lookup_by_node_type() {
        let registry = BackendRegistry::new().with(Arc::new(MockBackend::new(NodeType::Pod)));

        assert!(registry.get(NodeType::Pod).is_ok());
        assert!(matches!(
            registry.get(NodeType::Vm),
            Err(NodeError::UnsupportedBackend(NodeType::Vm))
        ));
        assert_eq!(registry.node_types(), vec![NodeType::Pod]);
    }
}
