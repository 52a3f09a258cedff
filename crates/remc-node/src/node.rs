//! The node capability contract shared by every backend.

use std::fmt;

use async_trait::async_trait;

use remc_core::{NodeRole, NodeStatus, NodeType};
use remc_state::NodeRecord;

use crate::error::NodeResult;

/// Generate a node name unique across restarts of the same job.
pub fn node_name(job_id: &str, role: NodeRole) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{job_id}-{}-{}", role.as_str(), &suffix[..8])
}

/// Backend-independent node attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub name: String,
    pub role: NodeRole,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub address: Option<String>,
    pub ports: Vec<u16>,
    pub entrypoint: Option<String>,
}

impl NodeMeta {
    pub fn new(name: &str, role: NodeRole, node_type: NodeType) -> Self {
        Self {
            name: name.to_string(),
            role,
            node_type,
            status: NodeStatus::Initialized,
            address: None,
            ports: Vec::new(),
            entrypoint: None,
        }
    }

    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            name: record.name.clone(),
            role: if record.is_worker {
                NodeRole::Worker
            } else {
                NodeRole::Controller
            },
            node_type: record.node_type,
            status: record.status,
            address: record.address.clone(),
            ports: record.ports.clone(),
            entrypoint: record.entrypoint.clone(),
        }
    }

    /// Apply a status observed on the backend. `None` means the backend
    /// reported nothing usable. A failed node stays failed.
    pub fn observe(&mut self, observed: Option<NodeStatus>) {
        if self.status == NodeStatus::Failed {
            return;
        }
        if let Some(status) = observed {
            self.status = status;
        }
    }

    /// `create()` on anything but a fresh node is a caller bug.
    pub fn assert_initialized(&self) {
        assert!(
            self.status == NodeStatus::Initialized,
            "create() called on node {} in status {}",
            self.name,
            self.status
        );
    }

    pub fn to_record(&self, job_id: &str) -> NodeRecord {
        NodeRecord {
            job_id: job_id.to_string(),
            name: self.name.clone(),
            node_type: self.node_type,
            status: self.status,
            address: self.address.clone(),
            ports: self.ports.clone(),
            entrypoint: self.entrypoint.clone(),
            in_use: true,
            is_worker: !self.role.is_controller(),
            position: 0,
        }
    }
}

/// One unit of compute owned by a job.
///
/// Implementations only expose their [`NodeMeta`]; the accessors are
/// derived from it.
#[async_trait]
pub trait Node: Send + Sync + fmt::Debug {
    fn meta(&self) -> &NodeMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn role(&self) -> NodeRole {
        self.meta().role
    }

    fn node_type(&self) -> NodeType {
        self.meta().node_type
    }

    fn status(&self) -> NodeStatus {
        self.meta().status
    }

    fn address(&self) -> Option<&str> {
        self.meta().address.as_deref()
    }

    fn ports(&self) -> &[u16] {
        &self.meta().ports
    }

    fn entrypoint(&self) -> Option<&str> {
        self.meta().entrypoint.as_deref()
    }

    /// Provision the node and return its deployment log.
    ///
    /// `peers` are the addresses of nodes that already exist in the job.
    ///
    /// # Panics
    ///
    /// If the node is not `Initialized`.
    ///
    /// # Errors
    ///
    /// `NodeError::Deployment` when a step fails. The node is then `Failed`
    /// and keeps its resource handle so a later `delete()` still works.
    async fn create(&mut self, peers: &[String]) -> NodeResult<String>;

    /// Restart the node in place. Fails with `MissingResource` if the
    /// backend resource is gone.
    async fn restart(&mut self) -> NodeResult<()>;

    /// Delete the backend resource. Succeeds immediately if there is none.
    async fn delete(&mut self) -> NodeResult<()>;

    /// Poll the backend and update the node's status.
    async fn refresh_status(&mut self) -> NodeResult<NodeStatus>;

    fn to_record(&self, job_id: &str) -> NodeRecord {
        self.meta().to_record(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_names_are_unique() {
        let a = node_name("job-1", NodeRole::Worker);
        let b = node_name("job-1", NodeRole::Worker);
        assert_ne!(a, b);
        assert!(a.starts_with("job-1-worker-"));
        assert!(node_name("job-1", NodeRole::Controller).starts_with("job-1-control-"));
    }

    #[test]
    fn failed_is_sticky() {
        let mut meta = NodeMeta::new("n", NodeRole::Worker, NodeType::Vm);
        meta.observe(Some(NodeStatus::Running));
        assert_eq!(meta.status, NodeStatus::Running);

        meta.observe(None);
        assert_eq!(meta.status, NodeStatus::Running);

        meta.status = NodeStatus::Failed;
        meta.observe(Some(NodeStatus::Running));
        assert_eq!(meta.status, NodeStatus::Failed);
    }

    #[test]
    #[should_panic(expected = "create() called on node")]
    fn create_precondition_panics() {
        let mut meta = NodeMeta::new("n", NodeRole::Worker, NodeType::Vm);
        meta.status = NodeStatus::Running;
        meta.assert_initialized();
    }

    #[test]
    fn record_round_trip_keeps_role() {
        let mut meta = NodeMeta::new("ctl", NodeRole::Controller, NodeType::Pod);
        meta.address = Some("10.0.0.9".to_string());
        meta.ports = vec![22, 50051];

        let record = meta.to_record("job-1");
        assert!(!record.is_worker);
        assert!(record.in_use);
        assert_eq!(record.job_id, "job-1");

        assert_eq!(NodeMeta::from_record(&record), meta);
    }
}
