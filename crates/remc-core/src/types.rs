//! Shared types used across REMC crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque job identifier.
pub type JobId = String;

// ── Job ───────────────────────────────────────────────────────────

/// Lifecycle status of a job.
///
/// Persisted as its snake_case string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Checking,
    Initialized,
    Starting,
    Running,
    Restart,
    Stopping,
    Stopped,
    Success,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Checking,
        JobStatus::Initialized,
        JobStatus::Starting,
        JobStatus::Running,
        JobStatus::Restart,
        JobStatus::Stopping,
        JobStatus::Stopped,
        JobStatus::Success,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Checking => "checking",
            JobStatus::Initialized => "initialized",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Restart => "restart",
            JobStatus::Stopping => "stopping",
            JobStatus::Stopped => "stopped",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has finished (only read-only operations and
    /// `restart` are accepted afterwards).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Success | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable job specification.
///
/// The orchestrator reads `replicas`, `node_type` and passes everything
/// else through untouched to the nodes (serialized as JSON).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    /// Initial number of worker replicas.
    pub replicas: u32,
    /// Backend the job's nodes are provisioned on.
    #[serde(default)]
    pub node_type: NodeType,
    /// Extra packages installed on every node before launch.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Reference to the probability definition sampled by the workers.
    pub probability_definition: String,
    /// Sampler parameters, forwarded verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobSpec {
    /// Build a spec with no pass-through parameters.
    pub fn new(replicas: u32, node_type: NodeType, probability_definition: &str) -> Self {
        Self {
            replicas,
            node_type,
            dependencies: Vec::new(),
            probability_definition: probability_definition.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    /// Serialized form stored on the job row and pushed to nodes.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Lifecycle status of a single node, shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Initialized,
    Creating,
    Running,
    Restarting,
    Exited,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Initialized => "initialized",
            NodeStatus::Creating => "creating",
            NodeStatus::Running => "running",
            NodeStatus::Restarting => "restarting",
            NodeStatus::Exited => "exited",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend a node is provisioned on. Stored as the node-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Vm,
    Pod,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Vm => "vm",
            NodeType::Pod => "pod",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a node within its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Worker,
    Controller,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Worker => "worker",
            NodeRole::Controller => "control",
        }
    }

    pub fn is_controller(&self) -> bool {
        matches!(self, NodeRole::Controller)
    }
}
