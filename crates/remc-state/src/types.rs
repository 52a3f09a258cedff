//! Persisted record types.
//!
//! These are the rows the orchestration layer reads and writes. The
//! in-memory `Job` aggregate is rebuilt from a [`JobState`] on every task
//! and flattened back into one when it syncs.

use serde::{Deserialize, Serialize};

use remc_core::{JobId, JobStatus, NodeStatus, NodeType};

// ── Job ───────────────────────────────────────────────────────────

/// Persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Serialized `JobSpec`.
    pub spec: String,
    /// Unix timestamp when the job was created.
    pub created_at: u64,
    /// Unix timestamp of the last transition into `Running`.
    pub started_at: Option<u64>,
    /// Unix timestamp of the last transition into a terminal status.
    pub finished_at: Option<u64>,
    /// Append-only controller iteration tags.
    #[serde(default)]
    pub controller_iterations: Vec<String>,
    /// Where finished results can be downloaded from.
    pub results_url: Option<String>,
    /// Last requested worker count. `None` until the first scale.
    #[serde(default)]
    pub replicas: Option<u32>,
}

impl JobRecord {
    pub fn new(id: &str, status: JobStatus, spec: String, created_at: u64) -> Self {
        Self {
            id: id.to_string(),
            status,
            spec,
            created_at,
            started_at: None,
            finished_at: None,
            controller_iterations: Vec::new(),
            results_url: None,
            replicas: None,
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Persisted node row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    /// Foreign key to the owning job.
    pub job_id: JobId,
    pub name: String,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub address: Option<String>,
    pub ports: Vec<u16>,
    pub entrypoint: Option<String>,
    /// Rows flagged `false` are stale and skipped on reconstruction.
    pub in_use: bool,
    /// `false` marks the job's control node.
    pub is_worker: bool,
    /// Index in the job's worker list; scale-down removes from the tail.
    #[serde(default)]
    pub position: u32,
}

impl NodeRecord {
    /// Build the composite key for the nodes table.
    pub fn table_key(&self) -> String {
        node_key(&self.job_id, &self.name)
    }
}

/// Composite key of a node row.
pub fn node_key(job_id: &str, name: &str) -> String {
    format!("{job_id}:{name}")
}

// ── Snapshot ──────────────────────────────────────────────────────

/// A job row plus the node rows of its current node set.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub job: JobRecord,
    pub nodes: Vec<NodeRecord>,
}

impl JobState {
    /// Node rows still in use.
    pub fn active_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(|n| n.in_use)
    }
}

// ── Lease ─────────────────────────────────────────────────────────

/// Exclusive, time-bounded claim on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    pub job_id: JobId,
    /// Random token identifying the holder.
    pub holder: String,
    /// Unix timestamp (milliseconds) after which the lease may be stolen.
    pub expires_at_ms: u64,
}
