//! Error types for the job aggregate.

use remc_core::JobStatus;
use remc_health::HealthError;
use remc_node::NodeError;
use remc_state::StateError;
use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot {operation} job {job_id} in status {status}")]
    InvalidTransition {
        job_id: String,
        operation: &'static str,
        status: JobStatus,
    },

    #[error("invalid replica count: {0}")]
    InvalidReplicas(i64),

    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("job {0} has no reachable control node")]
    NoControlNode(String),

    #[error("cannot rebuild job {job_id}: {reason}")]
    Reconstruction { job_id: String, reason: String },

    #[error("watch of job {0} timed out")]
    WatchTimeout(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("spec serialization error: {0}")]
    Spec(#[from] serde_json::Error),
}

impl JobError {
    /// Failures talking to the control node that a retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Health(e) if e.is_transient())
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, JobError::InvalidTransition { .. })
    }
}
