//! Task error types.

use remc_job::JobError;
use remc_state::StateError;
use thiserror::Error;

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl TaskError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Job(e) if e.is_transient())
    }

    /// Errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        match self {
            TaskError::NotFound(_) | TaskError::AlreadyExists(_) => true,
            TaskError::Job(e) => matches!(
                e,
                JobError::InvalidTransition { .. }
                    | JobError::InvalidReplicas(_)
                    | JobError::InvalidSpec(_)
            ),
            TaskError::State(_) => false,
        }
    }
}
