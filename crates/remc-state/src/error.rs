//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// redb failures are flattened to strings at the store boundary.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state store: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("corrupt record: {0}")]
    Deserialize(String),

    #[error("job not found: {0}")]
    JobNotFound(String),
}
