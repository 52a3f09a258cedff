//! Health probe error types.

use thiserror::Error;
use tonic::Code;

pub type HealthResult<T> = Result<T, HealthError>;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid control node address: {0}")]
    InvalidAddress(String),

    #[error("control node unreachable: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("health check failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl HealthError {
    /// Network-level failures worth retrying. A malformed address or a
    /// definitive RPC error is not.
    pub fn is_transient(&self) -> bool {
        match self {
            HealthError::InvalidAddress(_) => false,
            HealthError::Transport(_) => true,
            HealthError::Rpc(status) => matches!(
                status.code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::Aborted | Code::ResourceExhausted
            ),
        }
    }
}
