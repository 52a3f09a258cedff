//! remc-core: shared vocabulary for the REMC orchestrator.
//!
//! Holds the job and node status enums, the immutable job specification,
//! the `remc.toml` configuration, and the retry policy used by every
//! scheduler ↔ control-node call.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::RemcConfig;
pub use error::{ConfigError, ConfigResult};
pub use retry::RetryPolicy;
pub use types::*;
