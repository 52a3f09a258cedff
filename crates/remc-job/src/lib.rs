//! remc-job: the job aggregate.
//!
//! A [`Job`] owns its worker nodes and its single control node and drives
//! them through the lifecycle:
//!
//! ```text
//! Checking -> Initialized                       check()
//! Initialized | Starting | Restart -> Starting -> Running | Failed    start()
//! Running -> Stopping -> Stopped                stop()
//! Running | Stopped | Failed -> Restart -> ...  restart()
//! Running -> Success | Failed                   watch()
//! ```
//!
//! Jobs are short-lived: a task rebuilds one from its persisted
//! [`JobState`](remc_state::JobState), calls one lifecycle method, and
//! persists the result with [`Job::sync`].

pub mod error;
pub mod job;

pub use error::{JobError, JobResult};
pub use job::{Job, JobSettings};
