//! remc-tasks: orchestration tasks over persisted jobs.
//!
//! Every lifecycle operation runs the same way:
//!
//! ```text
//! Orchestrator::start / stop / restart / scale
//!   ├── StateStore::try_lock(job)      held elsewhere → TaskOutcome::Busy
//!   ├── Job::load(store, job)          rebuild from rows
//!   ├── job.<operation>()              one lifecycle method
//!   └── job.sync()                     commit, also after a failure
//! ```
//!
//! `watch` is the exception: it polls the control node without the lease,
//! under the shared [`RetryPolicy`](remc_core::RetryPolicy), and only takes
//! the lease to commit the terminal status, waiting for it if another task
//! holds the job.

pub mod error;
pub mod orchestrator;

pub use error::{TaskError, TaskResult};
pub use orchestrator::{JobOp, Orchestrator, TaskOutcome};
