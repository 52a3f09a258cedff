//! remc-state: embedded state store for REMC jobs.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for job rows, node rows, and per-job leases.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Node rows use the composite key `{job_id}:{node_name}` so the rows of a
//! job are found by prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Mutual exclusion between tasks
//! acting on the same job goes through [`StateStore::try_lock`], a
//! non-blocking lease: a contended lock returns `None` immediately.

pub mod error;
pub mod lease;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lease::JobLease;
pub use repository::JobRepository;
pub use store::StateStore;
pub use types::*;
