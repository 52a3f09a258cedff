//! remc-health: the control node's health protocol.
//!
//! A job's control node serves a single unary RPC,
//! `Health/Check(service) -> ServingStatus`. The scheduler polls it through
//! a [`HealthProbe`] while watching a running job:
//!
//! ```text
//! Job::watch
//!   └── HealthProbe::check(address, service)   (~1 Hz)
//!         ├── Serving  → keep polling
//!         ├── Success  → job Success
//!         └── Failed / Unknown → job Failed
//! ```
//!
//! [`GrpcHealthProbe`] is the tonic client; [`HealthService`] is the
//! server side a controller process mounts to report its progress.

pub mod error;
pub mod probe;
pub mod server;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("remc.health.v1");
}

pub use error::{HealthError, HealthResult};
pub use probe::{GrpcHealthProbe, HealthProbe, ServingStatus};
pub use server::{HealthReporter, HealthService};
