//! remc-node: compute nodes of a REMC job.
//!
//! A [`Node`] is one unit of compute: a worker replica or the job's control
//! node. Two backends implement it:
//!
//! - [`VmNode`]: a virtual machine launched through a [`ComputeDriver`] and
//!   provisioned by an ordered chain of shell and file steps.
//! - [`PodNode`]: a multi-container pod plus a config bundle, created through
//!   a [`PodApi`].
//!
//! Jobs never name a backend directly. They resolve a [`NodeFactory`] from
//! the [`BackendRegistry`] built at startup.

pub mod error;
pub mod kube_api;
pub mod manifest;
pub mod multipass;
pub mod node;
pub mod pod;
pub mod registry;
pub mod vm;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{NodeError, NodeResult};
pub use kube_api::KubePodApi;
pub use multipass::MultipassDriver;
pub use node::{Node, NodeMeta, node_name};
pub use pod::{PodApi, PodFactory, PodNode};
pub use registry::{BackendRegistry, NodeFactory};
pub use vm::{ComputeDriver, VmFactory, VmNode};
