//! Pod backend.
//!
//! A pod node is one config bundle plus one multi-container pod. Creation
//! goes bundle then pod; deletion goes pod then bundle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use tracing::{debug, info, warn};

use remc_core::{JobSpec, NodeRole, NodeStatus, NodeType, RemcConfig};
use remc_state::NodeRecord;

use crate::error::{NodeError, NodeResult};
use crate::manifest::{self, BundleFiles};
use crate::node::{Node, NodeMeta};
use crate::registry::NodeFactory;

pub const WORKER_ENTRYPOINT: &str = "remc-worker";
pub const CONTROLLER_ENTRYPOINT: &str = "remc-controller";

/// The slice of the orchestration API a pod node needs.
#[async_trait]
pub trait PodApi: Send + Sync {
    async fn create_bundle(&self, bundle: &ConfigMap) -> NodeResult<()>;

    /// Deleting an absent bundle succeeds.
    async fn delete_bundle(&self, name: &str) -> NodeResult<()>;

    async fn create_pod(&self, pod: &Pod) -> NodeResult<()>;

    async fn get_pod(&self, name: &str) -> NodeResult<Option<Pod>>;

    /// Deleting an absent pod succeeds.
    async fn delete_pod(&self, name: &str) -> NodeResult<()>;
}

/// Map a pod phase onto the shared node status vocabulary.
pub fn node_status(phase: Option<&str>) -> Option<NodeStatus> {
    match phase? {
        "Pending" => Some(NodeStatus::Creating),
        "Running" => Some(NodeStatus::Running),
        "Succeeded" => Some(NodeStatus::Exited),
        "Failed" => Some(NodeStatus::Failed),
        _ => None,
    }
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status.as_ref()?.pod_ip.clone()
}

/// Whether the pod's readiness probes pass.
fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

pub struct PodNode {
    meta: NodeMeta,
    spec: JobSpec,
    api: Arc<dyn PodApi>,
    config: Arc<RemcConfig>,
    poll_interval: Duration,
    bundle_created: bool,
    pod_created: bool,
}

impl std::fmt::Debug for PodNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodNode")
            .field("meta", &self.meta)
            .field("bundle_created", &self.bundle_created)
            .field("pod_created", &self.pod_created)
            .finish()
    }
}

impl PodNode {
    fn manifest(&self) -> NodeResult<Pod> {
        manifest::pod(
            &self.meta.name,
            self.meta.role,
            &self.config.pod,
            self.config.controller.port,
            self.meta.entrypoint.as_deref().unwrap_or(WORKER_ENTRYPOINT),
        )
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.config.pod.ready_timeout_secs)
    }

    async fn provision(&mut self, log: &mut String) -> NodeResult<()> {
        let pod_config = &self.config.pod;
        let public_key = tokio::fs::read_to_string(&pod_config.ssh_public_key)
            .await
            .map_err(|e| {
                NodeError::Driver(format!("read {}: {e}", pod_config.ssh_public_key.display()))
            })?;
        let private_key = tokio::fs::read_to_string(&pod_config.ssh_private_key)
            .await
            .map_err(|e| {
                NodeError::Driver(format!("read {}: {e}", pod_config.ssh_private_key.display()))
            })?;

        let mut install = pod_config.install_script.clone();
        if !self.spec.dependencies.is_empty() {
            install.push_str(&format!("pip install {}\n", self.spec.dependencies.join(" ")));
        }
        let job_spec = self.spec.to_json()?;
        let bundle = manifest::bundle(
            &self.meta.name,
            self.meta.role,
            &pod_config.namespace,
            &BundleFiles {
                install_script: &install,
                job_spec: &job_spec,
                public_key: public_key.trim(),
                private_key: &private_key,
            },
        );
        let pod = self.manifest()?;

        self.api.create_bundle(&bundle).await?;
        self.bundle_created = true;
        log.push_str(&format!("==> bundle {} created\n", manifest::bundle_name(&self.meta.name)));

        self.api.create_pod(&pod).await?;
        self.pod_created = true;
        log.push_str(&format!("==> pod {} created\n", self.meta.name));

        self.wait_ready().await?;
        log.push_str(&format!("==> pod {} running\n", self.meta.name));
        Ok(())
    }

    /// Poll until the pod runs and has an address. The control node also
    /// waits for its readiness probe on the control port.
    async fn wait_ready(&mut self) -> NodeResult<()> {
        let gated = self.meta.role.is_controller();
        let deadline = Instant::now() + self.ready_timeout();
        loop {
            let Some(pod) = self.api.get_pod(&self.meta.name).await? else {
                return Err(NodeError::Driver(format!("pod {} disappeared", self.meta.name)));
            };
            match (phase(&pod), pod_ip(&pod)) {
                (Some("Running"), Some(ip)) if !gated || is_ready(&pod) => {
                    self.meta.address = Some(ip);
                    return Ok(());
                }
                (Some(phase @ ("Failed" | "Succeeded")), _) => {
                    return Err(NodeError::Driver(format!(
                        "pod {} ended in phase {phase}",
                        self.meta.name
                    )));
                }
                (phase, _) => debug!(node = %self.meta.name, ?phase, "waiting for pod"),
            }
            if Instant::now() >= deadline {
                return Err(NodeError::Driver(format!(
                    "pod {} not ready after {:?}",
                    self.meta.name,
                    self.ready_timeout()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll until the pod is gone.
    async fn wait_deleted(&self) -> NodeResult<()> {
        let deadline = Instant::now() + self.ready_timeout();
        while self.api.get_pod(&self.meta.name).await?.is_some() {
            if Instant::now() >= deadline {
                return Err(NodeError::Driver(format!(
                    "pod {} still terminating",
                    self.meta.name
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }

    /// Best-effort removal of a bundle whose pod never came up.
    async fn cleanup(&mut self) {
        if self.pod_created || !self.bundle_created {
            return;
        }
        let bundle = manifest::bundle_name(&self.meta.name);
        match self.api.delete_bundle(&bundle).await {
            Ok(()) => self.bundle_created = false,
            Err(e) => warn!(node = %self.meta.name, error = %e, "cleanup of bundle failed"),
        }
    }
}

#[async_trait]
impl Node for PodNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    async fn create(&mut self, _peers: &[String]) -> NodeResult<String> {
        self.meta.assert_initialized();
        self.meta.status = NodeStatus::Creating;
        info!(node = %self.meta.name, role = self.meta.role.as_str(), "creating pod node");

        let mut log = String::new();
        match self.provision(&mut log).await {
            Ok(()) => {
                self.meta.status = NodeStatus::Running;
                info!(node = %self.meta.name, address = ?self.meta.address, "pod node running");
                Ok(log)
            }
            Err(e) => {
                log.push_str(&format!("error: {e}\n"));
                self.meta.status = NodeStatus::Failed;
                warn!(node = %self.meta.name, error = %e, "pod deployment failed");
                self.cleanup().await;
                Err(NodeError::Deployment {
                    name: self.meta.name.clone(),
                    log,
                })
            }
        }
    }

    /// Pods have no in-place restart; the pod is deleted and recreated
    /// from the same manifest.
    async fn restart(&mut self) -> NodeResult<()> {
        let name = self.meta.name.clone();
        if !self.pod_created || self.api.get_pod(&name).await?.is_none() {
            return Err(NodeError::MissingResource(name));
        }
        info!(node = %name, "restarting pod node");
        self.meta.status = NodeStatus::Restarting;
        let pod = self.manifest()?;
        self.api.delete_pod(&name).await?;
        self.wait_deleted().await?;
        self.api.create_pod(&pod).await?;
        self.wait_ready().await?;
        self.refresh_status().await?;
        Ok(())
    }

    async fn delete(&mut self) -> NodeResult<()> {
        if !self.pod_created && !self.bundle_created {
            return Ok(());
        }
        let name = self.meta.name.clone();
        let result = async {
            if self.pod_created {
                self.api.delete_pod(&name).await?;
                self.pod_created = false;
            }
            if self.bundle_created {
                self.api.delete_bundle(&manifest::bundle_name(&name)).await?;
                self.bundle_created = false;
            }
            Ok::<(), NodeError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.meta.status = NodeStatus::Exited;
                info!(node = %name, "pod node deleted");
                Ok(())
            }
            Err(e) => {
                if let Err(refresh) = self.refresh_status().await {
                    warn!(node = %name, error = %refresh, "status refresh after failed delete");
                }
                Err(e)
            }
        }
    }

    async fn refresh_status(&mut self) -> NodeResult<NodeStatus> {
        if !self.pod_created {
            return Ok(self.meta.status);
        }
        match self.api.get_pod(&self.meta.name).await? {
            Some(pod) => {
                if let Some(ip) = pod_ip(&pod) {
                    self.meta.address = Some(ip);
                }
                self.meta.observe(node_status(phase(&pod)));
            }
            None => self.meta.observe(Some(NodeStatus::Exited)),
        }
        Ok(self.meta.status)
    }
}

pub struct PodFactory {
    api: Arc<dyn PodApi>,
    config: Arc<RemcConfig>,
    poll_interval: Duration,
}

impl PodFactory {
    pub fn new(api: Arc<dyn PodApi>, config: Arc<RemcConfig>) -> Self {
        Self {
            api,
            config,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn node(&self, meta: NodeMeta, spec: &JobSpec) -> PodNode {
        PodNode {
            meta,
            spec: spec.clone(),
            api: Arc::clone(&self.api),
            config: Arc::clone(&self.config),
            poll_interval: self.poll_interval,
            bundle_created: false,
            pod_created: false,
        }
    }
}

#[async_trait]
impl NodeFactory for PodFactory {
    fn node_type(&self) -> NodeType {
        NodeType::Pod
    }

    fn new_node(&self, name: &str, spec: &JobSpec, role: NodeRole) -> Box<dyn Node> {
        let mut meta = NodeMeta::new(name, role, NodeType::Pod);
        match role {
            NodeRole::Worker => {
                meta.ports = vec![22];
                meta.entrypoint = Some(WORKER_ENTRYPOINT.to_string());
            }
            NodeRole::Controller => {
                meta.ports = vec![22, self.config.controller.port];
                meta.entrypoint = Some(CONTROLLER_ENTRYPOINT.to_string());
            }
        }
        Box::new(self.node(meta, spec))
    }

    async fn restore_node(&self, spec: &JobSpec, record: &NodeRecord) -> NodeResult<Box<dyn Node>> {
        let Some(pod) = self.api.get_pod(&record.name).await? else {
            return Err(NodeError::NotFound(record.name.clone()));
        };
        let mut meta = NodeMeta::from_record(record);
        if let Some(ip) = pod_ip(&pod) {
            meta.address = Some(ip);
        }
        let mut node = self.node(meta, spec);
        node.bundle_created = true;
        node.pod_created = true;
        Ok(Box::new(node))
    }
}
