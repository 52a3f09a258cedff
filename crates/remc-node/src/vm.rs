//! Virtual-machine backend.
//!
//! A VM node is launched through a [`ComputeDriver`] and then provisioned
//! by a linear chain of [`DeployStep`]s. The first failing step aborts the
//! chain. The hostfile step runs before the launch step, which reads it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use remc_core::{JobSpec, NodeRole, NodeStatus, NodeType, RemcConfig};
use remc_state::NodeRecord;

use crate::error::{NodeError, NodeResult};
use crate::node::{Node, NodeMeta};
use crate::registry::NodeFactory;

// ── Driver contract ───────────────────────────────────────────────

/// Instance state as reported by a compute driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Rebooting,
    Stopped,
    Terminated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub state: InstanceState,
    pub address: Option<String>,
}

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A file pushed onto a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
    /// Append instead of replacing.
    pub append: bool,
}

impl RemoteFile {
    fn new(path: String, contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            path,
            contents: contents.into(),
            mode,
            append: false,
        }
    }
}

/// Opaque interface to a VM provider.
#[async_trait]
pub trait ComputeDriver: Send + Sync {
    /// Provision an instance and block until it is reachable.
    async fn launch(&self, name: &str) -> NodeResult<()>;

    /// `None` if no instance with this name exists.
    async fn info(&self, name: &str) -> NodeResult<Option<InstanceInfo>>;

    /// Run a shell script on the instance.
    async fn exec(&self, name: &str, script: &str) -> NodeResult<CommandOutput>;

    async fn write_file(&self, name: &str, file: &RemoteFile) -> NodeResult<CommandOutput>;

    async fn restart(&self, name: &str) -> NodeResult<()>;

    /// Delete the instance. Deleting an absent instance succeeds.
    async fn delete(&self, name: &str) -> NodeResult<()>;
}

/// Map a driver state onto the shared node status vocabulary. States the
/// driver does not name (e.g. a delayed shutdown) leave the status as it
/// was.
pub fn node_status(state: InstanceState) -> Option<NodeStatus> {
    match state {
        InstanceState::Pending => Some(NodeStatus::Creating),
        InstanceState::Running => Some(NodeStatus::Running),
        InstanceState::Rebooting => Some(NodeStatus::Restarting),
        InstanceState::Stopped | InstanceState::Terminated => Some(NodeStatus::Exited),
        InstanceState::Unknown => None,
    }
}

// ── Deployment steps ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Exec(String),
    Write(RemoteFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStep {
    pub name: &'static str,
    pub action: StepAction,
}

impl DeployStep {
    fn exec(name: &'static str, script: String) -> Self {
        Self {
            name,
            action: StepAction::Exec(script),
        }
    }

    fn write(name: &'static str, file: RemoteFile) -> Self {
        Self {
            name,
            action: StepAction::Write(file),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────

pub struct VmNode {
    meta: NodeMeta,
    spec: JobSpec,
    driver: Arc<dyn ComputeDriver>,
    config: Arc<RemcConfig>,
    /// Whether a backend instance exists for this node.
    launched: bool,
}

impl std::fmt::Debug for VmNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmNode")
            .field("meta", &self.meta)
            .field("launched", &self.launched)
            .finish()
    }
}

impl VmNode {
    fn new(
        name: &str,
        role: NodeRole,
        spec: &JobSpec,
        driver: Arc<dyn ComputeDriver>,
        config: Arc<RemcConfig>,
    ) -> Self {
        let mut meta = NodeMeta::new(name, role, NodeType::Vm);
        let (ports, entrypoint) = match role {
            NodeRole::Worker => (vec![22], config.vm.worker_command.clone()),
            NodeRole::Controller => (
                vec![22, config.controller.port],
                config.vm.controller_command.clone(),
            ),
        };
        meta.ports = ports;
        meta.entrypoint = Some(entrypoint);
        Self {
            meta,
            spec: spec.clone(),
            driver,
            config,
            launched: false,
        }
    }

    /// The provisioning chain, in execution order.
    pub fn deployment_steps(
        &self,
        peers: &[String],
        public_key: &str,
        private_key: &[u8],
    ) -> NodeResult<Vec<DeployStep>> {
        let vm = &self.config.vm;
        let dir = vm.remote_dir.as_str();
        let user = vm.ssh_user.as_str();
        let ssh_dir = format!("/home/{user}/.ssh");

        let mut install = vm.install_script.clone();
        if !self.spec.dependencies.is_empty() {
            install.push_str(&format!("pip install {}\n", self.spec.dependencies.join(" ")));
        }

        let mut hostfile = peers.join("\n");
        hostfile.push('\n');

        let mut authorized = RemoteFile::new(
            format!("{ssh_dir}/authorized_keys"),
            format!("{}\n", public_key.trim()),
            0o600,
        );
        authorized.append = true;

        let entrypoint = self.meta.entrypoint.clone().unwrap_or_default();

        Ok(vec![
            DeployStep::exec("init", vm.init_script.clone()),
            DeployStep::exec(
                "directories",
                format!(
                    "mkdir -p {dir}/config {ssh_dir} && chown -R {user}:{user} {dir} {ssh_dir}"
                ),
            ),
            DeployStep::write("authorized-key", authorized),
            DeployStep::write(
                "install-script",
                RemoteFile::new(format!("{dir}/install.sh"), install, 0o755),
            ),
            DeployStep::write(
                "hostfile",
                RemoteFile::new(format!("{dir}/hostfile"), hostfile, 0o644),
            ),
            DeployStep::write(
                "job-spec",
                RemoteFile::new(format!("{dir}/job_spec.json"), self.spec.to_json()?, 0o644),
            ),
            DeployStep::write(
                "storage-config",
                RemoteFile::new(
                    format!("{dir}/config/storage.toml"),
                    self.config.storage_toml()?,
                    0o644,
                ),
            ),
            DeployStep::write(
                "controller-config",
                RemoteFile::new(
                    format!("{dir}/config/controller.toml"),
                    self.config.controller_toml()?,
                    0o644,
                ),
            ),
            DeployStep::write(
                "logging-config",
                RemoteFile::new(
                    format!("{dir}/config/logging.toml"),
                    self.config.logging_toml()?,
                    0o644,
                ),
            ),
            DeployStep::write(
                "private-key",
                RemoteFile::new(format!("{ssh_dir}/id_ed25519"), private_key.to_vec(), 0o600),
            ),
            DeployStep::exec(
                "launch",
                format!("cd {dir} && ./install.sh && {entrypoint}"),
            ),
        ])
    }

    async fn provision(&mut self, peers: &[String], log: &mut String) -> NodeResult<()> {
        let name = self.meta.name.clone();

        self.driver.launch(&name).await?;
        self.launched = true;
        if let Some(info) = self.driver.info(&name).await? {
            self.meta.address = info.address;
        }
        log.push_str(&format!("==> instance {name} launched\n"));

        let vm = &self.config.vm;
        let public_key = tokio::fs::read_to_string(&vm.ssh_public_key)
            .await
            .map_err(|e| {
                NodeError::Driver(format!("read {}: {e}", vm.ssh_public_key.display()))
            })?;
        let private_key = tokio::fs::read(&vm.ssh_private_key).await.map_err(|e| {
            NodeError::Driver(format!("read {}: {e}", vm.ssh_private_key.display()))
        })?;

        for step in self.deployment_steps(peers, &public_key, &private_key)? {
            debug!(node = %name, step = step.name, "deployment step");
            let output = match &step.action {
                StepAction::Exec(script) => self.driver.exec(&name, script).await?,
                StepAction::Write(file) => self.driver.write_file(&name, file).await?,
            };
            log.push_str(&format!("==> {}\n{}{}", step.name, output.stdout, output.stderr));
            if !output.success {
                return Err(NodeError::Driver(format!("step {} failed", step.name)));
            }
        }
        Ok(())
    }

    /// Best-effort removal of what a failed deployment left on the instance.
    async fn cleanup(&self) {
        if !self.launched {
            return;
        }
        let script = format!("rm -rf {}", self.config.vm.remote_dir);
        if let Err(e) = self.driver.exec(&self.meta.name, &script).await {
            warn!(node = %self.meta.name, error = %e, "cleanup after failed deployment failed");
        }
    }
}

#[async_trait]
impl Node for VmNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    async fn create(&mut self, peers: &[String]) -> NodeResult<String> {
        self.meta.assert_initialized();
        self.meta.status = NodeStatus::Creating;
        info!(node = %self.meta.name, role = self.meta.role.as_str(), "creating vm node");

        let mut log = String::new();
        match self.provision(peers, &mut log).await {
            Ok(()) => {
                self.meta.status = NodeStatus::Running;
                info!(node = %self.meta.name, address = ?self.meta.address, "vm node running");
                Ok(log)
            }
            Err(e) => {
                log.push_str(&format!("error: {e}\n"));
                self.meta.status = NodeStatus::Failed;
                warn!(node = %self.meta.name, error = %e, "vm deployment failed");
                self.cleanup().await;
                Err(NodeError::Deployment {
                    name: self.meta.name.clone(),
                    log,
                })
            }
        }
    }

    async fn restart(&mut self) -> NodeResult<()> {
        let name = self.meta.name.clone();
        if !self.launched || self.driver.info(&name).await?.is_none() {
            return Err(NodeError::MissingResource(name));
        }
        info!(node = %name, "restarting vm node");
        self.driver.restart(&name).await?;
        self.refresh_status().await?;
        Ok(())
    }

    async fn delete(&mut self) -> NodeResult<()> {
        if !self.launched {
            return Ok(());
        }
        let name = self.meta.name.clone();
        match self.driver.delete(&name).await {
            Ok(()) => {
                self.launched = false;
                self.meta.status = NodeStatus::Exited;
                info!(node = %name, "vm node deleted");
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
        if !self.launched {
            return Ok(self.meta.status);
        }
        match self.driver.info(&self.meta.name).await? {
            Some(info) => {
                if info.address.is_some() {
                    self.meta.address = info.address;
                }
                self.meta.observe(node_status(info.state));
            }
            None => self.meta.observe(Some(NodeStatus::Exited)),
        }
        Ok(self.meta.status)
    }
}

// ── Factory ───────────────────────────────────────────────────────

pub struct VmFactory {
    driver: Arc<dyn ComputeDriver>,
    config: Arc<RemcConfig>,
}

impl VmFactory {
    pub fn new(driver: Arc<dyn ComputeDriver>, config: Arc<RemcConfig>) -> Self {
        Self { driver, config }
    }
}

#[async_trait]
impl NodeFactory for VmFactory {
    fn node_type(&self) -> NodeType {
        NodeType::Vm
    }

    fn new_node(&self, name: &str, spec: &JobSpec, role: NodeRole) -> Box<dyn Node> {
        Box::new(VmNode::new(
            name,
            role,
            spec,
            Arc::clone(&self.driver),
            Arc::clone(&self.config),
        ))
    }

    async fn restore_node(&self, spec: &JobSpec, record: &NodeRecord) -> NodeResult<Box<dyn Node>> {
        let Some(info) = self.driver.info(&record.name).await? else {
            return Err(NodeError::NotFound(record.name.clone()));
        };
        let mut meta = NodeMeta::from_record(record);
        if info.address.is_some() {
            meta.address = info.address;
        }
        Ok(Box::new(VmNode {
            meta,
            spec: spec.clone(),
            driver: Arc::clone(&self.driver),
            config: Arc::clone(&self.config),
            launched: true,
        }))
    }
}
