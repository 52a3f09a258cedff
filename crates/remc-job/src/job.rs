//! The `Job` aggregate.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use futures::stream;
use tracing::{debug, error, info, warn};

use remc_core::{JobId, JobSpec, JobStatus, NodeRole, NodeStatus, RemcConfig};
use remc_health::{HealthProbe, ServingStatus};
use remc_node::{BackendRegistry, Node, NodeResult, node_name};
use remc_state::{JobRecord, JobRepository, JobState, NodeRecord};

use crate::error::{JobError, JobResult};

/// Orchestration knobs a job needs at runtime.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Width of the worker-creation pool.
    pub pool_width: usize,
    pub controller_port: u16,
    pub health_service: String,
    pub watch_interval: Duration,
    pub watch_timeout: Option<Duration>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&RemcConfig::default())
    }
}

impl From<&RemcConfig> for JobSettings {
    fn from(config: &RemcConfig) -> Self {
        Self {
            pool_width: config.orchestrator.pool_width,
            controller_port: config.controller.port,
            health_service: config.controller.health_service.clone(),
            watch_interval: config.controller.watch_interval(),
            watch_timeout: config.controller.watch_timeout(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One distributed sampling run and the nodes it owns.
pub struct Job {
    id: JobId,
    spec: JobSpec,
    status: JobStatus,
    /// Last requested worker count.
    replicas: u32,
    workers: Vec<Box<dyn Node>>,
    control: Option<Box<dyn Node>>,
    created_at: u64,
    started_at: Option<u64>,
    finished_at: Option<u64>,
    registry: Arc<BackendRegistry>,
    settings: JobSettings,
    repository: Option<Arc<dyn JobRepository>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("workers", &self.workers.len())
            .field("control", &self.control.as_ref().map(|c| c.name().to_string()))
            .field("bound", &self.repository.is_some())
            .finish()
    }
}

impl Job {
    /// A new, unchecked job with no nodes and no persisted record.
    pub fn new(
        id: &str,
        spec: JobSpec,
        registry: Arc<BackendRegistry>,
        settings: JobSettings,
    ) -> Self {
        Self {
            id: id.to_string(),
            replicas: spec.replicas,
            spec,
            status: JobStatus::Checking,
            workers: Vec::new(),
            control: None,
            created_at: now_secs(),
            started_at: None,
            finished_at: None,
            registry,
            settings,
            repository: None,
        }
    }

    /// Bind the job to a persisted record; `sync` writes through it.
    pub fn with_repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Rebuild a job from its persisted rows.
    ///
    /// Rows flagged not-in-use are skipped. A worker row whose backend
    /// object is gone is dropped with a warning, so the next `sync` marks
    /// it stale. The active rows must hold exactly one control node, and
    /// that node must still exist, unless the job is `Failed`, `Stopping`
    /// or `Stopped`: those may hold leftover workers without one, so that
    /// `stop()` can finish the cleanup.
    pub async fn from_state(
        state: JobState,
        registry: Arc<BackendRegistry>,
        settings: JobSettings,
    ) -> JobResult<Self> {
        let JobState { job, nodes } = state;
        let spec = JobSpec::from_json(&job.spec)?;
        let reconstruction = |reason: String| JobError::Reconstruction {
            job_id: job.id.clone(),
            reason,
        };

        let cleanup = matches!(
            job.status,
            JobStatus::Failed | JobStatus::Stopping | JobStatus::Stopped
        );
        let active: Vec<&NodeRecord> = nodes.iter().filter(|n| n.in_use).collect();
        let controls = active.iter().filter(|n| !n.is_worker).count();
        if controls > 1 || (!active.is_empty() && controls == 0 && !cleanup) {
            return Err(reconstruction(format!(
                "expected one control node, found {controls}"
            )));
        }

        let mut workers: Vec<(u32, Box<dyn Node>)> = Vec::new();
        let mut control = None;
        for record in active {
            let factory = registry.get(record.node_type)?;
            match factory.restore_node(&spec, record).await {
                Ok(node) if record.is_worker => workers.push((record.position, node)),
                Ok(node) => control = Some(node),
                Err(e) if e.is_not_found() => {
                    if !record.is_worker && !cleanup {
                        return Err(reconstruction(format!(
                            "control node {} no longer exists",
                            record.name
                        )));
                    }
                    warn!(job_id = %job.id, node = %record.name, "backend object gone, dropping node");
                }
                Err(e) => return Err(e.into()),
            }
        }
        workers.sort_by_key(|(position, _)| *position);

        debug!(job_id = %job.id, status = %job.status, workers = workers.len(), "job reconstructed");
        Ok(Self {
            id: job.id,
            replicas: job.replicas.unwrap_or(spec.replicas),
            spec,
            status: job.status,
            workers: workers.into_iter().map(|(_, node)| node).collect(),
            control,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            registry,
            settings,
            repository: None,
        })
    }

    /// Load and bind a job. `None` if the repository has no such job.
    pub async fn load(
        repository: Arc<dyn JobRepository>,
        job_id: &str,
        registry: Arc<BackendRegistry>,
        settings: JobSettings,
    ) -> JobResult<Option<Self>> {
        let Some(state) = repository.load(job_id)? else {
            return Ok(None);
        };
        let job = Self::from_state(state, registry, settings).await?;
        Ok(Some(job.with_repository(repository)))
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn workers(&self) -> &[Box<dyn Node>] {
        &self.workers
    }

    pub fn control(&self) -> Option<&dyn Node> {
        self.control.as_deref()
    }

    /// Workers in order, then the control node.
    pub fn nodes(&self) -> impl Iterator<Item = &Box<dyn Node>> {
        self.workers.iter().chain(self.control.iter())
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<u64> {
        self.finished_at
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Structural checks on the spec. Moves `Checking` to `Initialized`.
    pub fn check(&mut self) -> JobResult<()> {
        self.require("check", &[JobStatus::Checking])?;
        if self.spec.replicas == 0 {
            return Err(JobError::InvalidSpec(
                "replicas must be at least 1".to_string(),
            ));
        }
        if self.spec.probability_definition.trim().is_empty() {
            return Err(JobError::InvalidSpec(
                "probability_definition is empty".to_string(),
            ));
        }
        self.transition(JobStatus::Initialized);
        Ok(())
    }

    /// Create all nodes and bring the job to `Running`.
    ///
    /// Workers are created on a pool of `pool_width`; the control node is
    /// created afterwards with the worker addresses as its peers. If any
    /// creation fails every node is deleted, the job is `Failed`, and the
    /// creation error is returned.
    pub async fn start(&mut self) -> JobResult<()> {
        self.require(
            "start",
            &[JobStatus::Initialized, JobStatus::Starting, JobStatus::Restart],
        )?;
        if self.control.is_none() {
            self.init_nodes()?;
        }
        self.transition(JobStatus::Starting);

        if let Err(e) = self.create_nodes().await {
            error!(job_id = %self.id, error = %e, "start failed, rolling back");
            self.rollback().await;
            self.transition(JobStatus::Failed);
            return Err(e);
        }

        self.transition(JobStatus::Running);
        Ok(())
    }

    fn init_nodes(&mut self) -> JobResult<()> {
        let factory = self.registry.get(self.spec.node_type)?;
        self.workers = (0..self.replicas)
            .map(|_| {
                factory.new_node(
                    &node_name(&self.id, NodeRole::Worker),
                    &self.spec,
                    NodeRole::Worker,
                )
            })
            .collect();
        self.control = Some(factory.new_node(
            &node_name(&self.id, NodeRole::Controller),
            &self.spec,
            NodeRole::Controller,
        ));
        debug!(job_id = %self.id, workers = self.workers.len(), "nodes initialized");
        Ok(())
    }

    async fn create_nodes(&mut self) -> JobResult<()> {
        let width = self.settings.pool_width.max(1);
        let aborted = AtomicBool::new(false);
        let known = Mutex::new(self.worker_addresses());

        let pending: Vec<&mut Box<dyn Node>> = self
            .workers
            .iter_mut()
            .filter(|node| node.status() == NodeStatus::Initialized)
            .collect();
        let creations: Vec<_> = pending
            .into_iter()
            .map(|node| create_worker(node, &aborted, &known))
            .collect();
        let results: Vec<NodeResult<()>> = stream::iter(creations)
            .buffer_unordered(width)
            .collect()
            .await;

        if let Some(e) = results.into_iter().find_map(Result::err) {
            return Err(e.into());
        }

        let peers = self.worker_addresses();
        if let Some(control) = self.control.as_mut() {
            if control.status() == NodeStatus::Initialized {
                let log = control.create(&peers).await?;
                debug!(node = %control.name(), %log, "control node created");
            }
        }
        Ok(())
    }

    /// Best-effort delete of every node. Nodes whose delete fails are kept
    /// so they stay tracked.
    async fn rollback(&mut self) {
        let nodes: Vec<Box<dyn Node>> = self
            .workers
            .drain(..)
            .chain(self.control.take())
            .collect();
        for mut node in nodes {
            if let Err(e) = node.delete().await {
                warn!(job_id = %self.id, node = %node.name(), error = %e, "rollback delete failed");
                if node.role().is_controller() {
                    self.control = Some(node);
                } else {
                    self.workers.push(node);
                }
            }
        }
    }

    /// Delete workers in order, then the control node. The first failing
    /// delete is returned and the remaining nodes are kept.
    pub async fn stop(&mut self) -> JobResult<()> {
        self.require(
            "stop",
            &[
                JobStatus::Running,
                JobStatus::Stopping,
                JobStatus::Stopped,
                JobStatus::Success,
                JobStatus::Failed,
            ],
        )?;
        self.transition(JobStatus::Stopping);

        while let Some(node) = self.workers.first_mut() {
            node.delete().await?;
            self.workers.remove(0);
        }
        if let Some(control) = self.control.as_mut() {
            control.delete().await?;
        }
        self.control = None;

        self.transition(JobStatus::Stopped);
        Ok(())
    }

    /// `stop()`, then `start()` with a fresh node set.
    pub async fn restart(&mut self) -> JobResult<()> {
        self.require(
            "restart",
            &[JobStatus::Running, JobStatus::Stopped, JobStatus::Failed],
        )?;
        self.stop().await?;
        self.transition(JobStatus::Restart);
        self.start().await
    }

    /// Grow or shrink the worker set to `replicas`.
    ///
    /// New workers are created one at a time; a failure stops the scale
    /// without undoing the workers already added. Shrinking removes
    /// workers from the tail. The control node is not part of the worker
    /// set and is never removed.
    pub async fn scale_to(&mut self, replicas: i64) -> JobResult<()> {
        let target = u32::try_from(replicas).map_err(|_| JobError::InvalidReplicas(replicas))?;
        self.require("scale", &[JobStatus::Running])?;

        let current = self.workers.len();
        let wanted = target as usize;
        info!(job_id = %self.id, from = current, to = wanted, "scaling job");

        if wanted > current {
            let factory = self.registry.get(self.spec.node_type)?;
            for _ in current..wanted {
                let peers = self.addresses();
                let mut node = factory.new_node(
                    &node_name(&self.id, NodeRole::Worker),
                    &self.spec,
                    NodeRole::Worker,
                );
                if let Err(e) = node.create(&peers).await {
                    error!(job_id = %self.id, node = %node.name(), error = %e, "scale-up failed");
                    if let Err(cleanup) = node.delete().await {
                        warn!(node = %node.name(), error = %cleanup, "cleanup of failed worker");
                        self.workers.push(node);
                    }
                    return Err(e.into());
                }
                self.workers.push(node);
            }
        } else {
            for _ in wanted..current {
                let Some(mut node) = self.workers.pop() else {
                    break;
                };
                if let Err(e) = node.delete().await {
                    self.workers.push(node);
                    return Err(e.into());
                }
            }
        }

        self.replicas = target;
        Ok(())
    }

    /// Poll the control node until it reports a terminal status.
    ///
    /// Does not change the job; see [`Job::complete`].
    pub async fn observe(&self, probe: &dyn HealthProbe) -> JobResult<ServingStatus> {
        self.require("watch", &[JobStatus::Running])?;
        let address = self.health_address()?;
        let started = Instant::now();

        loop {
            let status = probe
                .check(&address, &self.settings.health_service)
                .await?;
            if status.is_terminal() {
                info!(job_id = %self.id, ?status, "control node finished");
                return Ok(status);
            }
            if let Some(limit) = self.settings.watch_timeout {
                if started.elapsed() >= limit {
                    return Err(JobError::WatchTimeout(self.id.clone()));
                }
            }
            tokio::time::sleep(self.settings.watch_interval).await;
        }
    }

    /// Apply a terminal control-node status. Returns whether the job
    /// succeeded.
    pub fn complete(&mut self, outcome: ServingStatus) -> JobResult<bool> {
        self.require("complete", &[JobStatus::Running])?;
        let success = outcome == ServingStatus::Success;
        self.transition(if success {
            JobStatus::Success
        } else {
            JobStatus::Failed
        });
        Ok(success)
    }

    /// [`Job::observe`] then [`Job::complete`].
    pub async fn watch(&mut self, probe: &dyn HealthProbe) -> JobResult<bool> {
        let outcome = self.observe(probe).await?;
        self.complete(outcome)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// The persisted form of the job and its current nodes.
    pub fn snapshot(&self) -> JobResult<JobState> {
        let mut job = JobRecord::new(&self.id, self.status, self.spec.to_json()?, self.created_at);
        job.started_at = self.started_at;
        job.finished_at = self.finished_at;
        job.replicas = Some(self.replicas);

        let mut nodes: Vec<NodeRecord> = self
            .workers
            .iter()
            .enumerate()
            .map(|(position, node)| {
                let mut record = node.to_record(&self.id);
                record.position = position as u32;
                record
            })
            .collect();
        if let Some(control) = &self.control {
            nodes.push(control.to_record(&self.id));
        }
        Ok(JobState { job, nodes })
    }

    /// Write the snapshot through the bound repository. No-op when the
    /// job is not bound.
    pub fn sync(&self) -> JobResult<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        repository.save(&self.snapshot()?)?;
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn require(&self, operation: &'static str, allowed: &[JobStatus]) -> JobResult<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(JobError::InvalidTransition {
            job_id: self.id.clone(),
            operation,
            status: self.status,
        })
    }

    fn transition(&mut self, to: JobStatus) {
        info!(job_id = %self.id, from = %self.status, %to, "job status");
        self.status = to;
        match to {
            JobStatus::Running => {
                self.started_at = Some(now_secs());
                self.finished_at = None;
            }
            JobStatus::Stopped | JobStatus::Success | JobStatus::Failed => {
                self.finished_at = Some(now_secs());
            }
            _ => {}
        }
    }

    fn worker_addresses(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter_map(|n| n.address().map(str::to_string))
            .collect()
    }

    fn addresses(&self) -> Vec<String> {
        self.nodes()
            .filter_map(|n| n.address().map(str::to_string))
            .collect()
    }

    fn health_address(&self) -> JobResult<String> {
        let host = self
            .control
            .as_ref()
            .and_then(|c| c.address())
            .ok_or_else(|| JobError::NoControlNode(self.id.clone()))?;
        Ok(format!("{host}:{}", self.settings.controller_port))
    }
}

/// Create one pooled worker. Its hostfile is seeded with the workers
/// that were up when it started. Nothing new is started once a creation
/// has failed.
async fn create_worker(
    node: &mut Box<dyn Node>,
    aborted: &AtomicBool,
    known: &Mutex<Vec<String>>,
) -> NodeResult<()> {
    if aborted.load(Ordering::SeqCst) {
        return Ok(());
    }
    let peers = known.lock().unwrap_or_else(|e| e.into_inner()).clone();
    match node.create(&peers).await {
        Ok(log) => {
            debug!(node = %node.name(), %log, "worker created");
            if let Some(address) = node.address() {
                known
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(address.to_string());
            }
            Ok(())
        }
        Err(e) => {
            aborted.store(true, Ordering::SeqCst);
            Err(e)
        }
    }
}
