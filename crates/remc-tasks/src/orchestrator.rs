//! Orchestrator: task entry points over the state store.
//!
//! The `Orchestrator` owns nothing but handles: the store, the backend
//! registry, and the health probe. Every call rebuilds the job it acts on
//! and writes it back, so any number of tasks (and processes sharing the
//! store) can run side by side. The job lease keeps them off each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use remc_core::{JobSpec, RemcConfig, RetryPolicy};
use remc_health::HealthProbe;
use remc_job::{Job, JobSettings};
use remc_node::BackendRegistry;
use remc_state::{JobLease, JobRecord, JobRepository, NodeRecord, StateError, StateStore};

use crate::error::{TaskError, TaskResult};

/// Result of a task that needs the job lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome<T = ()> {
    Done(T),
    /// Another task holds the job. Nothing was changed.
    Busy,
}

impl<T> TaskOutcome<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, TaskOutcome::Busy)
    }
}

/// A lifecycle operation run under the job lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOp {
    Start,
    Stop,
    Restart,
    Scale(i64),
}

impl JobOp {
    /// Operations that leave the job `Running` and are followed by a watch.
    fn chains_watch(&self) -> bool {
        matches!(self, JobOp::Start | JobOp::Restart)
    }
}

impl fmt::Display for JobOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOp::Start => write!(f, "start"),
            JobOp::Stop => write!(f, "stop"),
            JobOp::Restart => write!(f, "restart"),
            JobOp::Scale(n) => write!(f, "scale to {n}"),
        }
    }
}

/// Runs job tasks against the shared state store.
#[derive(Clone)]
pub struct Orchestrator {
    store: StateStore,
    registry: Arc<BackendRegistry>,
    probe: Arc<dyn HealthProbe>,
    settings: JobSettings,
    retry: RetryPolicy,
    lease_ttl: Duration,
    /// Where a successful job's results end up; see `[storage]`.
    results_prefix: Option<String>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .field("lease_ttl", &self.lease_ttl)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: &RemcConfig,
        store: StateStore,
        registry: Arc<BackendRegistry>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            store,
            registry,
            probe,
            settings: JobSettings::from(config),
            retry: config.retry.policy(),
            lease_ttl: config.orchestrator.lease_ttl(),
            results_prefix: config.storage.results_prefix.clone(),
        }
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Records ────────────────────────────────────────────────────

    /// Create and check a job under a fresh id.
    pub fn create_job(&self, spec: JobSpec) -> TaskResult<JobRecord> {
        self.create_job_with_id(&uuid::Uuid::new_v4().to_string(), spec)
    }

    /// Create and check a job. Nothing is persisted if the spec is rejected.
    pub fn create_job_with_id(&self, job_id: &str, spec: JobSpec) -> TaskResult<JobRecord> {
        if self.store.get_job(job_id)?.is_some() {
            return Err(TaskError::AlreadyExists(job_id.to_string()));
        }
        let mut job = Job::new(
            job_id,
            spec,
            Arc::clone(&self.registry),
            self.settings.clone(),
        )
        .with_repository(self.repository());
        job.check()?;
        job.sync()?;
        info!(%job_id, replicas = job.replicas(), node_type = %job.spec().node_type, "job created");
        self.get_job(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> TaskResult<JobRecord> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| TaskError::NotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self) -> TaskResult<Vec<JobRecord>> {
        Ok(self.store.list_jobs()?)
    }

    /// Node rows of a job. Stale rows are left out unless asked for.
    pub fn list_nodes(&self, job_id: &str, include_stale: bool) -> TaskResult<Vec<NodeRecord>> {
        self.get_job(job_id)?;
        let mut nodes = self.store.list_nodes_for_job(job_id)?;
        if !include_stale {
            nodes.retain(|n| n.in_use);
        }
        Ok(nodes)
    }

    /// Append a controller iteration tag. Does not take the job lease.
    pub fn add_controller_iteration(&self, job_id: &str, tag: &str) -> TaskResult<JobRecord> {
        match self.store.append_controller_iteration(job_id, tag) {
            Ok(job) => Ok(job),
            Err(StateError::JobNotFound(_)) => Err(TaskError::NotFound(job_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Take the job lease without waiting. `None` if another task holds it.
    pub fn try_lock(&self, job_id: &str) -> TaskResult<Option<JobLease>> {
        self.get_job(job_id)?;
        Ok(self.store.try_lock(job_id, self.lease_ttl)?)
    }

    pub async fn start(&self, job_id: &str) -> TaskResult<TaskOutcome> {
        self.locked(job_id, JobOp::Start).await
    }

    pub async fn stop(&self, job_id: &str) -> TaskResult<TaskOutcome> {
        self.locked(job_id, JobOp::Stop).await
    }

    pub async fn restart(&self, job_id: &str) -> TaskResult<TaskOutcome> {
        self.locked(job_id, JobOp::Restart).await
    }

    pub async fn scale(&self, job_id: &str, replicas: i64) -> TaskResult<TaskOutcome> {
        self.locked(job_id, JobOp::Scale(replicas)).await
    }

    async fn locked(&self, job_id: &str, op: JobOp) -> TaskResult<TaskOutcome> {
        let Some(lease) = self.try_lock(job_id)? else {
            debug!(%job_id, %op, "job busy");
            return Ok(TaskOutcome::Busy);
        };
        self.run(lease, op).await?;
        Ok(TaskOutcome::Done(()))
    }

    /// Run one operation under an acquired lease and release it.
    ///
    /// The job is synced even when the operation fails, so a rollback to
    /// `Failed` or a half-finished stop is recorded.
    pub async fn run(&self, lease: JobLease, op: JobOp) -> TaskResult<()> {
        let mut job = self.load(lease.job_id()).await?;
        debug!(job_id = %job.id(), %op, status = %job.status(), "running job operation");

        let result = match op {
            JobOp::Start => job.start().await,
            JobOp::Stop => job.stop().await,
            JobOp::Restart => job.restart().await,
            JobOp::Scale(replicas) => job.scale_to(replicas).await,
        };
        let synced = job.sync();
        release(lease);

        if let Err(e) = &synced {
            error!(job_id = %job.id(), error = %e, "failed to commit job state");
        }
        result?;
        synced?;
        Ok(())
    }

    /// Run `op` in the background under `lease`. A successful start or
    /// restart is followed by a watch.
    pub fn spawn(&self, lease: JobLease, op: JobOp) -> JoinHandle<TaskResult<()>> {
        let this = self.clone();
        tokio::spawn(async move {
            let job_id = lease.job_id().to_string();
            if let Err(e) = this.run(lease, op).await {
                error!(%job_id, %op, error = %e, "job operation failed");
                return Err(e);
            }
            if op.chains_watch() {
                match this.watch(&job_id).await {
                    Ok(success) => info!(%job_id, success, "watch finished"),
                    Err(e) => error!(%job_id, error = %e, "watch failed"),
                }
            }
            Ok(())
        })
    }

    /// Watch a running job until its control node reports a terminal
    /// status, then record `Success` or `Failed`. Returns whether the job
    /// succeeded.
    ///
    /// Polling happens without the lease and is retried on transient
    /// errors. The lease is only taken to commit the outcome; while another
    /// task holds it the commit waits and tries again. A job that left
    /// `Running` in the meantime is reported as an invalid transition.
    pub async fn watch(&self, job_id: &str) -> TaskResult<bool> {
        let outcome = self
            .retry
            .run(
                move |attempt| async move {
                    if attempt > 1 {
                        debug!(%job_id, attempt, "polling control node again");
                    }
                    let job = self.load(job_id).await?;
                    Ok::<_, TaskError>(job.observe(self.probe.as_ref()).await?)
                },
                TaskError::is_transient,
            )
            .await?;

        let lease = loop {
            if let Some(lease) = self.try_lock(job_id)? {
                break lease;
            }
            debug!(%job_id, ?outcome, "job busy, waiting to record terminal status");
            tokio::time::sleep(self.settings.watch_interval).await;
        };
        let mut job = match self.load(job_id).await {
            Ok(job) => job,
            Err(e) => {
                release(lease);
                return Err(e);
            }
        };
        let completed = job.complete(outcome);
        let synced = match &completed {
            Ok(_) => job.sync(),
            Err(_) => Ok(()),
        };
        release(lease);
        let success = completed?;
        synced?;

        if success {
            if let Some(prefix) = &self.results_prefix {
                let url = format!("{}/{job_id}", prefix.trim_end_matches('/'));
                self.store.set_results_url(job_id, &url)?;
                info!(%job_id, %url, "results recorded");
            }
        }
        Ok(success)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(self.store.clone())
    }

    async fn load(&self, job_id: &str) -> TaskResult<Job> {
        Job::load(
            self.repository(),
            job_id,
            Arc::clone(&self.registry),
            self.settings.clone(),
        )
        .await?
        .ok_or_else(|| TaskError::NotFound(job_id.to_string()))
    }
}

fn release(lease: JobLease) {
    let job_id = lease.job_id().to_string();
    match lease.release() {
        Ok(true) => {}
        Ok(false) => warn!(%job_id, "job lease expired before release"),
        Err(e) => warn!(%job_id, error = %e, "failed to release job lease"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use remc_core::{JobStatus, NodeType};
    use remc_health::{HealthError, HealthResult, ServingStatus};
    use remc_job::JobError;
    use remc_node::mock::{FailurePlan, MockBackend};

    /// Replays canned statuses, then reports `Serving` forever.
    struct ScriptedProbe {
        responses: Mutex<VecDeque<HealthResult<ServingStatus>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProbe {
        fn new(responses: Vec<HealthResult<ServingStatus>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self, _address: &str, _service: &str) -> HealthResult<ServingStatus> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ServingStatus::Serving))
        }
    }

    fn unavailable() -> HealthResult<ServingStatus> {
        Err(HealthError::Rpc(tonic::Status::unavailable("connection refused")))
    }

    fn orchestrator(probe: Arc<ScriptedProbe>) -> (Orchestrator, MockBackend) {
        let backend = MockBackend::new(NodeType::Vm);
        let registry = BackendRegistry::new().with(Arc::new(backend.clone()));
        let mut config = RemcConfig::default();
        config.storage.results_prefix = Some("s3://results/remc/".to_string());
        let settings = JobSettings {
            watch_interval: Duration::from_millis(1),
            ..JobSettings::from(&config)
        };
        let orchestrator = Orchestrator::new(
            &config,
            StateStore::open_in_memory().unwrap(),
            Arc::new(registry),
            probe,
        )
        .with_settings(settings)
        .with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
        ));
        (orchestrator, backend)
    }

    fn spec(replicas: u32) -> JobSpec {
        JobSpec::new(replicas, NodeType::Vm, "defs/ising.py")
    }

    async fn running_job(orchestrator: &Orchestrator) -> String {
        orchestrator.create_job_with_id("job-1", spec(2)).unwrap();
        assert_eq!(orchestrator.start("job-1").await.unwrap(), TaskOutcome::Done(()));
        "job-1".to_string()
    }

    #[test]
    fn test_create_job_is_checked_and_persisted() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        let record = orchestrator.create_job(spec(3)).unwrap();
        assert_eq!(record.status, JobStatus::Initialized);
        assert_eq!(record.replicas, Some(3));
        assert_eq!(orchestrator.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_create_job_rejects_duplicate_id() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        orchestrator.create_job_with_id("job-1", spec(1)).unwrap();
        let err = orchestrator.create_job_with_id("job-1", spec(1)).unwrap_err();
        assert!(matches!(err, TaskError::AlreadyExists(_)));
    }

    #[test]
    fn test_rejected_spec_is_not_persisted() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        let err = orchestrator.create_job_with_id("job-1", spec(0)).unwrap_err();
        assert!(err.is_client_error());
        assert!(orchestrator.store().get_job("job-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_commits_running_job() {
        let (orchestrator, backend) = orchestrator(ScriptedProbe::new(vec![]));
        let job_id = running_job(&orchestrator).await;

        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Running);
        let nodes = orchestrator.list_nodes(&job_id, false).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes.iter().filter(|n| !n.is_worker).count(), 1);
        assert_eq!(backend.alive().len(), 3);
        assert!(!orchestrator.store().is_locked(&job_id).unwrap());
    }

    #[tokio::test]
    async fn test_held_lease_makes_task_busy() {
        let (orchestrator, backend) = orchestrator(ScriptedProbe::new(vec![]));
        orchestrator.create_job_with_id("job-1", spec(2)).unwrap();
        let _lease = orchestrator.try_lock("job-1").unwrap().unwrap();

        assert!(orchestrator.start("job-1").await.unwrap().is_busy());
        assert_eq!(backend.total_creates(), 0);
        assert_eq!(
            orchestrator.get_job("job-1").unwrap().status,
            JobStatus::Initialized
        );
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        let err = orchestrator.stop("nope").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
        assert!(matches!(
            orchestrator.list_nodes("nope", true).unwrap_err(),
            TaskError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_start_is_committed() {
        let (orchestrator, backend) = orchestrator(ScriptedProbe::new(vec![]));
        backend.fail_creates(FailurePlan::Always);
        orchestrator.create_job_with_id("job-1", spec(2)).unwrap();

        let err = orchestrator.start("job-1").await.unwrap_err();
        assert!(matches!(err, TaskError::Job(JobError::Node(_))));
        assert_eq!(orchestrator.get_job("job-1").unwrap().status, JobStatus::Failed);
        assert!(orchestrator.list_nodes("job-1", false).unwrap().is_empty());
        assert!(!orchestrator.store().is_locked("job-1").unwrap());
    }

    #[tokio::test]
    async fn test_failed_start_with_stuck_workers_can_be_cleaned_up() {
        let (orchestrator, backend) = orchestrator(ScriptedProbe::new(vec![]));
        backend.fail_creates(FailurePlan::NameContains("-control-".to_string()));
        backend.fail_deletes(Some("-worker-"));
        orchestrator.create_job_with_id("job-1", spec(3)).unwrap();

        assert!(orchestrator.start("job-1").await.is_err());
        assert_eq!(orchestrator.get_job("job-1").unwrap().status, JobStatus::Failed);
        assert_eq!(orchestrator.list_nodes("job-1", false).unwrap().len(), 3);

        backend.fail_creates(FailurePlan::Never);
        backend.fail_deletes(None);
        assert_eq!(orchestrator.stop("job-1").await.unwrap(), TaskOutcome::Done(()));
        assert_eq!(orchestrator.get_job("job-1").unwrap().status, JobStatus::Stopped);
        assert!(orchestrator.list_nodes("job-1", false).unwrap().is_empty());
        assert!(backend.alive().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transition_changes_nothing() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        orchestrator.create_job_with_id("job-1", spec(2)).unwrap();

        let err = orchestrator.scale("job-1", 4).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(
            orchestrator.get_job("job-1").unwrap().status,
            JobStatus::Initialized
        );
        assert!(!orchestrator.store().is_locked("job-1").unwrap());
    }

    #[tokio::test]
    async fn test_stop_marks_rows_stale() {
        let (orchestrator, backend) = orchestrator(ScriptedProbe::new(vec![]));
        let job_id = running_job(&orchestrator).await;

        assert_eq!(orchestrator.stop(&job_id).await.unwrap(), TaskOutcome::Done(()));
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Stopped);
        assert!(orchestrator.list_nodes(&job_id, false).unwrap().is_empty());
        assert_eq!(orchestrator.list_nodes(&job_id, true).unwrap().len(), 3);
        assert!(backend.alive().is_empty());
    }

    #[tokio::test]
    async fn test_watch_retries_transient_errors() {
        let probe = ScriptedProbe::new(vec![
            unavailable(),
            Ok(ServingStatus::Serving),
            Ok(ServingStatus::Success),
        ]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        let job_id = running_job(&orchestrator).await;

        let outcome = orchestrator.watch(&job_id).await.unwrap();
        assert!(outcome);
        assert_eq!(probe.calls(), 3);

        let record = orchestrator.get_job(&job_id).unwrap();
        assert_eq!(record.status, JobStatus::Success);
        assert!(record.finished_at.is_some());
        assert_eq!(record.results_url.as_deref(), Some("s3://results/remc/job-1"));
    }

    #[tokio::test]
    async fn test_watch_records_failure() {
        let (orchestrator, _) =
            orchestrator(ScriptedProbe::new(vec![Ok(ServingStatus::Failed)]));
        let job_id = running_job(&orchestrator).await;

        assert!(!orchestrator.watch(&job_id).await.unwrap());
        let record = orchestrator.get_job(&job_id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.results_url.is_none());
    }

    #[tokio::test]
    async fn test_watch_escalates_after_retry_budget() {
        let probe = ScriptedProbe::new(vec![unavailable(), unavailable(), unavailable()]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        let job_id = running_job(&orchestrator).await;

        let err = orchestrator.watch(&job_id).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(probe.calls(), 3);
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_watch_of_idle_job_is_not_retried() {
        let probe = ScriptedProbe::new(vec![]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        orchestrator.create_job_with_id("job-1", spec(1)).unwrap();

        let err = orchestrator.watch("job-1").await.unwrap_err();
        assert!(matches!(err, TaskError::Job(ref e) if e.is_invalid_transition()));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_watch_commit_waits_for_held_lease() {
        let probe = ScriptedProbe::new(vec![Ok(ServingStatus::Success)]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        let job_id = running_job(&orchestrator).await;
        let lease = orchestrator.try_lock(&job_id).unwrap().unwrap();

        let watch = {
            let orchestrator = orchestrator.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { orchestrator.watch(&job_id).await })
        };
        while probe.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!watch.is_finished());
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Running);

        lease.release().unwrap();
        assert!(watch.await.unwrap().unwrap());
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Success);
        assert_eq!(probe.calls(), 1);
        assert!(!orchestrator.store().is_locked(&job_id).unwrap());
    }

    #[tokio::test]
    async fn test_watch_outcome_is_void_once_job_was_stopped() {
        let probe = ScriptedProbe::new(vec![Ok(ServingStatus::Success)]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        let job_id = running_job(&orchestrator).await;
        let lease = orchestrator.try_lock(&job_id).unwrap().unwrap();

        let watch = {
            let orchestrator = orchestrator.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { orchestrator.watch(&job_id).await })
        };
        while probe.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        orchestrator.run(lease, JobOp::Stop).await.unwrap();

        let err = watch.await.unwrap().unwrap_err();
        assert!(matches!(err, TaskError::Job(ref e) if e.is_invalid_transition()));
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Stopped);
        assert!(!orchestrator.store().is_locked(&job_id).unwrap());
    }

    #[tokio::test]
    async fn test_spawned_start_chains_watch() {
        let (orchestrator, _) =
            orchestrator(ScriptedProbe::new(vec![Ok(ServingStatus::Success)]));
        orchestrator.create_job_with_id("job-1", spec(2)).unwrap();

        let lease = orchestrator.try_lock("job-1").unwrap().unwrap();
        orchestrator.spawn(lease, JobOp::Start).await.unwrap().unwrap();
        assert_eq!(orchestrator.get_job("job-1").unwrap().status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_spawned_stop_does_not_watch() {
        let probe = ScriptedProbe::new(vec![]);
        let (orchestrator, _) = orchestrator(Arc::clone(&probe));
        let job_id = running_job(&orchestrator).await;

        let lease = orchestrator.try_lock(&job_id).unwrap().unwrap();
        orchestrator.spawn(lease, JobOp::Stop).await.unwrap().unwrap();
        assert_eq!(orchestrator.get_job(&job_id).unwrap().status, JobStatus::Stopped);
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_controller_iterations_append() {
        let (orchestrator, _) = orchestrator(ScriptedProbe::new(vec![]));
        orchestrator.create_job_with_id("job-1", spec(1)).unwrap();
        orchestrator.add_controller_iteration("job-1", "iter-0").unwrap();
        let record = orchestrator.add_controller_iteration("job-1", "iter-1").unwrap();
        assert_eq!(record.controller_iterations, vec!["iter-0", "iter-1"]);

        let err = orchestrator.add_controller_iteration("nope", "iter-0").unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }
}
