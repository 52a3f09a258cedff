//! Tasks racing for the same job, and jobs outliving the process that
//! started them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remc_core::{JobSpec, JobStatus, NodeType, RemcConfig};
use remc_health::{HealthProbe, HealthResult, ServingStatus};
use remc_job::JobSettings;
use remc_node::BackendRegistry;
use remc_node::mock::MockBackend;
use remc_state::StateStore;
use remc_tasks::{JobOp, Orchestrator, TaskOutcome};

struct AlwaysServing;

#[async_trait]
impl HealthProbe for AlwaysServing {
    async fn check(&self, _address: &str, _service: &str) -> HealthResult<ServingStatus> {
        Ok(ServingStatus::Serving)
    }
}

fn orchestrator(store: StateStore, backend: &MockBackend) -> Orchestrator {
    let config = RemcConfig::default();
    let registry = BackendRegistry::new().with(Arc::new(backend.clone()));
    Orchestrator::new(&config, store, Arc::new(registry), Arc::new(AlwaysServing)).with_settings(
        JobSettings {
            watch_interval: Duration::from_millis(1),
            ..JobSettings::from(&config)
        },
    )
}

fn spec(replicas: u32) -> JobSpec {
    JobSpec::new(replicas, NodeType::Vm, "defs/ising.py")
}

#[tokio::test]
async fn concurrent_scale_is_busy_and_changes_nothing() {
    let backend = MockBackend::new(NodeType::Vm);
    let orchestrator = orchestrator(StateStore::open_in_memory().unwrap(), &backend);
    let job_id = orchestrator.create_job(spec(2)).unwrap().id;
    orchestrator.start(&job_id).await.unwrap();

    let rows_before = orchestrator.store().list_nodes_for_job(&job_id).unwrap();
    let alive_before = backend.alive();

    backend.hold_creates();
    let first = {
        let orchestrator = orchestrator.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.scale(&job_id, 4).await })
    };
    backend.wait_blocked(1).await;

    let second = orchestrator.scale(&job_id, 1).await.unwrap();
    assert_eq!(second, TaskOutcome::Busy);
    assert_eq!(
        orchestrator.store().list_nodes_for_job(&job_id).unwrap(),
        rows_before
    );
    assert_eq!(orchestrator.get_job(&job_id).unwrap().replicas, Some(2));
    assert_eq!(backend.alive(), alive_before);
    for row in &rows_before {
        assert_eq!(backend.delete_count(&row.name), 0);
    }

    backend.release_creates();
    assert_eq!(first.await.unwrap().unwrap(), TaskOutcome::Done(()));

    let record = orchestrator.get_job(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.replicas, Some(4));
    assert_eq!(orchestrator.list_nodes(&job_id, false).unwrap().len(), 5);
    assert!(!orchestrator.store().is_locked(&job_id).unwrap());
}

#[tokio::test]
async fn lease_taken_by_a_trigger_blocks_other_tasks_until_released() {
    let backend = MockBackend::new(NodeType::Vm);
    let orchestrator = orchestrator(StateStore::open_in_memory().unwrap(), &backend);
    let job_id = orchestrator.create_job(spec(1)).unwrap().id;

    backend.hold_creates();
    let lease = orchestrator.try_lock(&job_id).unwrap().unwrap();
    let handle = orchestrator.spawn(lease, JobOp::Start);
    backend.wait_blocked(1).await;

    assert!(orchestrator.stop(&job_id).await.unwrap().is_busy());
    assert!(orchestrator.try_lock(&job_id).unwrap().is_none());

    backend.release_creates();
    // The chained watch polls forever against an always-serving probe.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = orchestrator.get_job(&job_id).unwrap().status;
            if status == JobStatus::Running && !orchestrator.store().is_locked(&job_id).unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    handle.abort();

    assert_eq!(orchestrator.stop(&job_id).await.unwrap(), TaskOutcome::Done(()));
    assert!(backend.alive().is_empty());
}

#[tokio::test]
async fn job_survives_a_restart_of_the_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remc.redb");
    let backend = MockBackend::new(NodeType::Vm);

    let job_id = {
        let orchestrator = orchestrator(StateStore::open(&path).unwrap(), &backend);
        let job_id = orchestrator.create_job(spec(3)).unwrap().id;
        orchestrator.start(&job_id).await.unwrap();
        orchestrator.scale(&job_id, 5).await.unwrap();
        job_id
    };

    let orchestrator = orchestrator(StateStore::open(&path).unwrap(), &backend);
    let record = orchestrator.get_job(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.replicas, Some(5));

    orchestrator.scale(&job_id, 2).await.unwrap();
    assert_eq!(orchestrator.list_nodes(&job_id, false).unwrap().len(), 3);

    orchestrator.stop(&job_id).await.unwrap();
    assert!(backend.alive().is_empty());
    assert_eq!(orchestrator.list_nodes(&job_id, true).unwrap().len(), 6);
}
