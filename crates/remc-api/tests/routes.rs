//! Router-level tests: requests go through `build_router` and the
//! triggered tasks run against the mock backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use remc_api::build_router;
use remc_core::{JobStatus, NodeType, RemcConfig};
use remc_health::{HealthProbe, HealthResult, ServingStatus};
use remc_node::BackendRegistry;
use remc_node::mock::MockBackend;
use remc_state::StateStore;
use remc_tasks::Orchestrator;

/// Reports `Serving` until `finish` is flipped, then `Success`.
#[derive(Default)]
struct SwitchProbe {
    finished: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    async fn check(&self, _address: &str, _service: &str) -> HealthResult<ServingStatus> {
        if self.finished.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(ServingStatus::Success)
        } else {
            Ok(ServingStatus::Serving)
        }
    }
}

struct Harness {
    router: Router,
    orchestrator: Orchestrator,
    backend: MockBackend,
    probe: Arc<SwitchProbe>,
}

fn harness() -> Harness {
    let backend = MockBackend::new(NodeType::Vm);
    let registry = BackendRegistry::new().with(Arc::new(backend.clone()));
    let probe = Arc::new(SwitchProbe::default());
    let mut config = RemcConfig::default();
    config.controller.watch_interval_ms = 1;
    let orchestrator = Orchestrator::new(
        &config,
        StateStore::open_in_memory().unwrap(),
        Arc::new(registry),
        probe.clone(),
    );
    Harness {
        router: build_router(orchestrator.clone()),
        orchestrator,
        backend,
        probe,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(router: &Router, id: &str, replicas: u32) {
    let (status, _) = send(
        router,
        "POST",
        "/api/v1/jobs",
        Some(json!({
            "id": id,
            "replicas": replicas,
            "node_type": "vm",
            "probability_definition": "defs/ising.py",
            "temperatures": [0.5, 1.0, 2.0]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn wait_for(orchestrator: &Orchestrator, id: &str, want: JobStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = orchestrator.get_job(id).unwrap();
            if job.status == want && !orchestrator.store().is_locked(id).unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} never reached {want}"));
}

#[tokio::test]
async fn create_job_returns_checked_record() {
    let h = harness();
    create(&h.router, "job-1", 3).await;

    let (status, body) = send(&h.router, "GET", "/api/v1/jobs/job-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "initialized");

    let spec: Value = serde_json::from_str(body["data"]["spec"].as_str().unwrap()).unwrap();
    assert_eq!(spec["temperatures"], json!([0.5, 1.0, 2.0]));

    let (_, body) = send(&h.router, "GET", "/api/v1/jobs", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness();
    for (method, uri) in [
        ("GET", "/api/v1/jobs/nope"),
        ("POST", "/api/v1/jobs/nope/start"),
        ("GET", "/api/v1/jobs/nope/nodes"),
    ] {
        let (status, body) = send(&h.router, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn start_is_accepted_and_watched_to_success() {
    let h = harness();
    create(&h.router, "job-1", 2).await;

    let (status, body) = send(&h.router, "POST", "/api/v1/jobs/job-1/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["operation"], "start");

    wait_for(&h.orchestrator, "job-1", JobStatus::Running).await;
    let (_, body) = send(&h.router, "GET", "/api/v1/jobs/job-1/nodes", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    h.probe.finished.store(true, std::sync::atomic::Ordering::SeqCst);
    wait_for(&h.orchestrator, "job-1", JobStatus::Success).await;
}

#[tokio::test]
async fn trigger_on_busy_job_conflicts() {
    let h = harness();
    create(&h.router, "job-1", 2).await;
    let _lease = h.orchestrator.try_lock("job-1").unwrap().unwrap();

    let (status, body) = send(
        &h.router,
        "POST",
        "/api/v1/jobs/job-1/scale",
        Some(json!({ "replicas": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("busy"));
    assert_eq!(h.backend.total_creates(), 0);
}

#[tokio::test]
async fn scale_and_stop_through_the_api() {
    let h = harness();
    create(&h.router, "job-1", 2).await;
    h.orchestrator.start("job-1").await.unwrap();

    let (status, _) = send(
        &h.router,
        "POST",
        "/api/v1/jobs/job-1/scale",
        Some(json!({ "replicas": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.orchestrator.get_job("job-1").unwrap().replicas != Some(5)
            || h.orchestrator.store().is_locked("job-1").unwrap()
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (status, _) = send(&h.router, "POST", "/api/v1/jobs/job-1/stop", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for(&h.orchestrator, "job-1", JobStatus::Stopped).await;

    let (_, body) = send(&h.router, "GET", "/api/v1/jobs/job-1/nodes", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = send(&h.router, "GET", "/api/v1/jobs/job-1/nodes?all=true", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 6);
    assert!(h.backend.alive().is_empty());
}

#[tokio::test]
async fn negative_scale_is_bad_request() {
    let h = harness();
    create(&h.router, "job-1", 2).await;
    let (status, _) = send(
        &h.router,
        "POST",
        "/api/v1/jobs/job-1/scale",
        Some(json!({ "replicas": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn controller_iterations_are_appended() {
    let h = harness();
    create(&h.router, "job-1", 1).await;

    for tag in ["iter-0", "iter-1"] {
        let (status, _) = send(
            &h.router,
            "POST",
            "/api/v1/jobs/job-1/controller-iterations",
            Some(json!({ "tag": tag })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = send(&h.router, "GET", "/api/v1/jobs/job-1", None).await;
    assert_eq!(body["data"]["controller_iterations"], json!(["iter-0", "iter-1"]));
}
