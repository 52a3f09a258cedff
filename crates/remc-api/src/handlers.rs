//! REST API handlers.
//!
//! Record reads and writes go straight through the orchestrator. Lifecycle
//! triggers take the job lease synchronously and hand it to a background
//! task, so the response only says whether the job was free.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use remc_core::{JobSpec, JobStatus};
use remc_job::JobError;
use remc_tasks::{JobOp, TaskError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn task_error(e: &TaskError) -> Response {
    let status = match e {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::AlreadyExists(_) => StatusCode::CONFLICT,
        TaskError::Job(JobError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

fn busy_response(id: &str) -> Response {
    error_response(&format!("job {id} is busy"), StatusCode::CONFLICT).into_response()
}

// ── Jobs ───────────────────────────────────────────────────────

/// Create request body: a job spec plus an optional id.
#[derive(serde::Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.list_jobs() {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => task_error(&e),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.get_job(&id) {
        Ok(job) => ApiResponse::ok(job).into_response(),
        Err(e) => task_error(&e),
    }
}

/// POST /api/v1/jobs
pub async fn create_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let created = match &req.id {
        Some(id) => state.orchestrator.create_job_with_id(id, req.spec),
        None => state.orchestrator.create_job(req.spec),
    };
    match created {
        Ok(job) => (StatusCode::CREATED, ApiResponse::ok(job)).into_response(),
        Err(e) => task_error(&e),
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

fn trigger(state: &ApiState, id: &str, op: JobOp) -> Response {
    match state.orchestrator.try_lock(id) {
        Ok(Some(lease)) => {
            info!(job_id = %id, %op, "job operation accepted");
            state.orchestrator.spawn(lease, op);
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({
                    "job": id,
                    "operation": op.to_string(),
                    "status": "accepted"
                })),
            )
                .into_response()
        }
        Ok(None) => busy_response(id),
        Err(e) => task_error(&e),
    }
}

/// POST /api/v1/jobs/{id}/start
pub async fn start_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    trigger(&state, &id, JobOp::Start)
}

/// POST /api/v1/jobs/{id}/stop
pub async fn stop_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    trigger(&state, &id, JobOp::Stop)
}

/// POST /api/v1/jobs/{id}/restart
pub async fn restart_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    trigger(&state, &id, JobOp::Restart)
}

/// Scale request body.
#[derive(serde::Deserialize)]
pub struct ScaleRequest {
    pub replicas: i64,
}

/// POST /api/v1/jobs/{id}/scale
pub async fn scale_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> impl IntoResponse {
    if req.replicas < 0 {
        return error_response(
            &format!("replicas must not be negative, got {}", req.replicas),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    trigger(&state, &id, JobOp::Scale(req.replicas))
}

/// POST /api/v1/jobs/{id}/watch
///
/// Re-attaches a watch to a running job, e.g. after a daemon restart.
pub async fn watch_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let job = match state.orchestrator.get_job(&id) {
        Ok(job) => job,
        Err(e) => return task_error(&e),
    };
    if job.status != JobStatus::Running {
        return error_response(
            &format!("job {id} is {}, not running", job.status),
            StatusCode::CONFLICT,
        )
        .into_response();
    }

    let orchestrator = state.orchestrator.clone();
    let job_id = id.clone();
    tokio::spawn(async move {
        match orchestrator.watch(&job_id).await {
            Ok(success) => info!(%job_id, success, "watch finished"),
            Err(e) => error!(%job_id, error = %e, "watch failed"),
        }
    });
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({
            "job": id,
            "operation": "watch",
            "status": "accepted"
        })),
    )
        .into_response()
}

// ── Records ────────────────────────────────────────────────────

/// Controller iteration request body.
#[derive(serde::Deserialize)]
pub struct IterationRequest {
    pub tag: String,
}

/// POST /api/v1/jobs/{id}/controller-iterations
pub async fn add_controller_iteration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<IterationRequest>,
) -> impl IntoResponse {
    match state.orchestrator.add_controller_iteration(&id, &req.tag) {
        Ok(job) => (StatusCode::CREATED, ApiResponse::ok(job)).into_response(),
        Err(e) => task_error(&e),
    }
}

/// Node listing query.
#[derive(serde::Deserialize, Default)]
pub struct NodesQuery {
    /// Include rows of nodes that no longer belong to the job.
    #[serde(default)]
    pub all: bool,
}

/// GET /api/v1/jobs/{id}/nodes
pub async fn list_nodes(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<NodesQuery>,
) -> impl IntoResponse {
    match state.orchestrator.list_nodes(&id, query.all) {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => task_error(&e),
    }
}
