//! remc-api: REST trigger surface for REMC.
//!
//! Lifecycle triggers take the job lease before answering: a held lease
//! is answered with `409 Conflict`, an acquired one with `202 Accepted`
//! while the operation runs in the background.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/jobs` | List all jobs |
//! | POST | `/api/v1/jobs` | Create and check a job |
//! | GET | `/api/v1/jobs/{id}` | Get a job |
//! | POST | `/api/v1/jobs/{id}/start` | Start a job, then watch it |
//! | POST | `/api/v1/jobs/{id}/stop` | Stop a job |
//! | POST | `/api/v1/jobs/{id}/restart` | Restart a job, then watch it |
//! | POST | `/api/v1/jobs/{id}/scale` | Scale the worker count |
//! | POST | `/api/v1/jobs/{id}/watch` | Watch a running job |
//! | POST | `/api/v1/jobs/{id}/controller-iterations` | Record a controller iteration |
//! | GET | `/api/v1/jobs/{id}/nodes` | List a job's nodes (`?all=true` for stale rows) |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use remc_tasks::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

/// Build the API router.
pub fn build_router(orchestrator: Orchestrator) -> Router {
    let state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route("/jobs", get(handlers::list_jobs).post(handlers::create_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/start", post(handlers::start_job))
        .route("/jobs/{id}/stop", post(handlers::stop_job))
        .route("/jobs/{id}/restart", post(handlers::restart_job))
        .route("/jobs/{id}/scale", post(handlers::scale_job))
        .route("/jobs/{id}/watch", post(handlers::watch_job))
        .route(
            "/jobs/{id}/controller-iterations",
            post(handlers::add_controller_iteration),
        )
        .route("/jobs/{id}/nodes", get(handlers::list_nodes))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
