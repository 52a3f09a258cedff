//! `remcd serve`: the API server.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use remc_core::{JobStatus, RemcConfig};
use remc_tasks::Orchestrator;

use crate::wiring;

pub async fn run(config: Arc<RemcConfig>, bind: Option<String>) -> anyhow::Result<()> {
    info!("REMC daemon starting");

    let orchestrator = wiring::orchestrator(Arc::clone(&config)).await?;
    resume_watches(&orchestrator)?;

    let router = remc_api::build_router(orchestrator);
    let addr = bind.unwrap_or_else(|| config.api.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("REMC daemon stopped");
    Ok(())
}

/// Watches die with the process; pick them up again for every job the
/// store still has as running.
fn resume_watches(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    for job in orchestrator.list_jobs()? {
        if job.status != JobStatus::Running {
            continue;
        }
        info!(job_id = %job.id, "resuming watch");
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.watch(&job.id).await {
                Ok(success) => info!(job_id = %job.id, success, "watch finished"),
                Err(e) => error!(job_id = %job.id, error = %e, "watch failed"),
            }
        });
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
