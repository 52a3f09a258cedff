//! Assemble an orchestrator from the configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use remc_core::RemcConfig;
use remc_health::GrpcHealthProbe;
use remc_node::{BackendRegistry, KubePodApi, MultipassDriver, PodFactory, VmFactory};
use remc_state::StateStore;
use remc_tasks::Orchestrator;

/// Open the state store and register every backend that can be reached.
pub async fn orchestrator(config: Arc<RemcConfig>) -> anyhow::Result<Orchestrator> {
    let path = &config.storage.path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create state directory {}", parent.display()))?;
    }
    let store = StateStore::open(path)?;
    info!(path = ?path, "state store opened");

    let registry = registry(&config).await;
    info!(backends = ?registry.node_types(), "backends registered");

    let probe = Arc::new(GrpcHealthProbe::default());
    Ok(Orchestrator::new(&config, store, Arc::new(registry), probe))
}

/// The VM backend is always available; the pod backend only when a
/// Kubernetes client can be configured.
async fn registry(config: &Arc<RemcConfig>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();

    let driver = Arc::new(MultipassDriver::new(&config.vm));
    registry.register(Arc::new(VmFactory::new(driver, Arc::clone(config))));

    match KubePodApi::connect(&config.pod.namespace).await {
        Ok(api) => {
            registry.register(Arc::new(PodFactory::new(Arc::new(api), Arc::clone(config))));
        }
        Err(e) => warn!(error = %e, "kubernetes unavailable, pod backend disabled"),
    }
    registry
}
