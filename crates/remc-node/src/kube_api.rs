//! [`PodApi`] over a Kubernetes cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, PostParams};
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::pod::PodApi;

fn driver_error(e: kube::Error) -> NodeError {
    NodeError::Driver(format!("kubernetes: {e}"))
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

/// Namespaced pod and config map access.
#[derive(Clone)]
pub struct KubePodApi {
    pods: Api<Pod>,
    config_maps: Api<ConfigMap>,
}

impl KubePodApi {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
        }
    }

    /// Connect with the in-cluster or kubeconfig credentials.
    pub async fn connect(namespace: &str) -> NodeResult<Self> {
        let client = kube::Client::try_default().await.map_err(driver_error)?;
        debug!(%namespace, "kubernetes client ready");
        Ok(Self::new(client, namespace))
    }
}

#[async_trait]
impl PodApi for KubePodApi {
    async fn create_bundle(&self, bundle: &ConfigMap) -> NodeResult<()> {
        self.config_maps
            .create(&PostParams::default(), bundle)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn delete_bundle(&self, name: &str) -> NodeResult<()> {
        match self.config_maps.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(driver_error(e)),
        }
    }

    async fn create_pod(&self, pod: &Pod) -> NodeResult<()> {
        self.pods
            .create(&PostParams::default(), pod)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> NodeResult<Option<Pod>> {
        self.pods.get_opt(name).await.map_err(driver_error)
    }

    async fn delete_pod(&self, name: &str) -> NodeResult<()> {
        match self.pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(driver_error(e)),
        }
    }
}
