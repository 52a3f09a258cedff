//! Health probe used by `Job::watch`.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tracing::debug;

use crate::error::{HealthError, HealthResult};
use crate::proto;
use crate::proto::health_check_response::ServingStatus as ProtoStatus;
use crate::proto::health_client::HealthClient;

/// Status reported by a control node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    /// Sampling in progress.
    Serving,
    /// The run finished successfully.
    Success,
    /// The run finished with an error.
    Failed,
    Unknown,
}

impl ServingStatus {
    /// Anything but `Serving` ends a watch.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServingStatus::Serving)
    }
}

impl From<ProtoStatus> for ServingStatus {
    fn from(status: ProtoStatus) -> Self {
        match status {
            ProtoStatus::Serving => ServingStatus::Serving,
            ProtoStatus::Success => ServingStatus::Success,
            ProtoStatus::Failed => ServingStatus::Failed,
            ProtoStatus::Unknown => ServingStatus::Unknown,
        }
    }
}

impl From<ServingStatus> for ProtoStatus {
    fn from(status: ServingStatus) -> Self {
        match status {
            ServingStatus::Serving => ProtoStatus::Serving,
            ServingStatus::Success => ProtoStatus::Success,
            ServingStatus::Failed => ProtoStatus::Failed,
            ServingStatus::Unknown => ProtoStatus::Unknown,
        }
    }
}

/// One health check against a control node.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `address` is `host:port` of the control node's health endpoint.
    async fn check(&self, address: &str, service: &str) -> HealthResult<ServingStatus>;
}

/// tonic client for `remc.health.v1.Health`.
#[derive(Debug, Clone)]
pub struct GrpcHealthProbe {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for GrpcHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

impl GrpcHealthProbe {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for GrpcHealthProbe {
    async fn check(&self, address: &str, service: &str) -> HealthResult<ServingStatus> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|_| HealthError::InvalidAddress(address.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);
        let channel = endpoint.connect().await?;
        let mut client = HealthClient::new(channel);

        let response = client
            .check(proto::HealthCheckRequest {
                service: service.to_string(),
            })
            .await?
            .into_inner();

        let status = ServingStatus::from(response.status());
        debug!(%address, %service, ?status, "health check");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::HealthService;
    use tokio_stream::wrappers::TcpListenerStream;

    async fn spawn_server(service: HealthService) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service.into_service())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        addr.to_string()
    }

    #[test]
    fn only_serving_is_non_terminal() {
        assert!(!ServingStatus::Serving.is_terminal());
        assert!(ServingStatus::Success.is_terminal());
        assert!(ServingStatus::Failed.is_terminal());
        assert!(ServingStatus::Unknown.is_terminal());
    }

    #[tokio::test]
    async fn probe_reads_reported_status() {
        let service = HealthService::new();
        let reporter = service.reporter();
        reporter.set("remc.controller", ServingStatus::Serving).await;
        let addr = spawn_server(service).await;

        let probe = GrpcHealthProbe::default();
        let status = probe.check(&addr, "remc.controller").await.unwrap();
        assert_eq!(status, ServingStatus::Serving);

        reporter.set("remc.controller", ServingStatus::Success).await;
        let status = probe.check(&addr, "remc.controller").await.unwrap();
        assert_eq!(status, ServingStatus::Success);
    }

    #[tokio::test]
    async fn unknown_service_is_not_transient() {
        let addr = spawn_server(HealthService::new()).await;

        let err = GrpcHealthProbe::default()
            .check(&addr, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Rpc(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_node_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let probe = GrpcHealthProbe::new(Duration::from_millis(200), Duration::from_millis(200));
        let err = probe.check(&addr, "remc.controller").await.unwrap_err();
        assert!(err.is_transient());
    }
}
