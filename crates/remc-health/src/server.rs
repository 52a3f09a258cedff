//! Server side of the health protocol, mounted by controller processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::probe::ServingStatus;
use crate::proto;
use crate::proto::health_check_response::ServingStatus as ProtoStatus;
use crate::proto::health_server::{Health, HealthServer};

type StatusMap = Arc<RwLock<HashMap<String, ServingStatus>>>;

/// gRPC health service answering from an in-memory status table.
#[derive(Clone, Default)]
pub struct HealthService {
    statuses: StatusMap,
}

/// Handle used by the controller to publish its status.
#[derive(Clone)]
pub struct HealthReporter {
    statuses: StatusMap,
}

impl HealthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(&self) -> HealthReporter {
        HealthReporter {
            statuses: Arc::clone(&self.statuses),
        }
    }

    /// Wrap into a tonic service for `Server::add_service`.
    pub fn into_service(self) -> HealthServer<Self> {
        HealthServer::new(self)
    }
}

impl HealthReporter {
    pub async fn set(&self, service: &str, status: ServingStatus) {
        debug!(%service, ?status, "health status updated");
        self.statuses
            .write()
            .await
            .insert(service.to_string(), status);
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        let service = request.into_inner().service;
        let statuses = self.statuses.read().await;
        let status = statuses
            .get(&service)
            .copied()
            .ok_or_else(|| Status::not_found(format!("unknown service: {service}")))?;

        Ok(Response::new(proto::HealthCheckResponse {
            status: ProtoStatus::from(status) as i32,
        }))
    }
}
