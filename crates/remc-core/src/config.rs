//! remc.toml configuration parser.
//!
//! Every section is optional; missing keys fall back to the defaults
//! below. The `storage`, `controller` and `logging` sections are also
//! rendered to TOML and shipped to VM nodes during provisioning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemcConfig {
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub orchestrator: OrchestratorConfig,
    pub controller: ControllerConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub vm: VmConfig,
    pub pod: PodConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file.
    pub path: PathBuf,
    /// Prefix under which workers upload results (e.g. `s3://bucket/remc`).
    pub results_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/remc/remc.redb"),
            results_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Width of the worker-creation pool used by `start()`.
    pub pool_width: usize,
    /// Lifetime of a job lease before another task may steal it.
    pub lease_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_width: 10,
            lease_ttl_secs: 3600,
        }
    }
}

impl OrchestratorConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Port the control node serves its health endpoint on.
    pub port: u16,
    /// Service name passed to `Check`.
    pub health_service: String,
    pub watch_interval_ms: u64,
    /// Upper bound on a single watch. `None` polls until a terminal state.
    pub watch_timeout_secs: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: 50051,
            health_service: "remc.controller".to_string(),
            watch_interval_ms: 1000,
            watch_timeout_secs: None,
        }
    }
}

impl ControllerConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn watch_timeout(&self) -> Option<Duration> {
        self.watch_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub image: String,
    pub cpus: u32,
    pub memory: String,
    pub disk: String,
    /// Working directory created on every VM.
    pub remote_dir: String,
    pub ssh_user: String,
    pub ssh_public_key: PathBuf,
    pub ssh_private_key: PathBuf,
    pub init_script: String,
    pub install_script: String,
    pub worker_command: String,
    pub controller_command: String,
    pub launch_timeout_secs: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            image: "24.04".to_string(),
            cpus: 2,
            memory: "4G".to_string(),
            disk: "20G".to_string(),
            remote_dir: "/opt/remc".to_string(),
            ssh_user: "ubuntu".to_string(),
            ssh_public_key: PathBuf::from("/etc/remc/id_ed25519.pub"),
            ssh_private_key: PathBuf::from("/etc/remc/id_ed25519"),
            init_script: "set -e\napt-get update -y\napt-get install -y docker.io\n".to_string(),
            install_script: "set -e\npip install --upgrade remc-worker\n".to_string(),
            worker_command: "docker run -d --network host -v /opt/remc:/opt/remc remc/worker:latest"
                .to_string(),
            controller_command:
                "docker run -d --network host -v /opt/remc:/opt/remc remc/controller:latest"
                    .to_string(),
            launch_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodConfig {
    pub namespace: String,
    pub sidecar_image: String,
    pub user_code_image: String,
    pub worker_image: String,
    pub controller_image: String,
    pub ssh_public_key: PathBuf,
    pub ssh_private_key: PathBuf,
    pub install_script: String,
    /// How long `create()` waits for the pod to report `Running`.
    pub ready_timeout_secs: u64,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            namespace: "remc".to_string(),
            sidecar_image: "remc/sshd-sidecar:latest".to_string(),
            user_code_image: "remc/user-code:latest".to_string(),
            worker_image: "remc/worker:latest".to_string(),
            controller_image: "remc/controller:latest".to_string(),
            ssh_public_key: PathBuf::from("/etc/remc/id_ed25519.pub"),
            ssh_private_key: PathBuf::from("/etc/remc/id_ed25519"),
            install_script: "set -e\npip install --upgrade remc-worker\n".to_string(),
            ready_timeout_secs: 300,
        }
    }
}

impl RemcConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: RemcConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.orchestrator.pool_width == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.pool_width must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn storage_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.storage)?)
    }

    pub fn controller_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.controller)?)
    }

    pub fn logging_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.logging)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: RemcConfig = toml::from_str("").unwrap();
        assert_eq!(config.orchestrator.pool_width, 10);
        assert_eq!(config.controller.port, 50051);
        assert_eq!(config.controller.watch_interval(), Duration::from_secs(1));
        assert!(config.controller.watch_timeout().is_none());
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_parse_partial_section() {
        let toml_str = r#"
[orchestrator]
pool_width = 4

[controller]
watch_timeout_secs = 7200

[pod]
namespace = "sampling"
"#;
        let config: RemcConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.orchestrator.pool_width, 4);
        assert_eq!(config.orchestrator.lease_ttl_secs, 3600);
        assert_eq!(config.controller.watch_timeout(), Some(Duration::from_secs(7200)));
        assert_eq!(config.pod.namespace, "sampling");
        assert_eq!(config.pod.sidecar_image, "remc/sshd-sidecar:latest");
    }

    #[test]
    fn test_from_file_rejects_zero_pool_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remc.toml");
        std::fs::write(&path, "[orchestrator]\npool_width = 0\n").unwrap();

        let err = RemcConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = RemcConfig::from_file(Path::new("/nonexistent/remc.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_node_artifacts_render() {
        let config = RemcConfig::default();
        assert!(config.controller_toml().unwrap().contains("port = 50051"));
        assert!(config.logging_toml().unwrap().contains("level = \"info\""));
        assert!(config.storage_toml().unwrap().contains("remc.redb"));
    }
}
