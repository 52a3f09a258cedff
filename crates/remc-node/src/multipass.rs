//! Multipass implementation of [`ComputeDriver`].
//!
//! Shells out to the `multipass` binary via [`tokio::process::Command`].

use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use remc_core::config::VmConfig;

use crate::error::{NodeError, NodeResult};
use crate::vm::{CommandOutput, ComputeDriver, InstanceInfo, InstanceState, RemoteFile};

/// Sizing parameters passed to `multipass launch`.
#[derive(Debug, Clone)]
pub struct MultipassDriver {
    image: String,
    cpus: String,
    memory: String,
    disk: String,
    timeout_secs: String,
}

impl MultipassDriver {
    pub fn new(config: &VmConfig) -> Self {
        Self {
            image: config.image.clone(),
            cpus: config.cpus.to_string(),
            memory: config.memory.clone(),
            disk: config.disk.clone(),
            timeout_secs: config.launch_timeout_secs.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> NodeResult<Output> {
        debug!(?args, "multipass");
        tokio::process::Command::new("multipass")
            .args(args)
            .output()
            .await
            .map_err(|e| NodeError::Driver(format!("failed to run multipass {}: {e}", args[0])))
    }

    async fn run_checked(&self, args: &[&str]) -> NodeResult<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(NodeError::Driver(format!(
                "multipass {} failed: {}",
                args[0],
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

fn command_output(output: Output) -> CommandOutput {
    CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn is_missing(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("does not exist")
}

/// Map the `state` string of `multipass info`.
pub fn parse_state(state: &str) -> InstanceState {
    match state {
        "Starting" => InstanceState::Pending,
        "Running" => InstanceState::Running,
        "Restarting" => InstanceState::Rebooting,
        "Stopped" | "Suspended" | "Suspending" => InstanceState::Stopped,
        "Deleted" => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

/// Parse `multipass info <name> --format json`.
pub fn parse_info(name: &str, raw: &[u8]) -> NodeResult<Option<InstanceInfo>> {
    let doc: serde_json::Value = serde_json::from_slice(raw)?;
    let Some(entry) = doc.get("info").and_then(|info| info.get(name)) else {
        return Ok(None);
    };
    let state = entry
        .get("state")
        .and_then(|s| s.as_str())
        .map(parse_state)
        .unwrap_or(InstanceState::Unknown);
    let address = entry
        .get("ipv4")
        .and_then(|ips| ips.as_array())
        .and_then(|ips| ips.first())
        .and_then(|ip| ip.as_str())
        .map(str::to_string);
    Ok(Some(InstanceInfo { state, address }))
}

#[async_trait]
impl ComputeDriver for MultipassDriver {
    async fn launch(&self, name: &str) -> NodeResult<()> {
        self.run_checked(&[
            "launch",
            &self.image,
            "--name",
            name,
            "--cpus",
            &self.cpus,
            "--memory",
            &self.memory,
            "--disk",
            &self.disk,
            "--timeout",
            &self.timeout_secs,
        ])
        .await?;
        Ok(())
    }

    async fn info(&self, name: &str) -> NodeResult<Option<InstanceInfo>> {
        let output = self.run(&["info", name, "--format", "json"]).await?;
        if !output.status.success() {
            if is_missing(&output.stderr) {
                return Ok(None);
            }
            return Err(NodeError::Driver(format!(
                "multipass info failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_info(name, &output.stdout)
    }

    async fn exec(&self, name: &str, script: &str) -> NodeResult<CommandOutput> {
        let output = self
            .run(&["exec", name, "--", "sudo", "bash", "-c", script])
            .await?;
        Ok(command_output(output))
    }

    async fn write_file(&self, name: &str, file: &RemoteFile) -> NodeResult<CommandOutput> {
        let redirect = if file.append { ">>" } else { ">" };
        let script = format!(
            "cat {redirect} '{path}' && chmod {mode:o} '{path}'",
            path = file.path,
            mode = file.mode
        );
        let mut child = tokio::process::Command::new("multipass")
            .args(["exec", name, "--", "sudo", "sh", "-c", &script])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NodeError::Driver(format!("failed to spawn multipass exec: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&file.contents)
                .await
                .map_err(|e| NodeError::Driver(format!("write to {}: {e}", file.path)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NodeError::Driver(format!("failed to wait for multipass exec: {e}")))?;
        Ok(command_output(output))
    }

    async fn restart(&self, name: &str) -> NodeResult<()> {
        self.run_checked(&["restart", name]).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> NodeResult<()> {
        let output = self.run(&["delete", "--purge", name]).await?;
        if output.status.success() || is_missing(&output.stderr) {
            return Ok(());
        }
        Err(NodeError::Driver(format!(
            "multipass delete failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
