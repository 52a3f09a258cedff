//! Kubernetes objects of a pod node: its config bundle and its pod.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

use remc_core::NodeRole;
use remc_core::config::PodConfig;

use crate::error::NodeResult;

/// Where the bundle is mounted in every container.
pub const BUNDLE_MOUNT: &str = "/etc/remc";

pub fn bundle_name(node: &str) -> String {
    format!("{node}-bundle")
}

fn labels(node: &str, role: NodeRole) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "remc".to_string()),
        ("remc/node".to_string(), node.to_string()),
        ("remc/role".to_string(), role.as_str().to_string()),
    ])
}

/// Files shipped to the node through the bundle.
pub struct BundleFiles<'a> {
    pub install_script: &'a str,
    pub job_spec: &'a str,
    pub public_key: &'a str,
    pub private_key: &'a str,
}

pub fn bundle(node: &str, role: NodeRole, namespace: &str, files: &BundleFiles<'_>) -> ConfigMap {
    let data = BTreeMap::from([
        ("install.sh".to_string(), files.install_script.to_string()),
        ("job_spec.json".to_string(), files.job_spec.to_string()),
        ("id_ed25519.pub".to_string(), files.public_key.to_string()),
        ("id_ed25519".to_string(), files.private_key.to_string()),
    ]);
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(bundle_name(node)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(node, role)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// The node pod: an sshd sidecar, the user-code container and the
/// worker or controller container. Only the controller has a readiness
/// probe, a TCP check on the control port.
pub fn pod(
    node: &str,
    role: NodeRole,
    config: &PodConfig,
    control_port: u16,
    entrypoint: &str,
) -> NodeResult<Pod> {
    let mount = json!([{ "name": "bundle", "mountPath": BUNDLE_MOUNT, "readOnly": true }]);
    let image = match role {
        NodeRole::Worker => &config.worker_image,
        NodeRole::Controller => &config.controller_image,
    };
    let command = format!("sh {BUNDLE_MOUNT}/install.sh && exec {entrypoint}");

    let mut main = json!({
        "name": role.as_str(),
        "image": image,
        "command": ["sh", "-c", command],
        "volumeMounts": mount,
    });
    if role.is_controller() {
        main["ports"] = json!([{ "containerPort": control_port, "name": "control" }]);
        main["readinessProbe"] = json!({
            "tcpSocket": { "port": control_port },
            "initialDelaySeconds": 5,
            "periodSeconds": 5,
        });
    }

    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": node,
            "namespace": config.namespace,
            "labels": labels(node, role),
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [
                {
                    "name": "sidecar",
                    "image": config.sidecar_image,
                    "ports": [{ "containerPort": 22, "name": "ssh" }],
                    "volumeMounts": mount,
                },
                {
                    "name": "user-code",
                    "image": config.user_code_image,
                    "volumeMounts": mount,
                },
                main,
            ],
            "volumes": [{ "name": "bundle", "configMap": { "name": bundle_name(node) } }],
        },
    });
    Ok(serde_json::from_value(manifest)?)
}
