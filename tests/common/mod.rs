// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests

#![allow(dead_code)]

use kube::client::Client;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use topohub::config::AgentConfig;

pub const FEATURE_YAML: &str = r"
redfishPort: 443
redfishHttps: true
redfishSecretname: bmc-default
redfishSecretNamespace: topohub
redfishStatusUpdateInterval: 60
sshStatusUpdateInterval: 60
dhcpServerInterface: eth1
";

pub const TEMPLATE: &str = "interface={{ interface }}\n\
    {% for range in ip_ranges %}dhcp-range={{ range }}\n{% endfor %}";

/// Load an [`AgentConfig`] rooted at `dir`, with the feature file and DHCP
/// template written there first.
pub fn agent_config(dir: &TempDir) -> AgentConfig {
    let root = dir.path();
    std::fs::write(root.join("feature-config.yaml"), FEATURE_YAML).unwrap();
    let template = root.join("dnsmasq.conf.j2");
    std::fs::write(&template, TEMPLATE).unwrap();

    let env = HashMap::from([
        ("POD_NAMESPACE", "topohub".to_string()),
        ("NODE_NAME", "worker-1".to_string()),
        ("STORAGE_PATH", path_str(root)),
        ("FEATURE_CONFIG_PATH", path_str(root)),
        ("DHCP_CONFIG_TEMPLATE_PATH", path_str(&template)),
    ]);
    let config = AgentConfig::from_lookup(|key| env.get(key).cloned()).unwrap();
    config.ensure_storage_dirs().unwrap();
    config
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}
