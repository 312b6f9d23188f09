// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Agent configuration.
//!
//! [`AgentConfig`] is loaded once at startup from the environment plus
//! `<FEATURE_CONFIG_PATH>/feature-config.yaml` and shared read-only afterwards.
//!
//! # Environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `POD_NAMESPACE` | Namespace of the agent pod, also the leader lease namespace |
//! | `NODE_NAME` | Node the agent runs on |
//! | `STORAGE_PATH` | Root for leases, rendered configs, logs, and TFTP files |
//! | `FEATURE_CONFIG_PATH` | Directory holding `feature-config.yaml` |
//! | `DHCP_CONFIG_TEMPLATE_PATH` | Daemon config template |
//! | `METRICS_BIND_ADDRESS` | Optional, defaults to `0.0.0.0:8080` |

use crate::constants::{
    DEFAULT_METRICS_ADDRESS, DEFAULT_REDFISH_PORT, FEATURE_CONFIG_FILE, STORAGE_CONFIG_DIR,
    STORAGE_LEASE_DIR, STORAGE_LOG_DIR, STORAGE_TFTP_DIR, TFTP_PXE_EFI_DIR,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingEnv(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid feature config: {0}")]
    Invalid(String),

    #[error("storage path {0} does not exist")]
    MissingStorage(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings read from `feature-config.yaml`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureConfig {
    #[serde(default = "default_redfish_port")]
    pub redfish_port: u16,

    #[serde(default = "default_true")]
    pub redfish_https: bool,

    /// Secret with the default BMC credentials for DHCP-discovered hosts.
    #[serde(default, rename = "redfishSecretname")]
    pub redfish_secret_name: String,

    #[serde(default)]
    pub redfish_secret_namespace: String,

    /// Seconds between Redfish sweeps.
    #[serde(default = "default_interval")]
    pub redfish_status_update_interval: u64,

    /// Seconds between SSH sweeps.
    #[serde(default = "default_interval")]
    pub ssh_status_update_interval: u64,

    pub dhcp_server_interface: String,
}

fn default_redfish_port() -> u16 {
    DEFAULT_REDFISH_PORT
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

impl FeatureConfig {
    /// Parse and validate the YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `dhcpServerInterface` is empty or an
    /// interval is zero.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.dhcp_server_interface.trim().is_empty() {
            return Err(ConfigError::Invalid("dhcpServerInterface is empty".into()));
        }
        if config.redfish_status_update_interval == 0 || config.ssh_status_update_interval == 0 {
            return Err(ConfigError::Invalid(
                "status update intervals must be positive".into(),
            ));
        }
        Ok(config)
    }
}

/// Immutable agent configuration.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub pod_namespace: String,
    pub node_name: String,
    pub storage_path: PathBuf,
    pub feature_config_path: PathBuf,
    pub dhcp_config_template_path: PathBuf,
    pub metrics_bind_address: String,
    pub feature: FeatureConfig,
}

impl AgentConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or the feature file
    /// cannot be read or parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AgentConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingEnv(key))
        };

        let pod_namespace = required("POD_NAMESPACE")?;
        let node_name = required("NODE_NAME")?;
        let storage_path = PathBuf::from(required("STORAGE_PATH")?);
        let feature_config_path = PathBuf::from(required("FEATURE_CONFIG_PATH")?);
        let dhcp_config_template_path = PathBuf::from(required("DHCP_CONFIG_TEMPLATE_PATH")?);
        let metrics_bind_address = lookup("METRICS_BIND_ADDRESS")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_METRICS_ADDRESS.to_string());

        let feature_file = feature_config_path.join(FEATURE_CONFIG_FILE);
        let content =
            std::fs::read_to_string(&feature_file).map_err(|source| ConfigError::Read {
                path: feature_file.clone(),
                source,
            })?;
        let feature = FeatureConfig::from_yaml(&content, &feature_file)?;
        debug!(?feature, "Loaded feature config");

        Ok(Self {
            pod_namespace,
            node_name,
            storage_path,
            feature_config_path,
            dhcp_config_template_path,
            metrics_bind_address,
            feature,
        })
    }

    #[must_use]
    pub fn lease_dir(&self) -> PathBuf {
        self.storage_path.join(STORAGE_LEASE_DIR)
    }

    #[must_use]
    pub fn dhcp_config_dir(&self) -> PathBuf {
        self.storage_path.join(STORAGE_CONFIG_DIR)
    }

    #[must_use]
    pub fn dhcp_log_dir(&self) -> PathBuf {
        self.storage_path.join(STORAGE_LOG_DIR)
    }

    #[must_use]
    pub fn tftp_dir(&self) -> PathBuf {
        self.storage_path.join(STORAGE_TFTP_DIR)
    }

    #[must_use]
    pub fn pxe_efi_dir(&self) -> PathBuf {
        self.tftp_dir().join(TFTP_PXE_EFI_DIR)
    }

    #[must_use]
    pub fn redfish_interval(&self) -> Duration {
        Duration::from_secs(self.feature.redfish_status_update_interval)
    }

    #[must_use]
    pub fn ssh_interval(&self) -> Duration {
        Duration::from_secs(self.feature.ssh_status_update_interval)
    }

    /// Create the storage layout under `STORAGE_PATH`.
    ///
    /// # Errors
    ///
    /// Fails if the storage root is missing or a subdirectory cannot be created.
    pub fn ensure_storage_dirs(&self) -> Result<(), ConfigError> {
        if !self.storage_path.is_dir() {
            return Err(ConfigError::MissingStorage(self.storage_path.clone()));
        }
        for dir in [
            self.lease_dir(),
            self.dhcp_config_dir(),
            self.dhcp_log_dir(),
            self.tftp_dir(),
            self.pxe_efi_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| ConfigError::CreateDir { path: dir, source })?;
        }
        info!(storage = %self.storage_path.display(), "Storage directories ready");
        Ok(())
    }
}

/// Configuration rooted at `storage` for unit tests.
#[cfg(test)]
pub(crate) fn test_agent_config(storage: &Path, template: &Path) -> AgentConfig {
    AgentConfig {
        pod_namespace: "topohub".to_string(),
        node_name: "node-a".to_string(),
        storage_path: storage.to_path_buf(),
        feature_config_path: storage.to_path_buf(),
        dhcp_config_template_path: template.to_path_buf(),
        metrics_bind_address: DEFAULT_METRICS_ADDRESS.to_string(),
        feature: FeatureConfig {
            redfish_port: DEFAULT_REDFISH_PORT,
            redfish_https: true,
            redfish_secret_name: "bmc-default".to_string(),
            redfish_secret_namespace: "topohub".to_string(),
            redfish_status_update_interval: 60,
            ssh_status_update_interval: 60,
            dhcp_server_interface: "eth1".to_string(),
        },
    }
}
