// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Daemon configuration rendering.
//!
//! The template is loaded from `DHCP_CONFIG_TEMPLATE_PATH` and rendered with
//! minijinja. Variables available to the template:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `interface` | Listening link, `<base>.<vlan>` for tagged subnets |
//! | `ip_ranges` | Ranges in daemon syntax, `start,end` |
//! | `gateway`, `dns` | Optional router and DNS options |
//! | `lease_file`, `log_file` | Daemon-owned files |
//! | `enable_pxe`, `enable_ztp`, `enable_trusted_only` | Feature toggles |
//! | `name` | Subnet name |
//! | `self_ip` | Interface address without prefix |
//! | `tftp_server_dir`, `pxe_efi_in_tftp_server_dir` | TFTP layout |
//! | `host_ip_bindings_config_path` | Host-binding file |

use super::bindings::{parse_ip_ranges, write_atomic};
use super::interface::{listen_interface_name, parse_interface_address};
use crate::config::AgentConfig;
use crate::crd::SubnetSpec;
use crate::dhcp_errors::DhcpError;
use minijinja::Environment;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files owned by one subnet's daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubnetPaths {
    pub config: PathBuf,
    pub lease: PathBuf,
    pub log: PathBuf,
    pub bindings: PathBuf,
}

impl SubnetPaths {
    #[must_use]
    pub fn new(config: &AgentConfig, subnet: &str) -> Self {
        Self {
            config: config.dhcp_config_dir().join(format!("{subnet}.conf")),
            lease: config.lease_dir().join(format!("{subnet}.leases")),
            log: config.dhcp_log_dir().join(format!("{subnet}.log")),
            bindings: config
                .dhcp_config_dir()
                .join(format!("{subnet}-bindings.conf")),
        }
    }
}

/// Values handed to the template.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TemplateData {
    pub interface: String,
    pub ip_ranges: Vec<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
    pub lease_file: String,
    pub log_file: String,
    pub enable_pxe: bool,
    pub enable_ztp: bool,
    pub enable_trusted_only: bool,
    pub name: String,
    pub self_ip: String,
    pub tftp_server_dir: String,
    pub pxe_efi_in_tftp_server_dir: String,
    pub host_ip_bindings_config_path: String,
}

impl TemplateData {
    /// Collect template values for `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`DhcpError`] if the interface, address, or ranges are invalid.
    pub fn build(
        name: &str,
        spec: &SubnetSpec,
        paths: &SubnetPaths,
        config: &AgentConfig,
    ) -> Result<Self, DhcpError> {
        let interface = listen_interface_name(&spec.interface)?;
        let self_ip = parse_interface_address(&spec.interface.ipv4)?.addr().to_string();
        let ip_ranges = parse_ip_ranges(&spec.ipv4_subnet.ip_range)?
            .into_iter()
            .map(|(start, end)| format!("{start},{end}"))
            .collect();
        let feature = spec.feature.clone().unwrap_or_default();

        Ok(Self {
            interface,
            ip_ranges,
            gateway: spec.ipv4_subnet.gateway.clone(),
            dns: spec.ipv4_subnet.dns.clone(),
            lease_file: paths.lease.display().to_string(),
            log_file: paths.log.display().to_string(),
            enable_pxe: feature.enable_pxe,
            enable_ztp: feature.enable_ztp,
            enable_trusted_only: feature.enable_dhcp_trusted_only,
            name: name.to_string(),
            self_ip,
            tftp_server_dir: config.tftp_dir().display().to_string(),
            pxe_efi_in_tftp_server_dir: config.pxe_efi_dir().display().to_string(),
            host_ip_bindings_config_path: paths.bindings.display().to_string(),
        })
    }
}

/// Render `template` with `data`.
///
/// # Errors
///
/// Returns [`DhcpError::Template`] on a syntax or render error.
pub fn render_template(
    template_path: &Path,
    template: &str,
    data: &TemplateData,
) -> Result<String, DhcpError> {
    let to_err = |e: minijinja::Error| DhcpError::Template {
        path: template_path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut env = Environment::new();
    env.add_template("dhcp", template).map_err(to_err)?;
    env.get_template("dhcp")
        .and_then(|tmpl| tmpl.render(data))
        .map_err(to_err)
}

/// Load the template, render it, and write the daemon config atomically.
///
/// # Errors
///
/// Returns [`DhcpError`] if the template cannot be read or rendered, or the
/// config file cannot be written.
pub async fn write_daemon_config(
    template_path: &Path,
    data: &TemplateData,
    config_path: &Path,
) -> Result<(), DhcpError> {
    let template = tokio::fs::read_to_string(template_path)
        .await
        .map_err(|e| DhcpError::Template {
            path: template_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let rendered = render_template(template_path, &template, data)?;
    debug!(subnet = %data.name, config = %rendered, "Rendered daemon config");

    write_atomic(config_path, &rendered).await?;
    info!(subnet = %data.name, path = %config_path.display(), "Wrote daemon config");
    Ok(())
}

#[cfg(test)]
#[path = "config_render_tests.rs"]
mod config_render_tests;
