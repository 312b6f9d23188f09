// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Static bindings merged with live leases.
//!
//! Two outputs are derived from the same inputs:
//!
//! - the daemon's host-binding file, one `dhcp-host=<MAC>,<IP>` line per
//!   static binding, optionally preceded by `# hostname <name>`;
//! - the per-IP client view and address counters published in the `Subnet`
//!   status.
//!
//! A static binding always wins over a lease for the same IP. A MAC mismatch
//! between the two is logged as a conflict and the static MAC is kept.

use super::lease::LeaseSnapshot;
use crate::crd::{BindingIpSpec, DhcpStatus, SubnetStatus};
use crate::dhcp_errors::DhcpError;
use crate::reconcilers::status::{append_condition, create_condition};
use crate::status_reasons::{
    host_change_message, CONDITION_TYPE_DHCP_SERVER, REASON_HOST_CHANGE, STATUS_TRUE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{error, info};

/// An administrator-declared IP to MAC reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualBinding {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    pub subnet: String,
}

impl From<&BindingIpSpec> for ManualBinding {
    fn from(spec: &BindingIpSpec) -> Self {
        Self {
            ip: spec.ip_addr.clone(),
            mac: spec.mac_addr.clone(),
            hostname: spec.hostname.clone().unwrap_or_default(),
            subnet: spec.subnet.clone(),
        }
    }
}

/// Static bindings keyed by IP.
pub type BindingMap = BTreeMap<String, ManualBinding>;

/// One entry of `dhcpClientDetails`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetail {
    pub mac: String,
    pub is_bound: bool,
    pub is_allocated: bool,
    pub hostname: String,
    pub dhcp_expire_time: String,
}

/// A lease whose MAC disagrees with the static binding for its IP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingConflict {
    pub ip: String,
    pub bound_mac: String,
    pub leased_mac: String,
}

/// Static bindings and leases merged per IP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedView {
    pub clients: BTreeMap<String, ClientDetail>,
    pub conflicts: Vec<BindingConflict>,
}

impl MergedView {
    /// JSON map of IP to [`ClientDetail`]; `{}` when empty.
    #[must_use]
    pub fn to_json(&self) -> String {
        if self.clients.is_empty() {
            return "{}".to_string();
        }
        serde_json::to_string(&self.clients).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize client details");
            "{}".to_string()
        })
    }
}

/// Render the host-binding file.
#[must_use]
pub fn render_bindings(bindings: &BindingMap) -> String {
    let mut lines = Vec::with_capacity(bindings.len() * 2);
    for binding in bindings.values() {
        if !binding.hostname.is_empty() {
            lines.push(format!("# hostname {}", binding.hostname));
        }
        lines.push(format!("dhcp-host={},{}", binding.mac, binding.ip));
    }
    lines.join("\n") + "\n"
}

/// Merge static bindings and leases into one view per IP.
#[must_use]
pub fn merge_client_view(leases: &LeaseSnapshot, bindings: &BindingMap) -> MergedView {
    let mut view = MergedView::default();

    for (ip, binding) in bindings {
        view.clients.insert(
            ip.clone(),
            ClientDetail {
                mac: binding.mac.clone(),
                is_bound: true,
                is_allocated: false,
                hostname: binding.hostname.clone(),
                dhcp_expire_time: String::new(),
            },
        );
    }

    for (ip, lease) in leases {
        match view.clients.get_mut(ip) {
            Some(existing) => {
                if !existing.mac.eq_ignore_ascii_case(&lease.mac) {
                    error!(
                        ip = %ip,
                        bound_mac = %existing.mac,
                        leased_mac = %lease.mac,
                        "IP is bound to a different MAC than the one holding its lease"
                    );
                    view.conflicts.push(BindingConflict {
                        ip: ip.clone(),
                        bound_mac: existing.mac.clone(),
                        leased_mac: lease.mac.clone(),
                    });
                }
                existing.is_allocated = true;
                existing.hostname.clone_from(&lease.hostname);
                existing.dhcp_expire_time = lease.expire_time_rfc3339();
            }
            None => {
                view.clients.insert(
                    ip.clone(),
                    ClientDetail {
                        mac: lease.mac.clone(),
                        is_bound: false,
                        is_allocated: true,
                        hostname: lease.hostname.clone(),
                        dhcp_expire_time: lease.expire_time_rfc3339(),
                    },
                );
            }
        }
    }

    view
}

/// Parse `a.b.c.d-e.f.g.h,i.j.k.l` into inclusive `(start, end)` pairs.
///
/// # Errors
///
/// Returns [`DhcpError::InvalidRange`] for an unparsable address or a
/// range whose end precedes its start.
pub fn parse_ip_ranges(ranges: &str) -> Result<Vec<(Ipv4Addr, Ipv4Addr)>, DhcpError> {
    let invalid = |range: &str, reason: String| DhcpError::InvalidRange {
        range: range.to_string(),
        reason,
    };

    let mut parsed = Vec::new();
    for entry in ranges.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        let (start, end) = match entry.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (entry, entry),
        };
        let start: Ipv4Addr = start
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid(entry, e.to_string()))?;
        let end: Ipv4Addr = end
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid(entry, e.to_string()))?;
        if u32::from(end) < u32::from(start) {
            return Err(invalid(entry, "end address precedes start".to_string()));
        }
        parsed.push((start, end));
    }

    if parsed.is_empty() {
        return Err(invalid(ranges, "no address range given".to_string()));
    }
    Ok(parsed)
}

/// Number of addresses covered by `ranges`.
///
/// # Errors
///
/// See [`parse_ip_ranges`].
pub fn count_range(ranges: &str) -> Result<u64, DhcpError> {
    Ok(parse_ip_ranges(ranges)?
        .iter()
        .map(|(start, end)| u64::from(u32::from(*end) - u32::from(*start)) + 1)
        .sum())
}

/// Address counters for a subnet.
///
/// `available = total - |merged|`, saturating at zero.
#[must_use]
pub fn compute_dhcp_status(
    total: u64,
    view: &MergedView,
    leases: &LeaseSnapshot,
    bindings: &BindingMap,
) -> DhcpStatus {
    let used = view.clients.len() as u64;
    DhcpStatus {
        dhcp_ip_total_amount: total,
        dhcp_ip_available_amount: total.saturating_sub(used),
        dhcp_ip_active_amount: leases.len() as u64,
        dhcp_ip_bind_amount: bindings.len() as u64,
    }
}

/// Everything a supervisor publishes for its subnet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub dhcp_status: DhcpStatus,
    pub client_details: String,
    pub node_name: String,
}

impl StatusReport {
    /// Build a report from the supervisor's current state.
    ///
    /// An unparsable range counts as zero addresses.
    #[must_use]
    pub fn build(ip_range: &str, leases: &LeaseSnapshot, bindings: &BindingMap, node_name: &str) -> Self {
        let total = count_range(ip_range).unwrap_or_else(|e| {
            error!(range = %ip_range, error = %e, "Failed to count addresses in range");
            0
        });
        let view = merge_client_view(leases, bindings);
        Self {
            dhcp_status: compute_dhcp_status(total, &view, leases, bindings),
            client_details: view.to_json(),
            node_name: node_name.to_string(),
        }
    }
}

/// Apply `report` to `current`. Returns `None` when nothing would change.
///
/// A new hosting node appends a `DhcpServer/True/hostChange` condition.
#[must_use]
pub fn merge_subnet_status(current: &SubnetStatus, report: &StatusReport) -> Option<SubnetStatus> {
    let mut updated = current.clone();
    updated.dhcp_status = Some(report.dhcp_status.clone());
    updated.dhcp_client_details.clone_from(&report.client_details);

    if updated.host_node.as_deref() != Some(report.node_name.as_str()) {
        info!(node = %report.node_name, "Subnet is now served from this node");
        updated.host_node = Some(report.node_name.clone());
        append_condition(
            &mut updated.conditions,
            create_condition(
                CONDITION_TYPE_DHCP_SERVER,
                STATUS_TRUE,
                REASON_HOST_CHANGE,
                &host_change_message(&report.node_name),
            ),
        );
    }

    (updated != *current).then_some(updated)
}

/// Write `content` to `path` through a sibling temp file and a rename.
///
/// # Errors
///
/// Returns [`DhcpError::Io`] if the parent directory, temp file, or rename fails.
pub async fn write_atomic(path: &Path, content: &str) -> Result<(), DhcpError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DhcpError::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| DhcpError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DhcpError::io(path, e))
}

/// Create an empty file at `path` unless one exists.
///
/// # Errors
///
/// Returns [`DhcpError::Io`] if the file cannot be created.
pub async fn ensure_file(path: &Path) -> Result<(), DhcpError> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| DhcpError::io(path, e))?
    {
        return Ok(());
    }
    write_atomic(path, "").await?;
    info!(path = %path.display(), "Created empty bindings file");
    Ok(())
}

#[cfg(test)]
#[path = "bindings_tests.rs"]
mod bindings_tests;
