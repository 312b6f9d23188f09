// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for bare-metal host management.
//!
//! All resources are cluster-scoped and live in the `topohub.infrastructure.io/v1beta1`
//! API group.
//!
//! # Resource Types
//!
//! ## DHCP
//!
//! - [`Subnet`] - One DHCP service domain: address range, interface, feature toggles
//! - [`BindingIp`] - A static IP to MAC reservation inside a subnet
//!
//! ## Hosts
//!
//! - [`HostEndpoint`] - A statically declared BMC or SSH endpoint
//! - [`RedfishStatus`] - Derived state of a host reachable through Redfish
//! - [`SshStatus`] - Derived state of a host reachable through SSH
//! - [`HostOperation`] - A one-shot power action against a `RedfishStatus` host
//!
//! # Example: Declaring a Subnet
//!
//! ```rust,no_run
//! use topohub::crd::{InterfaceConfig, Ipv4SubnetConfig, SubnetSpec};
//!
//! let spec = SubnetSpec {
//!     ipv4_subnet: Ipv4SubnetConfig {
//!         subnet: "192.168.1.0/24".to_string(),
//!         ip_range: "192.168.1.100-192.168.1.200".to_string(),
//!         gateway: Some("192.168.1.1".to_string()),
//!         dns: None,
//!     },
//!     interface: InterfaceConfig {
//!         interface: "eth1".to_string(),
//!         vlan_id: Some(100),
//!         ipv4: "192.168.1.2/24".to_string(),
//!     },
//!     feature: None,
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic status condition.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `DhcpServer`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// Subnet
// ============================================================================

/// IPv4 addressing served by a subnet's DHCP daemon.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4SubnetConfig {
    /// Subnet in CIDR notation, e.g. `192.168.1.0/24`.
    pub subnet: String,

    /// Comma-separated address ranges, e.g. `192.168.1.10-192.168.1.20,192.168.1.30`.
    pub ip_range: String,

    /// Default gateway handed out to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// DNS server handed out to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

/// Host interface the daemon listens on.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    /// Base interface name, e.g. `eth1`.
    pub interface: String,

    /// Optional 802.1Q tag. A sub-interface `<interface>.<vlanId>` is created when set and non-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 4094))]
    pub vlan_id: Option<i32>,

    /// Address assigned to the (sub-)interface in CIDR notation, e.g. `192.168.1.2/24`.
    pub ipv4: String,
}

/// Discovery of DHCP clients as `RedfishStatus` hosts.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRedfishStatusConfig {
    /// Create a `RedfishStatus` for every DHCP client that answers Redfish.
    #[serde(default)]
    pub enabled: bool,

    /// Pin discovered clients to their current address with a `BindingIp`.
    #[serde(default, rename = "enableBindDhcpIP")]
    pub enable_bind_dhcp_ip: bool,

    /// Cluster label given to discovered hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cluster_name: Option<String>,
}

/// Optional subnet features.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetFeature {
    #[serde(default, rename = "syncRedfishstatus", skip_serializing_if = "Option::is_none")]
    pub sync_redfish_status: Option<SyncRedfishStatusConfig>,

    #[serde(default)]
    pub enable_pxe: bool,

    #[serde(default)]
    pub enable_ztp: bool,

    /// Only answer clients with a static binding.
    #[serde(default)]
    pub enable_dhcp_trusted_only: bool,
}

/// `Subnet` declares one DHCP service domain served from this agent's node.
///
/// # Example
///
/// ```yaml
/// apiVersion: topohub.infrastructure.io/v1beta1
/// kind: Subnet
/// metadata:
///   name: bmc-net
/// spec:
///   ipv4Subnet:
///     subnet: 192.168.1.0/24
///     ipRange: 192.168.1.100-192.168.1.200
///     gateway: 192.168.1.1
///   interface:
///     interface: eth1
///     vlanId: 100
///     ipv4: 192.168.1.2/24
///   feature:
///     enablePxe: true
///     syncRedfishstatus:
///       enabled: true
///       enableBindDhcpIP: true
///       defaultClusterName: rack-a
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "Subnet",
    doc = "Subnet declares a DHCP service domain. The agent provisions the interface, renders the daemon configuration, supervises the daemon, and publishes lease statistics in the status."
)]
#[kube(status = "SubnetStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub ipv4_subnet: Ipv4SubnetConfig,

    pub interface: InterfaceConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<SubnetFeature>,
}

impl SubnetSpec {
    /// Redfish discovery settings, if enabled at all.
    #[must_use]
    pub fn sync_redfish(&self) -> Option<&SyncRedfishStatusConfig> {
        self.feature
            .as_ref()
            .and_then(|f| f.sync_redfish_status.as_ref())
    }

    /// Whether lease events are forwarded to the Redfish synchronizer.
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.sync_redfish().is_some_and(|s| s.enabled)
    }

    /// Whether discovered clients get a `BindingIp`.
    #[must_use]
    pub fn bind_enabled(&self) -> bool {
        self.sync_redfish()
            .is_some_and(|s| s.enabled && s.enable_bind_dhcp_ip)
    }

    /// Cluster label for discovered clients, empty when unset.
    #[must_use]
    pub fn default_cluster_name(&self) -> String {
        self.sync_redfish()
            .and_then(|s| s.default_cluster_name.clone())
            .unwrap_or_default()
    }
}

/// Address accounting for a subnet.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DhcpStatus {
    pub dhcp_ip_total_amount: u64,
    pub dhcp_ip_available_amount: u64,
    pub dhcp_ip_active_amount: u64,
    pub dhcp_ip_bind_amount: u64,
}

/// `Subnet` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_status: Option<DhcpStatus>,

    /// Node currently running this subnet's daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_node: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// JSON map of IP to observed client details.
    #[serde(default)]
    pub dhcp_client_details: String,
}

// ============================================================================
// BindingIp
// ============================================================================

/// `BindingIp` reserves one address of a subnet for one MAC.
///
/// # Example
///
/// ```yaml
/// apiVersion: topohub.infrastructure.io/v1beta1
/// kind: BindingIp
/// metadata:
///   name: 192-168-1-120
/// spec:
///   subnet: bmc-net
///   ipAddr: 192.168.1.120
///   macAddr: "aa:bb:cc:dd:ee:ff"
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "BindingIp",
    doc = "BindingIp reserves an IPv4 address of a Subnet for a single MAC address."
)]
#[serde(rename_all = "camelCase")]
pub struct BindingIpSpec {
    /// Name of the owning `Subnet`.
    pub subnet: String,

    pub ip_addr: String,

    pub mac_addr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

// ============================================================================
// HostEndpoint
// ============================================================================

/// `HostEndpoint` declares a host that is not discovered through DHCP.
///
/// # Example
///
/// ```yaml
/// apiVersion: topohub.infrastructure.io/v1beta1
/// kind: HostEndpoint
/// metadata:
///   name: node-17-bmc
/// spec:
///   ipAddr: 10.20.0.17
///   secretName: bmc-credentials
///   secretNamespace: topohub
///   type: redfish
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "HostEndpoint",
    doc = "HostEndpoint declares a statically addressed BMC (redfish) or SSH endpoint. The agent maintains a RedfishStatus or SshStatus of the same name."
)]
#[serde(rename_all = "camelCase")]
pub struct HostEndpointSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    pub ip_addr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,

    /// Redfish over HTTPS. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<bool>,

    /// Defaults to 443 for redfish and 22 for ssh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 65535))]
    pub port: Option<i32>,

    /// `redfish` (default) or `ssh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

// ============================================================================
// RedfishStatus
// ============================================================================

/// A single BMC log line kept in the digest.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntrySummary {
    pub time: String,
    pub message: String,
}

/// Bounded summary of a BMC's event log.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogDigest {
    #[serde(default, rename = "totalLogAccount")]
    pub total: i32,

    #[serde(default, rename = "warningLogAccount")]
    pub warnings: i32,

    #[serde(default, rename = "lastestLog", skip_serializing_if = "Option::is_none")]
    pub latest: Option<LogEntrySummary>,

    #[serde(
        default,
        rename = "lastestWarningLog",
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_warning: Option<LogEntrySummary>,
}

/// Connection facts of a Redfish host.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedfishBasicInfo {
    #[serde(default)]
    pub cluster_name: String,

    /// `dhcp` or `hostendpoint`.
    pub r#type: String,

    pub ip_addr: String,

    #[serde(default)]
    pub secret_name: String,

    #[serde(default)]
    pub secret_namespace: String,

    #[serde(default)]
    pub https: bool,

    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default)]
    pub active_dhcp_client: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_expire_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// `RedfishStatus` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedfishHostStatus {
    #[serde(default)]
    pub healthy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    pub basic: RedfishBasicInfo,

    #[serde(default)]
    pub info: BTreeMap<String, String>,

    #[serde(default)]
    pub log: LogDigest,
}

/// `RedfishStatus` carries no desired state; everything lives in the status.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "RedfishStatus",
    doc = "RedfishStatus is the agent-maintained state of a host reachable through its BMC: connectivity, inventory, and a digest of the BMC event log."
)]
#[kube(status = "RedfishHostStatus")]
pub struct RedfishStatusSpec {}

// ============================================================================
// SshStatus
// ============================================================================

/// Connection facts of an SSH host.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshBasicInfo {
    #[serde(default)]
    pub cluster_name: String,

    pub r#type: String,

    pub ip_addr: String,

    #[serde(default)]
    pub secret_name: String,

    #[serde(default)]
    pub secret_namespace: String,

    pub port: i32,

    /// Authenticated with a private key rather than a password.
    #[serde(default)]
    pub ssh_key_auth: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,
}

/// `SshStatus` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshHostStatus {
    #[serde(default)]
    pub healthy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    pub basic: SshBasicInfo,

    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "SshStatus",
    doc = "SshStatus is the agent-maintained state of a host reachable over SSH."
)]
#[kube(status = "SshHostStatus")]
pub struct SshStatusSpec {}

// ============================================================================
// HostOperation
// ============================================================================

/// Power action requested by a `HostOperation`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum HostAction {
    On,
    ForceOn,
    ForceOff,
    GracefulShutdown,
    ForceRestart,
    GracefulRestart,
    /// One-time PXE boot override followed by a restart.
    PxeReboot,
}

impl HostAction {
    /// Redfish `ResetType` for plain power actions. `None` for composite actions.
    #[must_use]
    pub fn reset_type(self) -> Option<&'static str> {
        match self {
            Self::On => Some("On"),
            Self::ForceOn => Some("ForceOn"),
            Self::ForceOff => Some("ForceOff"),
            Self::GracefulShutdown => Some("GracefulShutdown"),
            Self::ForceRestart => Some("ForceRestart"),
            Self::GracefulRestart => Some("GracefulRestart"),
            Self::PxeReboot => None,
        }
    }
}

/// `HostOperation` runs one power action against a `RedfishStatus` host.
///
/// # Example
///
/// ```yaml
/// apiVersion: topohub.infrastructure.io/v1beta1
/// kind: HostOperation
/// metadata:
///   name: reboot-node-17
/// spec:
///   action: PxeReboot
///   redfishStatusName: node-17-bmc
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "topohub.infrastructure.io",
    version = "v1beta1",
    kind = "HostOperation",
    doc = "HostOperation requests a single power action (On, ForceOff, GracefulRestart, PxeReboot, ...) against the BMC of a RedfishStatus host."
)]
#[kube(status = "HostOperationStatus")]
#[serde(rename_all = "camelCase")]
pub struct HostOperationSpec {
    pub action: HostAction,

    pub redfish_status_name: String,
}

/// `HostOperation` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostOperationStatus {
    /// `Pending`, `Success`, or `Failed`.
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub last_update_time: String,

    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub ip_addr: String,

    #[serde(default)]
    pub message: String,
}
