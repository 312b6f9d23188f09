// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the topohub agent.
//!
//! This module contains the numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for all topohub CRDs
pub const API_GROUP: &str = "topohub.infrastructure.io";

/// API version for all topohub CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "topohub.infrastructure.io/v1beta1";

/// Kind name for `Subnet` resource
pub const KIND_SUBNET: &str = "Subnet";

/// Kind name for `RedfishStatus` resource
pub const KIND_REDFISH_STATUS: &str = "RedfishStatus";

/// Kind name for `SshStatus` resource
pub const KIND_SSH_STATUS: &str = "SshStatus";

/// Kind name for `HostEndpoint` resource
pub const KIND_HOST_ENDPOINT: &str = "HostEndpoint";

/// Kind name for `BindingIp` resource
pub const KIND_BINDING_IP: &str = "BindingIp";

/// Kind name for `HostOperation` resource
pub const KIND_HOST_OPERATION: &str = "HostOperation";

/// Finalizer holding a `Subnet` until its DHCP server is stopped
pub const SUBNET_FINALIZER: &str = "topohub.infrastructure.io/subnet-cleanup";

/// Finalizer holding a `BindingIp` until its binding is withdrawn
pub const BINDING_IP_FINALIZER: &str = "topohub.infrastructure.io/bindingip-cleanup";

// ============================================================================
// Host Types
// ============================================================================

/// Host discovered through a DHCP lease
pub const HOST_TYPE_DHCP: &str = "dhcp";

/// Host declared through a `HostEndpoint`
pub const HOST_TYPE_ENDPOINT: &str = "hostendpoint";

/// `HostEndpoint` management protocol: Redfish BMC
pub const ENDPOINT_TYPE_REDFISH: &str = "redfish";

/// `HostEndpoint` management protocol: SSH
pub const ENDPOINT_TYPE_SSH: &str = "ssh";

// ============================================================================
// Protocol Defaults
// ============================================================================

/// Default Redfish port
pub const DEFAULT_REDFISH_PORT: u16 = 443;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Bound on SSH dial and authentication
pub const SSH_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single Redfish HTTP request
pub const REDFISH_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Event reason used for BMC log entries surfaced on `RedfishStatus`
pub const EVENT_REASON_BMC_LOG: &str = "BMCLogEntry";

/// Attempts for a PXE reboot before giving up
pub const PXE_REBOOT_ATTEMPTS: u32 = 3;

/// Hosts probed concurrently during a status sweep
pub const HOST_SYNC_CONCURRENCY: usize = 16;

// ============================================================================
// DHCP Supervisor Timing
// ============================================================================

/// Interval between daemon liveness probes
pub const DHCP_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Coalescing window for subnet status publishes
pub const DHCP_STATUS_PUBLISH_TICK: Duration = Duration::from_secs(1);

/// Grace period after starting the daemon before the first status publish
pub const DHCP_STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Capacity of the lease and binding event queues
pub const EVENT_QUEUE_CAPACITY: usize = 1000;

/// Delay before resubmitting a lease event that failed transiently
pub const LEASE_EVENT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay before retrying a binding event whose subnet has no supervisor yet
pub const BINDING_EVENT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delay between starting subnet supervisors and replaying binding events on startup
pub const STARTUP_BINDING_REPLAY_DELAY: Duration = Duration::from_secs(2);

/// DHCP daemon executable
pub const DHCP_DAEMON_BINARY: &str = "dnsmasq";

/// Maximum length of a Linux interface name
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Highest usable 802.1Q VLAN id
pub const MAX_VLAN_ID: u16 = 4094;

// ============================================================================
// Controller Requeue Intervals
// ============================================================================

/// Requeue after a failed reconcile of a fast-moving resource
pub const REQUEUE_SHORT_SECS: u64 = 2;

/// Requeue after a failed `SshStatus` reconcile
pub const REQUEUE_SSH_SECS: u64 = 5;

/// Requeue after a failed reconcile of a slow-moving resource
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

// ============================================================================
// Storage Layout
// ============================================================================

/// Lease files, relative to the storage root
pub const STORAGE_LEASE_DIR: &str = "dhcp/lease";

/// Rendered daemon config files, relative to the storage root
pub const STORAGE_CONFIG_DIR: &str = "dhcp/config";

/// Daemon log files, relative to the storage root
pub const STORAGE_LOG_DIR: &str = "dhcp/log";

/// TFTP root, relative to the storage root
pub const STORAGE_TFTP_DIR: &str = "tftp";

/// PXE EFI loader directory, relative to the TFTP root
pub const TFTP_PXE_EFI_DIR: &str = "boot/grub/x86_64-efi";

/// Feature config file name inside `FEATURE_CONFIG_PATH`
pub const FEATURE_CONFIG_FILE: &str = "feature-config.yaml";

// ============================================================================
// Leader Election
// ============================================================================

/// Name of the coordination lease used for leader election
pub const LEADER_LEASE_NAME: &str = "topohub-leader";

/// Lease duration in seconds
pub const LEADER_LEASE_DURATION_SECS: u64 = 15;

/// Grace period in seconds before a lease is considered lost
pub const LEADER_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default metrics listen address
pub const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:8080";
