// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Condition types, reasons, and operation states written to topohub resources.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   hostNode: worker-1
//!   conditions:
//!     - type: DhcpServer
//!       status: "True"
//!       reason: hostChange
//!       message: "dhcp server is hosted by node worker-1"
//!     - type: DhcpServer
//!       status: "False"
//!       reason: Failed
//!       message: "failed to setup interface eth1.100: ..."
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Condition describing the DHCP daemon serving a subnet
pub const CONDITION_TYPE_DHCP_SERVER: &str = "DhcpServer";

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition holds
pub const STATUS_TRUE: &str = "True";

/// Condition does not hold
pub const STATUS_FALSE: &str = "False";

// ============================================================================
// Subnet Reasons
// ============================================================================

/// The DHCP daemon moved to another node.
pub const REASON_HOST_CHANGE: &str = "hostChange";

/// Starting or updating the DHCP daemon failed.
///
/// The message carries the provisioning or process error. The subnet stays
/// in this degraded state until the next successful reconcile.
pub const REASON_FAILED: &str = "Failed";

// ============================================================================
// HostOperation States
// ============================================================================

/// Operation accepted but not yet executed
pub const OPERATION_PENDING: &str = "Pending";

/// Operation executed successfully
pub const OPERATION_SUCCESS: &str = "Success";

/// Operation failed
pub const OPERATION_FAILED: &str = "Failed";

// ============================================================================
// Event Types
// ============================================================================

/// Kubernetes event type for informational events
pub const EVENT_TYPE_NORMAL: &str = "Normal";

/// Kubernetes event type for warnings
pub const EVENT_TYPE_WARNING: &str = "Warning";

/// Message for a `hostChange` condition.
#[must_use]
pub fn host_change_message(node: &str) -> String {
    format!("dhcp server is hosted by node {node}")
}
