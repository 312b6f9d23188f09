// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label constants shared by the controllers and the DHCP pipeline.
//!
//! Status records created by the agent carry these labels so that operators can
//! select hosts by address, origin, cluster, or subnet.

// ============================================================================
// Host Record Labels
// ============================================================================

/// Host IPv4 address (dots kept, labels allow them)
pub const IP_ADDR: &str = "topohub.infrastructure.io/ipAddr";

/// How the host was discovered: `dhcp` or `hostendpoint`
pub const MODE: &str = "topohub.infrastructure.io/mode";

/// Whether the DHCP lease backing this host is still active
pub const DHCP_IP_ACTIVE: &str = "topohub.infrastructure.io/dhcp-ip-active";

/// Cluster the host belongs to
pub const CLUSTER_NAME: &str = "topohub.infrastructure.io/cluster-name";

/// Subnet that handed out the host's lease
pub const SUBNET_NAME: &str = "topohub.infrastructure.io/subnet-name";

/// `RedfishStatus` a `BindingIp` was created for
pub const REDFISH_STATUS_OWNER: &str = "topohub.infrastructure.io/redfishstatus";

// ============================================================================
// Secret Labels
// ============================================================================

/// Secrets carrying host credentials are labelled with this key
pub const SECRET_CREDENTIAL: &str = "topohub.io/secret-credential";

// ============================================================================
// Label Values
// ============================================================================

/// `dhcp-ip-active` value for a live lease
pub const VALUE_TRUE: &str = "true";

/// `dhcp-ip-active` value for an expired lease
pub const VALUE_FALSE: &str = "false";

/// Field manager used for server-side patches
pub const FIELD_MANAGER: &str = "topohub";
