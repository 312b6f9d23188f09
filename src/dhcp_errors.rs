// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the per-subnet DHCP supervisor.
//!
//! A failure here degrades only the subnet it belongs to. Provisioning and
//! process errors are surfaced as a `DhcpServer` condition on the `Subnet`
//! and retried by the liveness loop or the next reconcile.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing the host network for a subnet.
#[derive(Error, Debug, Clone)]
pub enum InterfaceError {
    /// The base interface does not exist on this node
    #[error("interface '{name}' not found")]
    NotFound {
        /// Interface name
        name: String,
    },

    /// VLAN tag outside 1..=4094
    #[error("invalid VLAN id {vlan_id}: must be between 1 and 4094")]
    InvalidVlanId {
        /// Requested tag
        vlan_id: i32,
    },

    /// `<base>.<vlan>` longer than the kernel allows
    #[error("interface name '{name}' exceeds {max} characters")]
    NameTooLong {
        /// Composed interface name
        name: String,
        /// Kernel limit
        max: usize,
    },

    /// Address is not valid CIDR notation
    #[error("invalid interface address '{address}': {reason}")]
    InvalidAddress {
        /// Requested address
        address: String,
        /// Parse failure
        reason: String,
    },

    /// Address overlaps an address already configured on another link
    #[error("address {address} conflicts with {existing} on interface '{link}'")]
    AddressConflict {
        /// Requested address
        address: String,
        /// Address already present
        existing: String,
        /// Link holding the existing address
        link: String,
    },

    /// The link tool failed
    #[error("'{command}' failed: {reason}")]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// stderr or spawn error
        reason: String,
    },
}

/// Errors raised by the DHCP supervisor.
#[derive(Error, Debug)]
pub enum DhcpError {
    #[error(transparent)]
    Interface(#[from] InterfaceError),

    /// Subnet fields that cannot be turned into a daemon config
    #[error("invalid subnet '{subnet}': {reason}")]
    InvalidSubnet {
        /// Subnet name
        subnet: String,
        /// What is wrong
        reason: String,
    },

    /// `ipRange` entry that is not `a.b.c.d` or `a.b.c.d-e.f.g.h`
    #[error("invalid ip range '{range}': {reason}")]
    InvalidRange {
        /// Offending entry
        range: String,
        /// What is wrong
        reason: String,
    },

    /// Template missing, malformed, or failing to render
    #[error("failed to render template {path}: {reason}")]
    Template {
        /// Template path
        path: PathBuf,
        /// Template engine error
        reason: String,
    },

    /// Daemon could not be started or signalled
    #[error("dhcp daemon for subnet '{subnet}': {reason}")]
    Process {
        /// Subnet name
        subnet: String,
        /// Spawn or signal error
        reason: String,
    },

    /// Local file I/O failure
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The supervisor for this subnet is gone
    #[error("dhcp server for subnet '{0}' is not running")]
    NotRunning(String),
}

impl DhcpError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the condition reason used on the `Subnet` for this error.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Interface(_) => "InterfaceSetupFailed",
            Self::InvalidSubnet { .. } | Self::InvalidRange { .. } => "InvalidSubnet",
            Self::Template { .. } => "ConfigRenderFailed",
            Self::Process { .. } => "ProcessFailed",
            Self::Io { .. } => "StorageFailed",
            Self::NotRunning(_) => "NotRunning",
        }
    }
}
