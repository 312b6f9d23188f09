// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host status synchronization over BMC (Redfish) and SSH.
//!
//! # Module Organization
//!
//! - [`synchronizer`] - Protocol-independent engine: probe a host, compare, write its status
//! - [`log_digest`] - Bounded summary of a BMC event log and the new entries to announce
//! - [`redfish`] - Redfish capability over HTTPS and the `RedfishStatus` record
//! - [`ssh`] - SSH capability and the `SshStatus` record
//! - [`fake`] - Scriptable protocol for tests
//!
//! A protocol is split in two traits. [`HostProtocol`] dials a host described
//! by a [`HostConnection`]; the resulting [`HostSession`] answers health, info,
//! log, power, and command requests. The record a protocol maintains is
//! described by [`HostStatusRecord`].

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod log_digest;
pub mod redfish;
pub mod ssh;
pub mod synchronizer;

use crate::connection_cache::HostConnection;
use crate::crd::{HostAction, LogDigest};
use crate::dhcp::DhcpClientInfo;
use crate::host_errors::HostError;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use synchronizer::{DhcpDefaults, HostStatusSynchronizer};

/// Facts reported by a host, e.g. `PowerState` or `Kernel`.
pub type HostInfo = BTreeMap<String, String>;

/// One entry of a management controller's event log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Creation time as reported by the controller
    pub created: String,
    /// `OK`, `Warning`, `Critical`, or empty
    pub severity: String,
    pub sensor_type: String,
    pub message: String,
}

impl LogEntry {
    /// Any severity other than `OK` or empty counts as a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        !self.severity.is_empty() && self.severity != "OK"
    }

    /// `[created][severity]: sensorType message`
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[{}][{}]: {} {}",
            self.created, self.severity, self.sensor_type, self.message
        )
    }
}

/// Dials hosts of one management protocol.
#[async_trait]
pub trait HostProtocol: Send + Sync + 'static {
    type Session: HostSession + 'static;

    /// Short protocol name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Connect and authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the host is unreachable, slow, or rejects
    /// the credentials.
    async fn connect(&self, endpoint: &HostConnection) -> Result<Self::Session, HostError>;
}

/// An authenticated connection to a host.
#[async_trait]
pub trait HostSession: Send + Sync {
    async fn is_healthy(&self) -> bool;

    async fn info(&self) -> Result<HostInfo, HostError>;

    /// Event log entries, newest first.
    async fn logs(&self) -> Result<Vec<LogEntry>, HostError> {
        Ok(Vec::new())
    }

    async fn power(&self, _action: HostAction) -> Result<(), HostError> {
        Err(HostError::Unsupported("power control"))
    }

    async fn run_command(&self, _command: &str) -> Result<String, HostError> {
        Err(HostError::Unsupported("remote commands"))
    }
}

/// Status record kept for each host of a protocol.
pub trait HostStatusRecord: Clone + Default + PartialEq + Send + Sync + 'static {
    /// Record kind, e.g. `RedfishStatus`.
    const KIND: &'static str;

    fn healthy(&self) -> bool;
    fn set_healthy(&mut self, healthy: bool);
    fn info(&self) -> &HostInfo;
    fn set_info(&mut self, info: HostInfo);
    fn set_last_update_time(&mut self, time: String);

    /// Log digest, for records that keep one.
    fn log_digest(&self) -> Option<&LogDigest> {
        None
    }

    fn set_log_digest(&mut self, _digest: LogDigest) {}

    /// Equal in everything except the update timestamp.
    fn same_state(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.set_last_update_time(String::new());
        b.set_last_update_time(String::new());
        a == b
    }
}

/// Records that are created for hosts discovered through DHCP.
pub trait DhcpDiscovered: HostStatusRecord {
    /// Initial record for a reachable DHCP client.
    fn for_dhcp_client(client: &DhcpClientInfo, endpoint: &HostConnection) -> Self;

    /// Apply the latest lease facts. Returns `true` on change.
    fn refresh_lease(&mut self, client: &DhcpClientInfo) -> bool;

    /// Mark the lease as gone. Returns `true` on change.
    fn deactivate(&mut self) -> bool;
}
