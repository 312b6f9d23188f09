// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lease file parsing and snapshot diffing.
//!
//! The daemon writes one lease per line:
//!
//! ```text
//! <expiry-epoch> <MAC> <IP> <hostname> <client-id>
//! ```
//!
//! [`parse_leases`] turns the file into a snapshot keyed by IP and
//! [`diff_leases`] compares two snapshots. Every IP whose `(MAC, hostname,
//! expiry)` differs yields exactly one event, and every IP that vanished yields
//! exactly one [`LeaseEventKind::Gone`].

use crate::crd::SubnetSpec;
use crate::dhcp_errors::DhcpError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Hostname written by the daemon when the client sent none
const NO_HOSTNAME: &str = "*";

/// A DHCP client observed in the lease file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhcpClientInfo {
    pub ip: String,
    pub mac: String,
    /// Empty when the client sent no hostname.
    pub hostname: String,
    /// `None` for infinite leases.
    pub expire_time: Option<DateTime<Utc>>,
    /// False once the lease has left the file.
    pub active: bool,
    /// Subnet CIDR
    pub subnet: String,
    pub subnet_name: String,
    pub cluster_name: String,
    /// Pin this client with a `BindingIp` once it is discovered.
    pub enable_bind_ip: bool,
}

impl DhcpClientInfo {
    /// Expiry in RFC3339, empty for infinite leases.
    #[must_use]
    pub fn expire_time_rfc3339(&self) -> String {
        self.expire_time.map(|t| t.to_rfc3339()).unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeaseEventKind {
    Appeared,
    Changed,
    Gone,
}

impl LeaseEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Appeared => "appeared",
            Self::Changed => "changed",
            Self::Gone => "gone",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseEvent {
    pub kind: LeaseEventKind,
    pub client: DhcpClientInfo,
}

/// Subnet facts stamped onto every parsed lease.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseContext {
    pub subnet_cidr: String,
    pub subnet_name: String,
    pub cluster_name: String,
    pub enable_bind_ip: bool,
    /// Forward events to the host status synchronizer.
    pub sync_enabled: bool,
}

impl LeaseContext {
    #[must_use]
    pub fn from_subnet(name: &str, spec: &SubnetSpec) -> Self {
        Self {
            subnet_cidr: spec.ipv4_subnet.subnet.clone(),
            subnet_name: name.to_string(),
            cluster_name: spec.default_cluster_name(),
            enable_bind_ip: spec.bind_enabled(),
            sync_enabled: spec.sync_enabled(),
        }
    }
}

/// Active leases keyed by IP.
pub type LeaseSnapshot = BTreeMap<String, DhcpClientInfo>;

/// Outcome of comparing two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseDiff {
    pub events: Vec<LeaseEvent>,
    /// A client appeared or changed MAC/hostname. Expiry-only renewals do not count.
    pub changed: bool,
}

/// Parse lease file content. Malformed lines are logged and skipped.
#[must_use]
pub fn parse_leases(content: &str, ctx: &LeaseContext) -> LeaseSnapshot {
    let mut snapshot = LeaseSnapshot::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            warn!(subnet = %ctx.subnet_name, line = %line, "Skipping invalid lease line");
            continue;
        }

        let expire_secs: i64 = match fields[0].parse() {
            Ok(secs) => secs,
            Err(e) => {
                warn!(subnet = %ctx.subnet_name, line = %line, error = %e, "Skipping lease with unparsable expiry");
                continue;
            }
        };

        let hostname = match fields[3] {
            NO_HOSTNAME => String::new(),
            name => name.to_string(),
        };

        let client = DhcpClientInfo {
            ip: fields[2].to_string(),
            mac: fields[1].to_lowercase(),
            hostname,
            expire_time: (expire_secs > 0)
                .then(|| DateTime::from_timestamp(expire_secs, 0))
                .flatten(),
            active: true,
            subnet: ctx.subnet_cidr.clone(),
            subnet_name: ctx.subnet_name.clone(),
            cluster_name: ctx.cluster_name.clone(),
            enable_bind_ip: ctx.enable_bind_ip,
        };
        snapshot.insert(client.ip.clone(), client);
    }

    snapshot
}

/// Compare `previous` against `current`.
///
/// Events are ordered by IP: appeared and changed first, then gone.
#[must_use]
pub fn diff_leases(previous: &LeaseSnapshot, current: &LeaseSnapshot) -> LeaseDiff {
    let mut diff = LeaseDiff::default();

    for (ip, client) in current {
        match previous.get(ip) {
            None => {
                debug!(ip = %ip, mac = %client.mac, "DHCP client appeared");
                diff.events.push(LeaseEvent {
                    kind: LeaseEventKind::Appeared,
                    client: client.clone(),
                });
                diff.changed = true;
            }
            Some(old) if old.mac != client.mac || old.hostname != client.hostname => {
                debug!(
                    ip = %ip,
                    old_mac = %old.mac,
                    new_mac = %client.mac,
                    old_hostname = %old.hostname,
                    new_hostname = %client.hostname,
                    "DHCP client changed"
                );
                diff.events.push(LeaseEvent {
                    kind: LeaseEventKind::Changed,
                    client: client.clone(),
                });
                diff.changed = true;
            }
            Some(old) if old.expire_time != client.expire_time => {
                diff.events.push(LeaseEvent {
                    kind: LeaseEventKind::Changed,
                    client: client.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for (ip, old) in previous {
        if !current.contains_key(ip) {
            debug!(ip = %ip, mac = %old.mac, "DHCP client gone");
            let mut gone = old.clone();
            gone.active = false;
            diff.events.push(LeaseEvent {
                kind: LeaseEventKind::Gone,
                client: gone,
            });
        }
    }

    diff
}

/// Read the lease file.
///
/// Returns `None` when the file does not exist and `ignore_missing` is set.
/// Lines that are not valid UTF-8 are dropped with a warning.
///
/// # Errors
///
/// Returns [`DhcpError::Io`] on any other read failure.
pub async fn read_lease_file(path: &Path, ignore_missing: bool) -> Result<Option<String>, DhcpError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(utf8_lines(path, &bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && ignore_missing => {
            debug!(path = %path.display(), "Lease file not present yet");
            Ok(None)
        }
        Err(e) => Err(DhcpError::io(path, e)),
    }
}

fn utf8_lines(path: &Path, bytes: &[u8]) -> String {
    let mut content = String::with_capacity(bytes.len());
    for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
        match std::str::from_utf8(line) {
            Ok(line) => {
                content.push_str(line);
                content.push('\n');
            }
            Err(e) => {
                warn!(path = %path.display(), line = index + 1, error = %e, "Skipping non UTF-8 lease line");
            }
        }
    }
    content
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod lease_tests;
