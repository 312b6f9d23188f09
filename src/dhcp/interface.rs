// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host interface provisioning for a subnet.
//!
//! [`provision_interface`] brings the base link up, optionally creates a VLAN
//! sub-interface `<base>.<vlanId>`, checks that the requested address does not
//! collide with an address on another link, and assigns it idempotently.
//! Every check that can reject the configuration runs before anything is
//! created on the host.
//!
//! Link access goes through [`LinkManager`]. [`IpLinkManager`] drives the
//! `ip` tool; `MemoryLinkManager` is an in-memory host for tests.

use crate::constants::{MAX_INTERFACE_NAME_LEN, MAX_VLAN_ID};
use crate::crd::InterfaceConfig;
use crate::dhcp_errors::InterfaceError;
use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info};

/// A network link and its IPv4 addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub up: bool,
    pub addresses: Vec<Ipv4Net>,
}

/// Operations on host network links.
#[async_trait]
pub trait LinkManager: Send + Sync {
    async fn links(&self) -> Result<Vec<LinkInfo>, InterfaceError>;

    async fn set_up(&self, name: &str) -> Result<(), InterfaceError>;

    async fn add_vlan(&self, parent: &str, name: &str, vlan_id: u16) -> Result<(), InterfaceError>;

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<(), InterfaceError>;

    async fn link(&self, name: &str) -> Result<Option<LinkInfo>, InterfaceError> {
        Ok(self.links().await?.into_iter().find(|l| l.name == name))
    }
}

/// Name of the link the daemon listens on, validated.
///
/// # Errors
///
/// Returns [`InterfaceError::InvalidVlanId`] or [`InterfaceError::NameTooLong`].
pub fn listen_interface_name(config: &InterfaceConfig) -> Result<String, InterfaceError> {
    match vlan_id(config)? {
        Some(vlan) => {
            let name = format!("{}.{vlan}", config.interface);
            if name.len() > MAX_INTERFACE_NAME_LEN {
                return Err(InterfaceError::NameTooLong {
                    name,
                    max: MAX_INTERFACE_NAME_LEN,
                });
            }
            Ok(name)
        }
        None => Ok(config.interface.clone()),
    }
}

/// VLAN tag, or `None` when unset or zero.
fn vlan_id(config: &InterfaceConfig) -> Result<Option<u16>, InterfaceError> {
    match config.vlan_id {
        None | Some(0) => Ok(None),
        Some(id) => u16::try_from(id)
            .ok()
            .filter(|id| *id <= MAX_VLAN_ID)
            .map(Some)
            .ok_or(InterfaceError::InvalidVlanId { vlan_id: id }),
    }
}

/// Parse the interface address in CIDR notation.
///
/// # Errors
///
/// Returns [`InterfaceError::InvalidAddress`].
pub fn parse_interface_address(address: &str) -> Result<Ipv4Net, InterfaceError> {
    address
        .parse::<Ipv4Net>()
        .map_err(|e| InterfaceError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Reject `requested` if it overlaps an address on any link other than `target`.
fn check_conflicts(links: &[LinkInfo], target: &str, requested: Ipv4Net) -> Result<(), InterfaceError> {
    for link in links.iter().filter(|l| l.name != target) {
        for existing in &link.addresses {
            if existing.contains(&requested.addr()) || requested.contains(&existing.addr()) {
                return Err(InterfaceError::AddressConflict {
                    address: requested.to_string(),
                    existing: existing.to_string(),
                    link: link.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Prepare the host link for a subnet and return its name.
///
/// # Errors
///
/// Returns an [`InterfaceError`] describing the first failed step.
pub async fn provision_interface(
    links: &dyn LinkManager,
    config: &InterfaceConfig,
) -> Result<String, InterfaceError> {
    let address = parse_interface_address(&config.ipv4)?;
    let target = listen_interface_name(config)?;
    let vlan = vlan_id(config)?;

    let all = links.links().await?;
    let base = all
        .iter()
        .find(|l| l.name == config.interface)
        .ok_or_else(|| InterfaceError::NotFound {
            name: config.interface.clone(),
        })?;

    check_conflicts(&all, &target, address)?;

    if !base.up {
        info!(interface = %base.name, "Base interface is down, bringing it up");
        links.set_up(&base.name).await?;
    }

    if let Some(vlan) = vlan {
        match all.iter().find(|l| l.name == target) {
            Some(existing) if existing.up => {
                debug!(interface = %target, "VLAN interface already exists");
            }
            Some(_) => links.set_up(&target).await?,
            None => {
                info!(interface = %target, parent = %config.interface, vlan = vlan, "Creating VLAN interface");
                links.add_vlan(&config.interface, &target, vlan).await?;
                links.set_up(&target).await?;
            }
        }
    }

    let configured = links
        .link(&target)
        .await?
        .ok_or_else(|| InterfaceError::NotFound {
            name: target.clone(),
        })?;
    if configured.addresses.contains(&address) {
        debug!(interface = %target, address = %address, "Address already configured");
    } else {
        info!(interface = %target, address = %address, "Assigning address");
        links.add_address(&target, address).await?;
    }

    Ok(target)
}

// ============================================================================
// `ip` tool implementation
// ============================================================================

#[derive(Deserialize)]
struct IpAddrShow {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    family: String,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    prefixlen: Option<u8>,
}

/// Parse the output of `ip -j addr show`.
///
/// # Errors
///
/// Returns [`InterfaceError::CommandFailed`] if the JSON does not parse.
pub fn parse_ip_addr_json(json: &str) -> Result<Vec<LinkInfo>, InterfaceError> {
    let entries: Vec<IpAddrShow> =
        serde_json::from_str(json).map_err(|e| InterfaceError::CommandFailed {
            command: "ip -j addr show".to_string(),
            reason: e.to_string(),
        })?;

    Ok(entries
        .into_iter()
        .map(|entry| LinkInfo {
            up: entry.flags.iter().any(|f| f == "UP"),
            addresses: entry
                .addr_info
                .iter()
                .filter(|a| a.family == "inet")
                .filter_map(|a| {
                    let ip: Ipv4Addr = a.local.as_deref()?.parse().ok()?;
                    Ipv4Net::new(ip, a.prefixlen?).ok()
                })
                .collect(),
            name: entry.ifname,
        })
        .collect())
}

/// [`LinkManager`] backed by iproute2.
#[derive(Debug, Default, Clone)]
pub struct IpLinkManager;

impl IpLinkManager {
    async fn run(args: &[&str]) -> Result<String, InterfaceError> {
        let command = format!("ip {}", args.join(" "));
        debug!(command = %command, "Running link command");

        let output = Command::new("ip")
            .args(args)
            .output()
            .await
            .map_err(|e| InterfaceError::CommandFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(InterfaceError::CommandFailed {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl LinkManager for IpLinkManager {
    async fn links(&self) -> Result<Vec<LinkInfo>, InterfaceError> {
        parse_ip_addr_json(&Self::run(&["-j", "addr", "show"]).await?)
    }

    async fn set_up(&self, name: &str) -> Result<(), InterfaceError> {
        Self::run(&["link", "set", "dev", name, "up"]).await.map(|_| ())
    }

    async fn add_vlan(&self, parent: &str, name: &str, vlan_id: u16) -> Result<(), InterfaceError> {
        let id = vlan_id.to_string();
        Self::run(&["link", "add", "link", parent, "name", name, "type", "vlan", "id", &id])
            .await
            .map(|_| ())
    }

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<(), InterfaceError> {
        let address = address.to_string();
        Self::run(&["addr", "add", &address, "dev", name]).await.map(|_| ())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryLinkManager;

#[cfg(any(test, feature = "test-util"))]
mod memory {
    use super::{LinkInfo, LinkManager};
    use crate::dhcp_errors::InterfaceError;
    use async_trait::async_trait;
    use ipnet::Ipv4Net;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    /// Simulated host links.
    #[derive(Default)]
    pub struct MemoryLinkManager {
        links: Mutex<BTreeMap<String, LinkInfo>>,
        mutations: Mutex<Vec<String>>,
    }

    impl MemoryLinkManager {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a link, e.g. `("eth1", true, &["10.1.0.5/16"])`.
        pub async fn with_link(self, name: &str, up: bool, addresses: &[&str]) -> Self {
            self.links.lock().await.insert(
                name.to_string(),
                LinkInfo {
                    name: name.to_string(),
                    up,
                    addresses: addresses.iter().filter_map(|a| a.parse().ok()).collect(),
                },
            );
            self
        }

        /// Changes applied so far, e.g. `add_vlan eth1.100`.
        pub async fn mutations(&self) -> Vec<String> {
            self.mutations.lock().await.clone()
        }

        pub async fn get(&self, name: &str) -> Option<LinkInfo> {
            self.links.lock().await.get(name).cloned()
        }

        async fn note(&self, what: String) {
            self.mutations.lock().await.push(what);
        }
    }

    #[async_trait]
    impl LinkManager for MemoryLinkManager {
        async fn links(&self) -> Result<Vec<LinkInfo>, InterfaceError> {
            Ok(self.links.lock().await.values().cloned().collect())
        }

        async fn set_up(&self, name: &str) -> Result<(), InterfaceError> {
            self.links
                .lock()
                .await
                .get_mut(name)
                .ok_or_else(|| InterfaceError::NotFound {
                    name: name.to_string(),
                })?
                .up = true;
            self.note(format!("set_up {name}")).await;
            Ok(())
        }

        async fn add_vlan(&self, parent: &str, name: &str, _vlan_id: u16) -> Result<(), InterfaceError> {
            let mut links = self.links.lock().await;
            if !links.contains_key(parent) {
                return Err(InterfaceError::NotFound {
                    name: parent.to_string(),
                });
            }
            links.insert(
                name.to_string(),
                LinkInfo {
                    name: name.to_string(),
                    up: false,
                    addresses: Vec::new(),
                },
            );
            drop(links);
            self.note(format!("add_vlan {name}")).await;
            Ok(())
        }

        async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<(), InterfaceError> {
            self.links
                .lock()
                .await
                .get_mut(name)
                .ok_or_else(|| InterfaceError::NotFound {
                    name: name.to_string(),
                })?
                .addresses
                .push(address);
            self.note(format!("add_address {name} {address}")).await;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "interface_tests.rs"]
mod interface_tests;
