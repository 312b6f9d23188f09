// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Embedded DHCP service, one daemon per `Subnet`.
//!
//! # Module Organization
//!
//! - [`interface`] - Base link, VLAN sub-interface, and address provisioning
//! - [`config_render`] - Daemon config rendered from a minijinja template
//! - [`lease`] - Lease file parsing and snapshot diffing
//! - [`bindings`] - Static bindings merged with leases, binding file, status counters
//! - [`supervisor`] - Per-subnet daemon lifecycle: start, liveness, reload, restart
//!
//! Data flows from the lease file through [`lease::diff_leases`] into the
//! supervisor's snapshot, which [`bindings`] turns into the host-binding file and
//! the `Subnet` status. Lease events are forwarded to the Redfish host status
//! synchronizer when the subnet enables status sync.

pub mod bindings;
pub mod config_render;
pub mod interface;
pub mod lease;
pub mod supervisor;

pub use bindings::{BindingMap, ManualBinding, StatusReport};
pub use lease::{DhcpClientInfo, LeaseEvent, LeaseEventKind};
pub use supervisor::{
    DaemonLauncher, DhcpSupervisor, DnsmasqLauncher, SupervisorDeps, SupervisorTiming,
};
