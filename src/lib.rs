// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Topohub - bare-metal fleet agent for Kubernetes
//!
//! Topohub runs DHCP servers for provisioning subnets and keeps an inventory
//! of the machines behind them, talking Redfish to BMCs and SSH to hosts.
//! Everything is driven by cluster-scoped custom resources.
//!
//! ## Modules
//!
//! - [`crd`] - `Subnet`, `BindingIp`, `HostEndpoint`, `RedfishStatus`, `SshStatus`
//!   and `HostOperation` resource types
//! - [`config`] - Agent configuration from the environment and the feature file
//! - [`dhcp`] - Per-subnet DHCP server supervision, leases and bindings
//! - [`subnet_manager`] - Owns the running DHCP servers and routes binding events
//! - [`host_status`] - Redfish and SSH protocols and the generic status synchronizer
//! - [`connection_cache`] - Known hosts and the credentials used to reach them
//! - [`store`] - Record store traits with Kubernetes and in-memory implementations
//! - [`reconcilers`] - One reconciler per watched resource
//!
//! ## Example
//!
//! ```rust,no_run
//! use topohub::crd::BindingIpSpec;
//! use topohub::dhcp::ManualBinding;
//!
//! let spec = BindingIpSpec {
//!     ip_addr: "10.20.0.17".to_string(),
//!     mac_addr: "aa:bb:cc:dd:ee:17".to_string(),
//!     subnet: "provisioning".to_string(),
//!     hostname: Some("node-17".to_string()),
//! };
//! let binding = ManualBinding::from(&spec);
//! assert_eq!(binding.hostname, "node-17");
//! ```

pub mod config;
pub mod connection_cache;
pub mod constants;
pub mod context;
pub mod crd;
pub mod dhcp;
pub mod dhcp_errors;
pub mod host_errors;
pub mod host_status;
pub mod labels;
pub mod lock;
pub mod metrics;
pub mod reconcilers;
pub mod status_reasons;
pub mod store;
pub mod subnet_manager;

#[cfg(test)]
mod dhcp_errors_tests;
#[cfg(test)]
mod host_errors_tests;
#[cfg(test)]
mod lock_tests;
#[cfg(test)]
mod status_reasons_tests;
