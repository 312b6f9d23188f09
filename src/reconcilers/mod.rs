// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for topohub resources.
//!
//! Each reconciler takes the shared [`Context`](crate::context::Context) and one
//! object, and returns the [`Action`](kube::runtime::controller::Action) for the
//! controller runtime. The work that does not need a live API server is split
//! into plain async functions over the store traits, so it can be tested with
//! the in-memory fakes.
//!
//! # Available Reconcilers
//!
//! ## DHCP
//!
//! - [`reconcile_subnet`] - Starts, updates, and stops per-subnet DHCP servers
//! - [`reconcile_bindingip`] - Feeds static bindings to the subnet manager
//!
//! ## Hosts
//!
//! - [`reconcile_hostendpoint`] - Creates the status record of a declared host
//! - [`reconcile_redfishstatus`] - Keeps the Redfish connection cache current
//! - [`reconcile_sshstatus`] - Keeps the SSH connection cache current
//! - [`reconcile_secret`] - Propagates credential rotations to cached hosts
//! - [`reconcile_hostoperation`] - Runs one-shot BMC power actions

pub mod bindingip;
pub mod finalizers;
pub mod hostendpoint;
pub mod hostoperation;
pub mod redfishstatus;
pub mod retry;
pub mod secret;
pub mod sshstatus;
pub mod status;
pub mod subnet;

#[cfg(test)]
mod mod_tests;

pub use bindingip::{admit_binding, reconcile_bindingip};
pub use hostendpoint::reconcile_hostendpoint;
pub use hostoperation::reconcile_hostoperation;
pub use redfishstatus::reconcile_redfishstatus;
pub use secret::reconcile_secret;
pub use sshstatus::reconcile_sshstatus;
pub use subnet::reconcile_subnet;

use crate::connection_cache::Credentials;
use crate::store::{CredentialSource, StoreError};

/// Credentials of the secret a host refers to.
///
/// A host without a secret gets empty credentials; the protocol decides
/// whether it can log in with them.
///
/// # Errors
///
/// Returns the lookup error when the secret is named but unreadable.
pub async fn credentials_for(
    source: &dyn CredentialSource,
    name: &str,
    namespace: &str,
) -> Result<Credentials, StoreError> {
    if name.is_empty() {
        return Ok(Credentials::new("", ""));
    }
    source.credentials(name, namespace).await
}
