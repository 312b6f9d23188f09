// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Credential secret reconciliation.
//!
//! The controller only watches secrets labelled
//! [`SECRET_CREDENTIAL`](crate::labels::SECRET_CREDENTIAL). When one changes,
//! every cached host of either protocol that logs in with it gets the new
//! credentials and is probed again.

use crate::connection_cache::Credentials;
use crate::context::Context;
use crate::host_status::synchronizer::HostStatusSynchronizer;
use crate::host_status::{HostProtocol, HostStatusRecord};
use crate::store::credentials_from_secret;
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconcile one credential secret.
///
/// # Errors
///
/// Never fails; an unusable secret is logged and left alone.
pub async fn reconcile_secret(ctx: Arc<Context>, secret: Arc<Secret>) -> Result<Action> {
    let name = secret.name_any();
    let namespace = secret.namespace().unwrap_or_default();

    let credentials = match credentials_from_secret(&secret) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(secret = %name, namespace = %namespace, error = %e, "Ignoring unusable credential secret");
            return Ok(Action::await_change());
        }
    };

    let redfish = rotate_credentials(ctx.redfish.as_ref(), &name, &namespace, &credentials).await;
    let ssh = rotate_credentials(ctx.ssh.as_ref(), &name, &namespace, &credentials).await;
    debug!(secret = %name, namespace = %namespace, redfish, ssh, "Credential secret processed");
    Ok(Action::await_change())
}

/// Push `credentials` to every host using secret `name`/`namespace` and probe
/// those hosts. Returns the number of hosts whose credentials changed.
pub async fn rotate_credentials<P: HostProtocol, S: HostStatusRecord>(
    sync: &HostStatusSynchronizer<P, S>,
    name: &str,
    namespace: &str,
    credentials: &Credentials,
) -> usize {
    let changed = sync.cache().update_secret(name, namespace, credentials).await;
    if changed.is_empty() {
        return 0;
    }
    info!(
        protocol = sync.protocol_name(),
        secret = %name,
        namespace = %namespace,
        hosts = changed.len(),
        "Credentials changed, re-probing hosts"
    );
    sync.reconcile_hosts(&changed).await;
    changed.len()
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod secret_tests;
