// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `RedfishStatus` reconciliation.
//!
//! The record's `basic` block is the source of truth for how to reach a BMC.
//! Every reconcile refreshes the host's connection record; a record whose
//! inventory is still empty is probed right away instead of waiting for the
//! next periodic sweep.

use super::credentials_for;
use crate::connection_cache::{Credentials, HostConnection, HostOrigin};
use crate::constants::{HOST_TYPE_DHCP, REQUEUE_SHORT_SECS};
use crate::context::Context;
use crate::crd::{RedfishBasicInfo, RedfishHostStatus, RedfishStatus};
use crate::host_status::synchronizer::HostStatusSynchronizer;
use crate::host_status::HostProtocol;
use crate::store::CredentialSource;
use anyhow::Result;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reconcile one `RedfishStatus`.
///
/// # Errors
///
/// Never fails; problems are logged and retried after a short delay.
pub async fn reconcile_redfishstatus(
    ctx: Arc<Context>,
    record: Arc<RedfishStatus>,
) -> Result<Action> {
    let name = record.name_any();
    if record.meta().deletion_timestamp.is_some() {
        ctx.redfish.forget(&name).await;
        return Ok(Action::await_change());
    }
    Ok(sync_redfish_record(
        ctx.redfish.as_ref(),
        ctx.credentials.as_ref(),
        &name,
        record.status.as_ref(),
    )
    .await)
}

/// Connection record for a Redfish host, `None` when the port is unusable.
#[must_use]
pub fn redfish_connection(
    name: &str,
    basic: &RedfishBasicInfo,
    credentials: Credentials,
) -> Option<HostConnection> {
    let port = u16::try_from(basic.port).ok().filter(|p| *p != 0)?;
    Some(HostConnection {
        name: name.to_string(),
        address: basic.ip_addr.clone(),
        port,
        https: basic.https,
        credentials,
        secret_name: basic.secret_name.clone(),
        secret_namespace: basic.secret_namespace.clone(),
        origin: if basic.r#type == HOST_TYPE_DHCP {
            HostOrigin::Dynamic
        } else {
            HostOrigin::Static
        },
        cluster_name: basic.cluster_name.clone(),
        subnet_name: basic.subnet_name.clone(),
    })
}

/// Refresh the connection record of `name` and probe it if it has no inventory yet.
pub async fn sync_redfish_record<P: HostProtocol>(
    sync: &HostStatusSynchronizer<P, RedfishHostStatus>,
    credentials: &dyn CredentialSource,
    name: &str,
    status: Option<&RedfishHostStatus>,
) -> Action {
    let Some(status) = status.filter(|s| !s.basic.ip_addr.is_empty()) else {
        debug!(host = %name, "RedfishStatus has no address yet, ignoring");
        return Action::await_change();
    };
    let basic = &status.basic;

    let creds = match credentials_for(credentials, &basic.secret_name, &basic.secret_namespace).await {
        Ok(creds) => creds,
        Err(e) => {
            warn!(host = %name, secret = %basic.secret_name, error = %e, "Failed to read BMC credentials");
            return Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS));
        }
    };

    let Some(connection) = redfish_connection(name, basic, creds) else {
        warn!(host = %name, port = basic.port, "RedfishStatus has an invalid port, ignoring");
        return Action::await_change();
    };
    if sync.cache().upsert(connection).await {
        debug!(host = %name, address = %basic.ip_addr, "Connection record updated");
    }

    if status.info.is_empty() {
        if let Err(e) = sync.reconcile_one(name).await {
            warn!(host = %name, error = %e, "Initial Redfish probe failed");
            return Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS));
        }
    }
    Action::await_change()
}

#[cfg(test)]
#[path = "redfishstatus_tests.rs"]
mod redfishstatus_tests;
