// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `SshStatus` reconciliation.
//!
//! Same shape as the `RedfishStatus` controller. A record that has no address
//! yet but is owned by a `HostEndpoint` is seeded from that endpoint, and the
//! `sshKeyAuth` flag follows the credentials actually in use.

use super::credentials_for;
use super::hostendpoint::EndpointRecord;
use crate::config::FeatureConfig;
use crate::connection_cache::{Credentials, HostConnection, HostOrigin};
use crate::constants::{KIND_HOST_ENDPOINT, REQUEUE_SSH_SECS};
use crate::context::Context;
use crate::crd::{HostEndpointSpec, SshBasicInfo, SshHostStatus, SshStatus};
use crate::host_status::synchronizer::HostStatusSynchronizer;
use crate::host_status::HostProtocol;
use crate::store::{CredentialSource, StatusStore};
use anyhow::Result;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One `SshStatus` as seen by the controller.
pub struct SshRecordView<'a> {
    pub name: &'a str,
    pub status: Option<&'a SshHostStatus>,
    pub resource_version: Option<&'a str>,
    /// Spec of the owning `HostEndpoint`, if any.
    pub endpoint: Option<&'a HostEndpointSpec>,
}

/// Reconcile one `SshStatus`.
///
/// # Errors
///
/// Never fails; problems are logged and retried after a delay.
pub async fn reconcile_sshstatus(ctx: Arc<Context>, record: Arc<SshStatus>) -> Result<Action> {
    let name = record.name_any();
    if record.meta().deletion_timestamp.is_some() {
        ctx.ssh.forget(&name).await;
        return Ok(Action::await_change());
    }

    let owner = record
        .owner_references()
        .iter()
        .find(|o| o.kind == KIND_HOST_ENDPOINT)
        .and_then(|o| ctx.stores.get_host_endpoint(&o.name));
    let resource_version = record.resource_version();

    let view = SshRecordView {
        name: &name,
        status: record.status.as_ref(),
        resource_version: resource_version.as_deref(),
        endpoint: owner.as_ref().map(|ep| &ep.spec),
    };
    Ok(sync_ssh_record(
        ctx.ssh.as_ref(),
        ctx.ssh_records.as_ref(),
        ctx.credentials.as_ref(),
        &ctx.config.feature,
        view,
    )
    .await)
}

/// Connection record for an SSH host, `None` when the port is unusable.
#[must_use]
pub fn ssh_connection(name: &str, basic: &SshBasicInfo, credentials: Credentials) -> Option<HostConnection> {
    let port = u16::try_from(basic.port).ok().filter(|p| *p != 0)?;
    Some(HostConnection {
        name: name.to_string(),
        address: basic.ip_addr.clone(),
        port,
        https: false,
        credentials,
        secret_name: basic.secret_name.clone(),
        secret_namespace: basic.secret_namespace.clone(),
        origin: HostOrigin::Static,
        cluster_name: basic.cluster_name.clone(),
        subnet_name: basic.subnet_name.clone(),
    })
}

/// Seed, refresh, and if needed probe one SSH host.
pub async fn sync_ssh_record<P: HostProtocol>(
    sync: &HostStatusSynchronizer<P, SshHostStatus>,
    records: &dyn StatusStore<SshHostStatus>,
    credentials: &dyn CredentialSource,
    feature: &FeatureConfig,
    view: SshRecordView<'_>,
) -> Action {
    let retry = Action::requeue(Duration::from_secs(REQUEUE_SSH_SECS));
    let name = view.name;
    let mut status = view.status.cloned().unwrap_or_default();
    let mut dirty = false;

    if status.basic.ip_addr.is_empty() {
        let Some(endpoint) = view.endpoint else {
            debug!(host = %name, "SshStatus has no address yet, ignoring");
            return Action::await_change();
        };
        info!(host = %name, ip = %endpoint.ip_addr, "Seeding SshStatus from its HostEndpoint");
        dirty |= status.apply_endpoint(endpoint, feature);
        if status.basic.ip_addr.is_empty() {
            return Action::await_change();
        }
    }

    let creds = match credentials_for(
        credentials,
        &status.basic.secret_name,
        &status.basic.secret_namespace,
    )
    .await
    {
        Ok(creds) => creds,
        Err(e) => {
            warn!(host = %name, secret = %status.basic.secret_name, error = %e, "Failed to read SSH credentials");
            return retry;
        }
    };

    if status.basic.ssh_key_auth != creds.uses_key() {
        status.basic.ssh_key_auth = creds.uses_key();
        dirty = true;
    }
    if dirty {
        let _guard = sync.lock(name).await;
        if let Err(e) = records
            .update_status(name, &status, view.resource_version)
            .await
        {
            warn!(host = %name, error = %e, "Failed to write SshStatus basic info");
            return retry;
        }
    }

    let Some(connection) = ssh_connection(name, &status.basic, creds) else {
        warn!(host = %name, port = status.basic.port, "SshStatus has an invalid port, ignoring");
        return Action::await_change();
    };
    sync.cache().upsert(connection).await;

    if status.info.is_empty() {
        if let Err(e) = sync.reconcile_one(name).await {
            warn!(host = %name, error = %e, "Initial SSH probe failed");
            return retry;
        }
    }
    Action::await_change()
}

#[cfg(test)]
#[path = "sshstatus_tests.rs"]
mod sshstatus_tests;
