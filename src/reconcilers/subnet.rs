// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Subnet` reconciliation.
//!
//! A live subnet is handed to the [`SubnetManager`], which starts or updates its
//! DHCP server. A subnet being deleted has its server stopped before the
//! finalizer is released.

use super::finalizers::{ensure_cluster_finalizer, is_deleting, remove_cluster_finalizer};
use crate::constants::{ERROR_REQUEUE_DURATION_SECS, REQUEUE_SHORT_SECS, SUBNET_FINALIZER};
use crate::context::Context;
use crate::crd::{Subnet, SubnetSpec, SubnetStatus};
use crate::dhcp::supervisor::record_failure;
use crate::store::StatusStore;
use crate::subnet_manager::{SubnetChange, SubnetManager};
use anyhow::Result;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconcile one `Subnet`.
///
/// # Errors
///
/// Returns an error when a finalizer patch fails.
pub async fn reconcile_subnet(ctx: Arc<Context>, subnet: Arc<Subnet>) -> Result<Action> {
    let name = subnet.name_any();

    if is_deleting(subnet.as_ref()) {
        info!(subnet = %name, "Subnet is being deleted");
        ctx.subnets.remove(&name).await;
        remove_cluster_finalizer(&ctx.client, subnet.as_ref(), SUBNET_FINALIZER).await?;
        return Ok(Action::await_change());
    }

    ensure_cluster_finalizer(&ctx.client, subnet.as_ref(), SUBNET_FINALIZER).await?;
    Ok(apply_subnet(&ctx.subnets, ctx.subnet_records.as_ref(), &name, &subnet.spec).await)
}

/// Converge the DHCP server of `name` to `spec`.
///
/// A failed start or update is recorded as a `DhcpServer/False/Failed`
/// condition and retried later.
pub async fn apply_subnet(
    manager: &SubnetManager,
    records: &dyn StatusStore<SubnetStatus>,
    name: &str,
    spec: &SubnetSpec,
) -> Action {
    match manager.apply(name, spec).await {
        Ok(SubnetChange::Unchanged) => Action::await_change(),
        Ok(change) => {
            debug!(subnet = %name, change = ?change, "Subnet applied");
            Action::await_change()
        }
        Err(e) => {
            error!(subnet = %name, error = %e, "Failed to apply subnet");
            match record_failure(records, name, &e.to_string()).await {
                Ok(()) => Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS)),
                Err(store_err) => {
                    warn!(subnet = %name, error = %store_err, "Failed to record subnet failure");
                    Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS))
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "subnet_tests.rs"]
mod subnet_tests;
