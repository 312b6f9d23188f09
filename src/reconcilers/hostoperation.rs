// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `HostOperation` reconciliation.
//!
//! An operation runs once. It is picked up while its status is empty or
//! `Pending`, executed against the BMC of the named `RedfishStatus`, and
//! finished with `Success` or `Failed`. A target that is not cached yet (the
//! agent just started, or the host was just discovered) is retried shortly.

use crate::constants::REQUEUE_SHORT_SECS;
use crate::context::Context;
use crate::crd::{HostOperation, HostOperationSpec, HostOperationStatus, RedfishHostStatus};
use crate::host_status::synchronizer::HostStatusSynchronizer;
use crate::host_status::{HostProtocol, HostSession};
use crate::status_reasons::{OPERATION_FAILED, OPERATION_PENDING, OPERATION_SUCCESS};
use crate::store::StatusStore;
use anyhow::Result;
use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconcile one `HostOperation`.
///
/// # Errors
///
/// Never fails; problems are logged and retried after a short delay.
pub async fn reconcile_hostoperation(
    ctx: Arc<Context>,
    operation: Arc<HostOperation>,
) -> Result<Action> {
    let name = operation.name_any();
    Ok(run_operation(
        ctx.redfish.as_ref(),
        ctx.operation_records.as_ref(),
        &name,
        &operation.spec,
        operation.status.as_ref(),
    )
    .await)
}

/// Whether the operation still has to run.
#[must_use]
pub fn is_pending(status: Option<&HostOperationStatus>) -> bool {
    status.is_none_or(|s| s.status.is_empty() || s.status == OPERATION_PENDING)
}

/// Execute a pending operation and record its outcome.
///
/// A failed status write is retried, which runs the action again.
pub async fn run_operation<P: HostProtocol>(
    sync: &HostStatusSynchronizer<P, RedfishHostStatus>,
    records: &dyn StatusStore<HostOperationStatus>,
    name: &str,
    spec: &HostOperationSpec,
    status: Option<&HostOperationStatus>,
) -> Action {
    if !is_pending(status) {
        debug!(operation = %name, "HostOperation already finished");
        return Action::await_change();
    }

    let target = &spec.redfish_status_name;
    let Some(endpoint) = sync.cache().get(target).await else {
        info!(operation = %name, host = %target, "Target host not cached yet, retrying");
        return Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS));
    };

    info!(operation = %name, host = %target, action = ?spec.action, "Running host operation");
    let outcome = match sync.connect(target).await {
        Ok((_, session)) => session.power(spec.action).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let (state, message) = match outcome {
        Ok(()) => {
            info!(operation = %name, host = %target, action = ?spec.action, "Host operation succeeded");
            (OPERATION_SUCCESS, format!("{:?} completed", spec.action))
        }
        Err(reason) => {
            error!(operation = %name, host = %target, action = ?spec.action, error = %reason, "Host operation failed");
            (OPERATION_FAILED, reason)
        }
    };

    let result = HostOperationStatus {
        status: state.to_string(),
        last_update_time: Utc::now().to_rfc3339(),
        cluster_name: endpoint.cluster_name,
        ip_addr: endpoint.address,
        message,
    };
    // The agent is the only writer of an operation's status.
    if let Err(e) = records.update_status(name, &result, None).await {
        warn!(operation = %name, error = %e, "Failed to record host operation result");
        return Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS));
    }
    Action::await_change()
}

#[cfg(test)]
#[path = "hostoperation_tests.rs"]
mod hostoperation_tests;
