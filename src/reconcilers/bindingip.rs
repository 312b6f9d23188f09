// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `BindingIp` reconciliation.
//!
//! Keeps the [`BindingIndex`] in step with the cluster and turns every change
//! into a [`BindingEvent`] for the subnet manager. A binding whose address or
//! MAC changed is withdrawn before the new one is announced.

use super::finalizers::{ensure_cluster_finalizer, is_deleting, remove_cluster_finalizer};
use crate::constants::BINDING_IP_FINALIZER;
use crate::context::Context;
use crate::crd::BindingIp;
use crate::dhcp::ManualBinding;
use crate::subnet_manager::{BindingEvent, BindingIndex};
use anyhow::{anyhow, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Reconcile one `BindingIp`.
///
/// # Errors
///
/// Returns an error when a finalizer patch fails or the binding queue is closed.
pub async fn reconcile_bindingip(ctx: Arc<Context>, binding: Arc<BindingIp>) -> Result<Action> {
    let name = binding.name_any();
    let index = ctx.subnets.binding_index();
    let events = ctx.subnets.binding_events();

    if is_deleting(binding.as_ref()) {
        withdraw_binding(&index, &events, &name).await?;
        remove_cluster_finalizer(&ctx.client, binding.as_ref(), BINDING_IP_FINALIZER).await?;
        return Ok(Action::await_change());
    }

    ensure_cluster_finalizer(&ctx.client, binding.as_ref(), BINDING_IP_FINALIZER).await?;
    admit_binding(&index, &events, &name, ManualBinding::from(&binding.spec)).await?;
    Ok(Action::await_change())
}

/// Record `binding` under `name` and announce it.
///
/// Returns `false` when the index already held the same binding.
///
/// # Errors
///
/// Returns an error when the binding queue is closed.
pub async fn admit_binding(
    index: &BindingIndex,
    events: &mpsc::Sender<BindingEvent>,
    name: &str,
    binding: ManualBinding,
) -> Result<bool> {
    let previous = index.upsert(name, binding.clone()).await;
    if previous.as_ref() == Some(&binding) {
        debug!(binding = %name, "BindingIp unchanged");
        return Ok(false);
    }

    if let Some(old) = previous {
        info!(binding = %name, old_ip = %old.ip, new_ip = %binding.ip, "BindingIp changed");
        send(events, BindingEvent::Deleted(old)).await?;
    } else {
        info!(
            binding = %name,
            subnet = %binding.subnet,
            ip = %binding.ip,
            mac = %binding.mac,
            "BindingIp added"
        );
    }
    send(events, BindingEvent::Added(binding)).await?;
    Ok(true)
}

/// Forget the binding stored under `name` and announce its removal.
///
/// Returns `false` when nothing was stored.
///
/// # Errors
///
/// Returns an error when the binding queue is closed.
pub async fn withdraw_binding(
    index: &BindingIndex,
    events: &mpsc::Sender<BindingEvent>,
    name: &str,
) -> Result<bool> {
    let Some(binding) = index.remove(name).await else {
        debug!(binding = %name, "BindingIp was not indexed");
        return Ok(false);
    };
    info!(binding = %name, subnet = %binding.subnet, ip = %binding.ip, "BindingIp deleted");
    send(events, BindingEvent::Deleted(binding)).await?;
    Ok(true)
}

async fn send(events: &mpsc::Sender<BindingEvent>, event: BindingEvent) -> Result<()> {
    events
        .send(event)
        .await
        .map_err(|_| anyhow!("binding event queue is closed"))
}

#[cfg(test)]
#[path = "bindingip_tests.rs"]
mod bindingip_tests;
