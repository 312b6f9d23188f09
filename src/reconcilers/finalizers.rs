// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for cluster-scoped topohub resources.
//!
//! `Subnet` and `BindingIp` carry a finalizer so that the agent sees their
//! deletion: the DHCP server of a subnet must be stopped, and a static binding
//! must be withdrawn from its subnet's binding file, before the record goes.
//!
//! Both helpers are idempotent and patch `metadata.finalizers` with a JSON merge
//! patch, so they never touch the spec or status.

use anyhow::{Context as _, Result};
use kube::api::{Patch, PatchParams};
use kube::core::ClusterResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::info;

/// Whether `finalizer` is present on the object.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Whether the object has a deletion timestamp.
#[must_use]
pub fn is_deleting<T: Resource>(resource: &T) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// The finalizer list with `finalizer` added, or `None` if it is already there.
#[must_use]
pub fn with_finalizer<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// The finalizer list with `finalizer` removed, or `None` if it was not there.
#[must_use]
pub fn without_finalizer<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);
    Some(finalizers)
}

async fn patch_finalizers<T>(client: &Client, name: &str, finalizers: &[String]) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let api: Api<T> = Api::all(client.clone());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("failed to patch finalizers of {} {name}", T::kind(&())))?;
    Ok(())
}

/// Add `finalizer` to a cluster-scoped resource unless it is already present.
///
/// # Errors
///
/// Returns an error if the API patch fails.
pub async fn ensure_cluster_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + ResourceExt
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let Some(finalizers) = with_finalizer(resource, finalizer) else {
        return Ok(());
    };
    let name = resource.name_any();
    patch_finalizers::<T>(client, &name, &finalizers).await?;
    info!(kind = %T::kind(&()), name = %name, finalizer, "Added finalizer");
    Ok(())
}

/// Remove `finalizer` from a cluster-scoped resource if present.
///
/// # Errors
///
/// Returns an error if the API patch fails.
pub async fn remove_cluster_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + ResourceExt
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let Some(finalizers) = without_finalizer(resource, finalizer) else {
        return Ok(());
    };
    let name = resource.name_any();
    patch_finalizers::<T>(client, &name, &finalizers).await?;
    info!(kind = %T::kind(&()), name = %name, finalizer, "Removed finalizer");
    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
