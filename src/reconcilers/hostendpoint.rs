// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `HostEndpoint` reconciliation.
//!
//! A `HostEndpoint` declares a host by address. The agent keeps a status record
//! of the same name, `RedfishStatus` or `SshStatus` depending on the endpoint
//! type, owned by the endpoint so that deleting the endpoint deletes the record.
//! The record's `basic` block mirrors the endpoint spec; the status controllers
//! take it from there.

use crate::config::FeatureConfig;
use crate::constants::{
    DEFAULT_REDFISH_PORT, DEFAULT_SSH_PORT, ENDPOINT_TYPE_REDFISH, ENDPOINT_TYPE_SSH,
    HOST_TYPE_ENDPOINT, KIND_HOST_ENDPOINT, REQUEUE_SHORT_SECS,
};
use crate::context::Context;
use crate::crd::{
    HostEndpoint, HostEndpointSpec, RedfishBasicInfo, RedfishHostStatus, SshBasicInfo,
    SshHostStatus,
};
use crate::host_status::{HostInfo, HostStatusRecord};
use crate::labels::{IP_ADDR, MODE};
use crate::lock::{record_identity, LockRegistry};
use crate::store::kube::owner_reference;
use crate::store::{HostRecordStore, StoreError};
use anyhow::Result;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Management protocol of an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointType {
    Redfish,
    Ssh,
    Unknown(String),
}

impl EndpointType {
    #[must_use]
    pub fn of(spec: &HostEndpointSpec) -> Self {
        match spec.r#type.as_deref() {
            None | Some("") | Some(ENDPOINT_TYPE_REDFISH) => Self::Redfish,
            Some(ENDPOINT_TYPE_SSH) => Self::Ssh,
            Some(other) => Self::Unknown(other.to_string()),
        }
    }
}

/// A status record whose connection facts can come from a `HostEndpoint`.
pub trait EndpointRecord: HostStatusRecord {
    /// Overwrite the connection facts from `spec`. Returns `true` on change.
    fn apply_endpoint(&mut self, spec: &HostEndpointSpec, feature: &FeatureConfig) -> bool;
}

fn endpoint_port(spec: &HostEndpointSpec, default: u16) -> i32 {
    spec.port.filter(|p| *p > 0).unwrap_or(i32::from(default))
}

impl EndpointRecord for RedfishHostStatus {
    fn apply_endpoint(&mut self, spec: &HostEndpointSpec, feature: &FeatureConfig) -> bool {
        let basic = RedfishBasicInfo {
            cluster_name: spec.cluster_name.clone().unwrap_or_default(),
            r#type: HOST_TYPE_ENDPOINT.to_string(),
            ip_addr: spec.ip_addr.clone(),
            secret_name: spec
                .secret_name
                .clone()
                .unwrap_or_else(|| feature.redfish_secret_name.clone()),
            secret_namespace: spec
                .secret_namespace
                .clone()
                .unwrap_or_else(|| feature.redfish_secret_namespace.clone()),
            https: spec.https.unwrap_or(true),
            port: endpoint_port(spec, DEFAULT_REDFISH_PORT),
            ..RedfishBasicInfo::default()
        };
        if self.basic == basic {
            return false;
        }
        if self.basic.ip_addr != basic.ip_addr {
            self.set_healthy(false);
            self.set_info(HostInfo::new());
        }
        self.basic = basic;
        true
    }
}

impl EndpointRecord for SshHostStatus {
    fn apply_endpoint(&mut self, spec: &HostEndpointSpec, _feature: &FeatureConfig) -> bool {
        let basic = SshBasicInfo {
            cluster_name: spec.cluster_name.clone().unwrap_or_default(),
            r#type: HOST_TYPE_ENDPOINT.to_string(),
            ip_addr: spec.ip_addr.clone(),
            secret_name: spec.secret_name.clone().unwrap_or_default(),
            secret_namespace: spec.secret_namespace.clone().unwrap_or_default(),
            port: endpoint_port(spec, DEFAULT_SSH_PORT),
            // Owned by the SshStatus controller, which knows the credentials.
            ssh_key_auth: self.basic.ssh_key_auth,
            subnet_name: None,
        };
        if self.basic == basic {
            return false;
        }
        if self.basic.ip_addr != basic.ip_addr {
            self.set_healthy(false);
            self.set_info(HostInfo::new());
        }
        self.basic = basic;
        true
    }
}

/// Reconcile one `HostEndpoint`.
///
/// # Errors
///
/// Never fails; store errors are logged and retried after a short delay.
pub async fn reconcile_hostendpoint(ctx: Arc<Context>, endpoint: Arc<HostEndpoint>) -> Result<Action> {
    let name = endpoint.name_any();
    let owner = endpoint
        .uid()
        .map(|uid| owner_reference(KIND_HOST_ENDPOINT, &name, &uid));
    let feature = &ctx.config.feature;
    let locks = ctx.redfish.locks();

    let result = match EndpointType::of(&endpoint.spec) {
        EndpointType::Redfish => {
            ensure_endpoint_record(ctx.redfish_records.as_ref(), locks, &name, &endpoint.spec, owner, feature)
                .await
        }
        EndpointType::Ssh => {
            ensure_endpoint_record(ctx.ssh_records.as_ref(), locks, &name, &endpoint.spec, owner, feature)
                .await
        }
        EndpointType::Unknown(kind) => {
            warn!(endpoint = %name, r#type = %kind, "Unsupported HostEndpoint type, ignoring");
            return Ok(Action::await_change());
        }
    };

    match result {
        Ok(_) => Ok(Action::await_change()),
        Err(e) => {
            warn!(endpoint = %name, error = %e, "Failed to sync HostEndpoint record");
            Ok(Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS)))
        }
    }
}

/// Labels every endpoint-declared record carries.
#[must_use]
pub fn endpoint_labels(spec: &HostEndpointSpec) -> BTreeMap<String, String> {
    BTreeMap::from([
        (IP_ADDR.to_string(), spec.ip_addr.clone()),
        (MODE.to_string(), HOST_TYPE_ENDPOINT.to_string()),
    ])
}

/// Create the record of endpoint `name` if missing and mirror `spec` into it,
/// holding the record's lock throughout.
///
/// Returns `true` when the status was written.
///
/// # Errors
///
/// Returns the first store error.
pub async fn ensure_endpoint_record<S: EndpointRecord>(
    records: &dyn HostRecordStore<S>,
    locks: &LockRegistry,
    name: &str,
    spec: &HostEndpointSpec,
    owner: Option<OwnerReference>,
    feature: &FeatureConfig,
) -> Result<bool, StoreError> {
    let labels = endpoint_labels(spec);
    let _guard = locks.acquire(&record_identity(S::KIND, name)).await;

    let record = match records.get(name).await? {
        Some(record) => record,
        None => {
            match records.create(name, labels.clone(), owner).await {
                Ok(()) => info!(kind = S::KIND, host = %name, ip = %spec.ip_addr, "Created record for HostEndpoint"),
                Err(StoreError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
            records.get(name).await?.ok_or_else(|| StoreError::NotFound {
                kind: S::KIND.to_string(),
                name: name.to_string(),
            })?
        }
    };

    // Status first: the label merge bumps the resource version.
    let mut status = record.status.clone().unwrap_or_default();
    let written = status.apply_endpoint(spec, feature);
    if written {
        records
            .update_status(name, &status, record.resource_version.as_deref())
            .await?;
        info!(kind = S::KIND, host = %name, ip = %spec.ip_addr, "Updated record from HostEndpoint");
    } else {
        debug!(kind = S::KIND, host = %name, "HostEndpoint record unchanged");
    }

    if labels.iter().any(|(k, v)| record.labels.get(k) != Some(v)) {
        records.merge_labels(name, &labels).await?;
    }
    Ok(written)
}

#[cfg(test)]
#[path = "hostendpoint_tests.rs"]
mod hostendpoint_tests;
