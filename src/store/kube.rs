// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes-backed store implementations.

use super::{
    credentials_from_secret, BindingStore, CredentialSource, EventRecorder, EventTarget,
    HostRecordStore, StatusStore, StoreError, StoredRecord,
};
use crate::connection_cache::Credentials;
use crate::constants::API_GROUP_VERSION;
use crate::crd::{
    BindingIp, BindingIpSpec, HostOperation, HostOperationStatus, RedfishHostStatus,
    RedfishStatus, RedfishStatusSpec, SshHostStatus, SshStatus, SshStatusSpec, Subnet,
    SubnetStatus,
};
use crate::labels::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::jiff::Timestamp;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, warn};

/// A cluster-scoped custom resource with a status subresource.
pub trait StatusResource:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Status: Clone + Serialize + Send + Sync + 'static;

    fn status_ref(&self) -> Option<&Self::Status>;
}

/// A status-only resource the agent can create from a bare name.
pub trait BlankRecord: StatusResource {
    fn blank(name: &str) -> Self;
}

impl StatusResource for Subnet {
    type Status = SubnetStatus;

    fn status_ref(&self) -> Option<&SubnetStatus> {
        self.status.as_ref()
    }
}

impl StatusResource for RedfishStatus {
    type Status = RedfishHostStatus;

    fn status_ref(&self) -> Option<&RedfishHostStatus> {
        self.status.as_ref()
    }
}

impl BlankRecord for RedfishStatus {
    fn blank(name: &str) -> Self {
        RedfishStatus::new(name, RedfishStatusSpec {})
    }
}

impl StatusResource for SshStatus {
    type Status = SshHostStatus;

    fn status_ref(&self) -> Option<&SshHostStatus> {
        self.status.as_ref()
    }
}

impl BlankRecord for SshStatus {
    fn blank(name: &str) -> Self {
        SshStatus::new(name, SshStatusSpec {})
    }
}

impl StatusResource for HostOperation {
    type Status = HostOperationStatus;

    fn status_ref(&self) -> Option<&HostOperationStatus> {
        self.status.as_ref()
    }
}

/// [`StatusStore`] over `Api<K>::all`.
pub struct KubeStatusStore<K> {
    api: Api<K>,
}

impl<K: StatusResource> KubeStatusStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

#[async_trait]
impl<K: StatusResource> StatusStore<K::Status> for KubeStatusStore<K> {
    async fn get(&self, name: &str) -> Result<Option<StoredRecord<K::Status>>, StoreError> {
        let obj = self
            .api
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(&Self::kind(), name, e))?;

        Ok(obj.map(|obj| StoredRecord {
            name: obj.name_any(),
            uid: obj.uid(),
            labels: obj.labels().clone(),
            status: obj.status_ref().cloned(),
            resource_version: obj.resource_version(),
        }))
    }

    async fn update_status(
        &self,
        name: &str,
        status: &K::Status,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut patch = json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(&Self::kind(), name, e))?;
        debug!(kind = %Self::kind(), name = %name, "Updated status");
        Ok(())
    }

    async fn merge_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let patch = json!({ "metadata": { "labels": labels } });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(&Self::kind(), name, e))?;
        Ok(())
    }
}

#[async_trait]
impl<K: BlankRecord> HostRecordStore<K::Status> for KubeStatusStore<K> {
    async fn create(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        owner: Option<OwnerReference>,
    ) -> Result<(), StoreError> {
        let mut obj = K::blank(name);
        let meta = obj.meta_mut();
        meta.labels = Some(labels);
        meta.owner_references = owner.map(|o| vec![o]);

        self.api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| StoreError::from_kube(&Self::kind(), name, e))?;
        debug!(kind = %Self::kind(), name = %name, "Created record");
        Ok(())
    }
}

/// Writes core/v1 events into the agent's namespace.
pub struct KubeEventRecorder {
    api: Api<Event>,
    namespace: String,
}

impl KubeEventRecorder {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, target: &EventTarget, event_type: &str, reason: &str, message: &str) {
        let now = Time(Timestamp::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}.", target.name)),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(API_GROUP_VERSION.to_string()),
                kind: Some(target.kind.to_string()),
                name: Some(target.name.clone()),
                uid: target.uid.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.to_string()),
            source: Some(EventSource {
                component: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = self.api.create(&PostParams::default(), &event).await {
            warn!(
                kind = target.kind,
                name = %target.name,
                reason = reason,
                error = %e,
                "Failed to create event"
            );
        }
    }
}

/// Reads credentials from core/v1 secrets.
pub struct KubeCredentialSource {
    client: Client,
}

impl KubeCredentialSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for KubeCredentialSource {
    async fn credentials(&self, name: &str, namespace: &str) -> Result<Credentials, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("Secret", &format!("{namespace}/{name}"), e))?;
        credentials_from_secret(&secret)
    }
}

/// [`BindingStore`] over `Api<BindingIp>::all`.
pub struct KubeBindingStore {
    api: Api<BindingIp>,
}

impl KubeBindingStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl BindingStore for KubeBindingStore {
    async fn list(&self) -> Result<Vec<(String, BindingIpSpec)>, StoreError> {
        let list = self
            .api
            .list(&Default::default())
            .await
            .map_err(|e| StoreError::from_kube("BindingIp", "*", e))?;
        Ok(list
            .items
            .into_iter()
            .map(|b| (b.name_any(), b.spec))
            .collect())
    }

    async fn create(
        &self,
        name: &str,
        spec: &BindingIpSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut binding = BindingIp::new(name, spec.clone());
        binding.metadata.labels = Some(labels);
        self.api
            .create(&PostParams::default(), &binding)
            .await
            .map_err(|e| StoreError::from_kube("BindingIp", name, e))?;
        Ok(())
    }
}

/// Owner reference pointing at a topohub resource.
#[must_use]
pub fn owner_reference(kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
