// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory store implementations.
//!
//! Used by unit and integration tests to drive the supervisor and the host
//! status synchronizer without a cluster. Behaviour mirrors the API server
//! where it matters: resource versions advance on every write, a stale
//! version is rejected with [`StoreError::Conflict`], and creating an existing
//! name fails with [`StoreError::AlreadyExists`].

use super::{
    BindingStore, CredentialSource, EventRecorder, EventTarget, HostRecordStore, StatusStore,
    StoreError, StoredRecord,
};
use crate::connection_cache::Credentials;
use crate::crd::BindingIpSpec;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

struct MemoryState<S> {
    records: HashMap<String, StoredRecord<S>>,
    owners: HashMap<String, OwnerReference>,
    next_version: u64,
    status_writes: usize,
    creates: usize,
    injected_conflicts: u32,
    injected_failure: Option<StoreError>,
}

impl<S> MemoryState<S> {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// [`StatusStore`] and [`HostRecordStore`] backed by a map.
pub struct MemoryStatusStore<S> {
    kind: &'static str,
    state: Mutex<MemoryState<S>>,
}

impl<S: Clone + Send + Sync + 'static> MemoryStatusStore<S> {
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(MemoryState {
                records: HashMap::new(),
                owners: HashMap::new(),
                next_version: 0,
                status_writes: 0,
                creates: 0,
                injected_conflicts: 0,
                injected_failure: None,
            }),
        }
    }

    /// Seed a record, bypassing the write counters.
    pub async fn insert(&self, name: &str, labels: BTreeMap<String, String>, status: Option<S>) {
        let mut state = self.state.lock().await;
        let version = state.bump();
        state.records.insert(
            name.to_string(),
            StoredRecord {
                name: name.to_string(),
                uid: Some(format!("uid-{name}")),
                labels,
                status,
                resource_version: Some(version),
            },
        );
    }

    /// Remove a record as if it had been deleted out of band.
    pub async fn delete(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.records.remove(name);
        state.owners.remove(name);
    }

    /// Reject the next `count` status writes with a conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.lock().await.injected_conflicts = count;
    }

    /// Fail every subsequent write with `err` until cleared with `None`.
    pub async fn fail_writes(&self, err: Option<StoreError>) {
        self.state.lock().await.injected_failure = err;
    }

    /// Number of successful status writes.
    pub async fn status_writes(&self) -> usize {
        self.state.lock().await.status_writes
    }

    /// Number of successful creates.
    pub async fn creates(&self) -> usize {
        self.state.lock().await.creates
    }

    pub async fn status(&self, name: &str) -> Option<S> {
        self.state
            .lock()
            .await
            .records
            .get(name)
            .and_then(|r| r.status.clone())
    }

    pub async fn labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .await
            .records
            .get(name)
            .map(|r| r.labels.clone())
    }

    pub async fn owner(&self, name: &str) -> Option<OwnerReference> {
        self.state.lock().await.owners.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().await.records.keys().cloned().collect();
        names.sort();
        names
    }

    fn not_found(&self, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: self.kind.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl<S: Clone + Send + Sync + 'static> StatusStore<S> for MemoryStatusStore<S> {
    async fn get(&self, name: &str) -> Result<Option<StoredRecord<S>>, StoreError> {
        Ok(self.state.lock().await.records.get(name).cloned())
    }

    async fn update_status(
        &self,
        name: &str,
        status: &S,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.injected_failure.clone() {
            return Err(err);
        }
        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(StoreError::Conflict {
                kind: self.kind.to_string(),
                name: name.to_string(),
            });
        }

        let current = state
            .records
            .get(name)
            .and_then(|r| r.resource_version.clone())
            .ok_or_else(|| self.not_found(name))?;
        if resource_version.is_some_and(|rv| rv != current) {
            return Err(StoreError::Conflict {
                kind: self.kind.to_string(),
                name: name.to_string(),
            });
        }

        let version = state.bump();
        if let Some(record) = state.records.get_mut(name) {
            record.status = Some(status.clone());
            record.resource_version = Some(version);
        }
        state.status_writes += 1;
        Ok(())
    }

    async fn merge_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.injected_failure.clone() {
            return Err(err);
        }
        if !state.records.contains_key(name) {
            return Err(self.not_found(name));
        }
        let version = state.bump();
        if let Some(record) = state.records.get_mut(name) {
            record
                .labels
                .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            record.resource_version = Some(version);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Clone + Send + Sync + 'static> HostRecordStore<S> for MemoryStatusStore<S> {
    async fn create(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        owner: Option<OwnerReference>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.injected_failure.clone() {
            return Err(err);
        }
        if state.records.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind.to_string(),
                name: name.to_string(),
            });
        }
        let version = state.bump();
        state.records.insert(
            name.to_string(),
            StoredRecord {
                name: name.to_string(),
                uid: Some(format!("uid-{name}")),
                labels,
                status: None,
                resource_version: Some(version),
            },
        );
        if let Some(owner) = owner {
            state.owners.insert(name.to_string(), owner);
        }
        state.creates += 1;
        Ok(())
    }
}

/// An event captured by [`MemoryEventRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub target: EventTarget,
    pub event_type: String,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, target: &EventTarget, event_type: &str, reason: &str, message: &str) {
        self.events.lock().await.push(RecordedEvent {
            target: target.clone(),
            event_type: event_type.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

/// Credentials keyed by `(name, namespace)`.
#[derive(Default)]
pub struct MemoryCredentialSource {
    secrets: Mutex<HashMap<(String, String), Credentials>>,
}

impl MemoryCredentialSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: &str, namespace: &str, credentials: Credentials) {
        self.secrets
            .lock()
            .await
            .insert((name.to_string(), namespace.to_string()), credentials);
    }
}

#[async_trait]
impl CredentialSource for MemoryCredentialSource {
    async fn credentials(&self, name: &str, namespace: &str) -> Result<Credentials, StoreError> {
        self.secrets
            .lock()
            .await
            .get(&(name.to_string(), namespace.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret".to_string(),
                name: format!("{namespace}/{name}"),
            })
    }
}

/// `BindingIp` records keyed by name.
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: Mutex<BTreeMap<String, (BindingIpSpec, BTreeMap<String, String>)>>,
}

impl MemoryBindingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.bindings.lock().await.get(name).map(|(_, l)| l.clone())
    }

    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn list(&self) -> Result<Vec<(String, BindingIpSpec)>, StoreError> {
        Ok(self
            .bindings
            .lock()
            .await
            .iter()
            .map(|(name, (spec, _))| (name.clone(), spec.clone()))
            .collect())
    }

    async fn create(
        &self,
        name: &str,
        spec: &BindingIpSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut bindings = self.bindings.lock().await;
        if bindings.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                kind: "BindingIp".to_string(),
                name: name.to_string(),
            });
        }
        bindings.insert(name.to_string(), (spec.clone(), labels));
        Ok(())
    }
}
