// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Boundary to the control-plane record store.
//!
//! The DHCP supervisor and the host status synchronizer never talk to the
//! Kubernetes API directly. They go through the traits in this module, which
//! are implemented by [`kube`] for the cluster and by [`memory`] for tests.
//!
//! Creating a host status record is a two-step contract: [`HostRecordStore::create`]
//! writes metadata only, then [`StatusStore::update_status`] writes the status.
//! Status writes carry the resource version that was read, so a concurrent
//! writer surfaces as [`StoreError::Conflict`].

pub mod kube;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use crate::connection_cache::Credentials;
use crate::crd::BindingIpSpec;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned by store implementations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Optimistic-concurrency failure; re-read and retry.
    #[error("conflict writing {kind} '{name}'")]
    Conflict { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Timeout, rate limit, or server-side failure.
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Conflicts, timeouts, and rate limits are worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify a Kubernetes client error.
    #[must_use]
    pub fn from_kube(kind: &str, name: &str, err: ::kube::Error) -> Self {
        match &err {
            ::kube::Error::Api(resp) => match resp.code {
                404 => Self::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 if resp.reason == "AlreadyExists" => Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => Self::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                429 | 500..=599 => Self::Transient(err.to_string()),
                _ => Self::Other(err.to_string()),
            },
            ::kube::Error::Service(_) => Self::Transient(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

/// A record as last read from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord<S> {
    pub name: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub status: Option<S>,
    pub resource_version: Option<String>,
}

/// Read and write the status of one kind of record.
#[async_trait]
pub trait StatusStore<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<StoredRecord<S>>, StoreError>;

    /// Replace the status. `resource_version` guards against concurrent writers.
    async fn update_status(
        &self,
        name: &str,
        status: &S,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Merge `labels` into the record's labels.
    async fn merge_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
}

/// A [`StatusStore`] whose records the agent creates itself.
#[async_trait]
pub trait HostRecordStore<S>: StatusStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create the record with metadata only.
    async fn create(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        owner: Option<OwnerReference>,
    ) -> Result<(), StoreError>;
}

/// Object an event is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventTarget {
    pub kind: &'static str,
    pub name: String,
    pub uid: Option<String>,
}

/// Publishes notification events. Delivery failures are logged, never returned.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, target: &EventTarget, event_type: &str, reason: &str, message: &str);
}

/// Looks up host credentials by secret name and namespace.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self, name: &str, namespace: &str) -> Result<Credentials, StoreError>;
}

/// `BindingIp` records.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// All bindings as `(name, spec)`.
    async fn list(&self) -> Result<Vec<(String, BindingIpSpec)>, StoreError>;

    async fn create(
        &self,
        name: &str,
        spec: &BindingIpSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
}

/// Secret key holding the login name
pub const SECRET_KEY_USERNAME: &str = "username";

/// Secret key holding the password
pub const SECRET_KEY_PASSWORD: &str = "password";

/// Secret key holding an SSH private key
pub const SECRET_KEY_PRIVATE_KEY: &str = "ssh-privatekey";

/// Extract credentials from a secret.
///
/// `username` is required, plus at least one of `password` or `ssh-privatekey`.
///
/// # Errors
///
/// Returns [`StoreError::Other`] naming the missing key.
pub fn credentials_from_secret(secret: &Secret) -> Result<Credentials, StoreError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let read = |key: &str| -> Option<String> {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).trim_end_matches('\n').to_string())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|d| d.get(key))
                    .cloned()
            })
            .filter(|v| !v.is_empty())
    };

    let username = read(SECRET_KEY_USERNAME)
        .ok_or_else(|| StoreError::Other(format!("secret '{name}' has no {SECRET_KEY_USERNAME}")))?;
    let password = read(SECRET_KEY_PASSWORD);
    let private_key = read(SECRET_KEY_PRIVATE_KEY);
    if password.is_none() && private_key.is_none() {
        return Err(StoreError::Other(format!(
            "secret '{name}' has neither {SECRET_KEY_PASSWORD} nor {SECRET_KEY_PRIVATE_KEY}"
        )));
    }

    Ok(Credentials {
        username,
        password: password.unwrap_or_default(),
        private_key,
    })
}
