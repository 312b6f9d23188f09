// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Latest known connection facts per host, one cache per management protocol.
//!
//! Readers always receive a copy of the record; the cache is the only place a
//! record is mutated.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Login material for a host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// PEM/OpenSSH private key. SSH prefers it over the password when present.
    pub private_key: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            private_key: None,
        }
    }

    #[must_use]
    pub fn uses_key(&self) -> bool {
        self.private_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How a host became known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostOrigin {
    /// Discovered from a DHCP lease.
    Dynamic,
    /// Declared through a `HostEndpoint`.
    Static,
}

/// Connection record for one host.
#[derive(Clone, Debug, PartialEq)]
pub struct HostConnection {
    /// Host identity, also the name of its status record.
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Redfish only.
    pub https: bool,
    pub credentials: Credentials,
    pub secret_name: String,
    pub secret_namespace: String,
    pub origin: HostOrigin,
    pub cluster_name: String,
    pub subnet_name: Option<String>,
}

impl HostConnection {
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.origin == HostOrigin::Dynamic
    }

    /// Whether this host's credentials come from the given secret.
    #[must_use]
    pub fn uses_secret(&self, name: &str, namespace: &str) -> bool {
        self.secret_name == name && self.secret_namespace == namespace
    }
}

/// Connection records of one protocol keyed by host identity.
#[derive(Debug)]
pub struct ConnectionCache {
    protocol: &'static str,
    entries: RwLock<HashMap<String, HostConnection>>,
}

impl ConnectionCache {
    #[must_use]
    pub fn new(protocol: &'static str) -> Self {
        Self {
            protocol,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Insert or replace a record. Returns `true` if anything changed.
    pub async fn upsert(&self, conn: HostConnection) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(&conn.name) == Some(&conn) {
            return false;
        }
        debug!(protocol = self.protocol, host = %conn.name, address = %conn.address, "Caching host connection");
        entries.insert(conn.name.clone(), conn);
        true
    }

    pub async fn remove(&self, name: &str) -> Option<HostConnection> {
        let removed = self.entries.write().await.remove(name);
        if removed.is_some() {
            debug!(protocol = self.protocol, host = %name, "Removed host connection");
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Option<HostConnection> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn all(&self) -> Vec<HostConnection> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Hosts discovered through DHCP.
    pub async fn dynamic_hosts(&self) -> Vec<HostConnection> {
        self.filtered(HostOrigin::Dynamic).await
    }

    /// Hosts declared through `HostEndpoint`.
    pub async fn static_hosts(&self) -> Vec<HostConnection> {
        self.filtered(HostOrigin::Static).await
    }

    async fn filtered(&self, origin: HostOrigin) -> Vec<HostConnection> {
        self.all()
            .await
            .into_iter()
            .filter(|c| c.origin == origin)
            .collect()
    }

    /// Replace the credentials of every host using secret `name/namespace`.
    ///
    /// Returns the identities whose credentials actually changed.
    pub async fn update_secret(
        &self,
        name: &str,
        namespace: &str,
        credentials: &Credentials,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        let mut entries = self.entries.write().await;
        for conn in entries.values_mut() {
            if conn.uses_secret(name, namespace) && conn.credentials != *credentials {
                conn.credentials = credentials.clone();
                changed.push(conn.name.clone());
            }
        }
        changed.sort();
        if !changed.is_empty() {
            info!(
                protocol = self.protocol,
                secret = %format!("{namespace}/{name}"),
                hosts = changed.len(),
                "Updated credentials from secret"
            );
        }
        changed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
