// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-identity exclusive locks.
//!
//! Every "read record, probe host, write record" sequence for a host or subnet
//! runs under the lock for that identity, whichever path triggered it (periodic
//! sweep, lease event, or controller reconcile). Locks for different identities
//! never contend.
//!
//! Entries are allocated on first use and never evicted, so the registry grows
//! with the number of distinct identities seen by the process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock identity of the status record `name` of kind `kind`.
#[must_use]
pub fn record_identity(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}

/// Lazily populated map of identity to lock.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `identity`. The same identity always yields the same lock.
    pub async fn handle(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive ownership of `identity`.
    ///
    /// The registry map is only held while looking up the entry, so a holder
    /// of one identity never delays acquisition of another.
    pub async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        self.handle(identity).await.lock_owned().await
    }

    /// Number of identities ever locked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
