// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Protocol-independent host status engine.
//!
//! [`HostStatusSynchronizer`] owns the "read record, probe host, write record"
//! cycle for every host of one protocol. Every cycle runs under the host's lock
//! from the shared [`LockRegistry`], whichever path asked for it: the periodic
//! sweep, a lease event, a credential change, or a controller reconcile. A
//! status write only happens when the probed state differs from the stored one.
//!
//! Hosts discovered through DHCP arrive as [`LeaseEvent`]s. A status record is
//! only created once the host answered a connection attempt.

use super::log_digest::fold_log;
use super::{DhcpDiscovered, HostInfo, HostProtocol, HostSession, HostStatusRecord, LogEntry};
use crate::config::AgentConfig;
use crate::connection_cache::{ConnectionCache, HostConnection, HostOrigin};
use crate::constants::{
    EVENT_REASON_BMC_LOG, HOST_SYNC_CONCURRENCY, HOST_TYPE_DHCP, LEASE_EVENT_RETRY_DELAY,
};
use crate::crd::BindingIpSpec;
use crate::dhcp::{DhcpClientInfo, LeaseEvent, LeaseEventKind};
use crate::host_errors::SyncError;
use crate::labels::{
    CLUSTER_NAME, DHCP_IP_ACTIVE, IP_ADDR, MODE, REDFISH_STATUS_OWNER, SUBNET_NAME, VALUE_FALSE,
    VALUE_TRUE,
};
use crate::lock::{record_identity, LockRegistry};
use crate::metrics;
use crate::store::{
    BindingStore, CredentialSource, EventRecorder, EventTarget, HostRecordStore, StoreError,
    StoredRecord,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Connection defaults for hosts discovered through DHCP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhcpDefaults {
    pub port: u16,
    pub https: bool,
    pub secret_name: String,
    pub secret_namespace: String,
}

impl DhcpDefaults {
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            port: config.feature.redfish_port,
            https: config.feature.redfish_https,
            secret_name: config.feature.redfish_secret_name.clone(),
            secret_namespace: config.feature.redfish_secret_namespace.clone(),
        }
    }
}

/// Record name of a host discovered at `ip`: dots become dashes.
#[must_use]
pub fn host_name_for_ip(ip: &str) -> String {
    ip.replace('.', "-")
}

type SessionEntry<T> = (HostConnection, Arc<T>);

/// Keeps the status records of one protocol's hosts in step with the hosts.
pub struct HostStatusSynchronizer<P: HostProtocol, S: HostStatusRecord> {
    protocol: P,
    cache: Arc<ConnectionCache>,
    locks: Arc<LockRegistry>,
    store: Arc<dyn HostRecordStore<S>>,
    events: Arc<dyn EventRecorder>,
    credentials: Arc<dyn CredentialSource>,
    bindings: Option<Arc<dyn BindingStore>>,
    dhcp: Option<DhcpDefaults>,
    sessions: Mutex<HashMap<String, SessionEntry<P::Session>>>,
    retry_delay: Duration,
    _record: PhantomData<fn() -> S>,
}

impl<P: HostProtocol, S: HostStatusRecord> HostStatusSynchronizer<P, S> {
    #[must_use]
    pub fn new(
        protocol: P,
        cache: Arc<ConnectionCache>,
        locks: Arc<LockRegistry>,
        store: Arc<dyn HostRecordStore<S>>,
        events: Arc<dyn EventRecorder>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            protocol,
            cache,
            locks,
            store,
            events,
            credentials,
            bindings: None,
            dhcp: None,
            sessions: Mutex::new(HashMap::new()),
            retry_delay: LEASE_EVENT_RETRY_DELAY,
            _record: PhantomData,
        }
    }

    /// Enable DHCP discovery with the given connection defaults.
    #[must_use]
    pub fn with_dhcp(mut self, defaults: DhcpDefaults, bindings: Arc<dyn BindingStore>) -> Self {
        self.dhcp = Some(defaults);
        self.bindings = Some(bindings);
        self
    }

    /// Override the delay before a failed lease event is resubmitted.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    #[must_use]
    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    fn lock_key(name: &str) -> String {
        record_identity(S::KIND, name)
    }

    /// Registry holding the per-host locks.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Exclusive ownership of host `name`, for status writes made outside
    /// [`Self::reconcile_one`].
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(&Self::lock_key(name)).await
    }

    /// Probe one host and persist its status if anything changed.
    ///
    /// Returns `true` when a status write happened.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotCached`] when the host has no connection record, or a
    /// store error from the status write. An unreachable host is not an error.
    pub async fn reconcile_one(&self, name: &str) -> Result<bool, SyncError> {
        let _guard = self.locks.acquire(&Self::lock_key(name)).await;

        let Some(endpoint) = self.cache.get(name).await else {
            return Err(SyncError::NotCached(name.to_string()));
        };
        let Some(record) = self.store.get(name).await? else {
            info!(kind = S::KIND, host = %name, "Status record is gone, forgetting host");
            self.forget(name).await;
            return Ok(false);
        };

        let current = record.status.clone().unwrap_or_default();
        let mut next = current.clone();
        let new_entries = self.probe(&endpoint, &current, &mut next).await;
        metrics::record_host_probe(self.protocol.name(), next.healthy());

        if next.same_state(&current) {
            debug!(kind = S::KIND, host = %name, "Host status unchanged, skipping write");
            return Ok(false);
        }

        next.set_last_update_time(Utc::now().to_rfc3339());
        self.store
            .update_status(name, &next, record.resource_version.as_deref())
            .await?;
        metrics::record_host_status_write(self.protocol.name());
        info!(
            kind = S::KIND,
            host = %name,
            healthy = next.healthy(),
            "Updated host status"
        );

        self.announce(&record, &new_entries).await;
        Ok(true)
    }

    /// Fill `next` from a live probe. Returns log entries not seen before.
    async fn probe(&self, endpoint: &HostConnection, current: &S, next: &mut S) -> Vec<LogEntry> {
        let session = match self.session(endpoint).await {
            Ok(session) => session,
            Err(SyncError::Host(e)) if !e.is_transient() => {
                warn!(host = %endpoint.name, address = %endpoint.address, error = %e, "Host rejected connection");
                next.set_healthy(false);
                next.set_info(HostInfo::new());
                return Vec::new();
            }
            Err(e) => {
                debug!(host = %endpoint.name, address = %endpoint.address, error = %e, "Host unreachable");
                next.set_healthy(false);
                next.set_info(HostInfo::new());
                return Vec::new();
            }
        };

        match session.info().await {
            Ok(info) => {
                next.set_healthy(true);
                next.set_info(info);
            }
            Err(e) => {
                warn!(host = %endpoint.name, error = %e, "Failed to read host info");
                self.sessions.lock().await.remove(&endpoint.name);
                next.set_healthy(false);
                next.set_info(HostInfo::new());
                return Vec::new();
            }
        }

        let Some(previous) = current.log_digest() else {
            return Vec::new();
        };
        match session.logs().await {
            Ok(entries) => {
                let update = fold_log(previous, &entries);
                if update.has_new_entries() {
                    debug!(host = %endpoint.name, count = update.new_entries.len(), "New host log entries");
                }
                next.set_log_digest(update.digest);
                update.new_entries
            }
            Err(e) => {
                warn!(host = %endpoint.name, error = %e, "Failed to read host log");
                Vec::new()
            }
        }
    }

    /// Publish log entries oldest first.
    async fn announce(&self, record: &StoredRecord<S>, entries: &[LogEntry]) {
        if entries.is_empty() {
            return;
        }
        let target = EventTarget {
            kind: S::KIND,
            name: record.name.clone(),
            uid: record.uid.clone(),
        };
        for entry in entries.iter().rev() {
            let event_type = if entry.is_warning() { "Warning" } else { "Normal" };
            self.events
                .record(&target, event_type, EVENT_REASON_BMC_LOG, &entry.summary())
                .await;
        }
    }

    /// Reuse the cached session while the connection facts are unchanged and
    /// the session still answers, otherwise dial again.
    async fn session(&self, endpoint: &HostConnection) -> Result<Arc<P::Session>, SyncError> {
        let cached = self.sessions.lock().await.get(&endpoint.name).cloned();
        if let Some((conn, session)) = cached {
            if conn == *endpoint && session.is_healthy().await {
                return Ok(session);
            }
        }

        let session = Arc::new(self.protocol.connect(endpoint).await?);
        self.sessions.lock().await.insert(
            endpoint.name.clone(),
            (endpoint.clone(), Arc::clone(&session)),
        );
        Ok(session)
    }

    /// A session for running an operation against `name`.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotCached`] for unknown hosts, [`SyncError::Host`] when
    /// the host cannot be reached.
    pub async fn connect(&self, name: &str) -> Result<(HostConnection, Arc<P::Session>), SyncError> {
        let endpoint = self
            .cache
            .get(name)
            .await
            .ok_or_else(|| SyncError::NotCached(name.to_string()))?;
        let session = self.session(&endpoint).await?;
        Ok((endpoint, session))
    }

    /// Drop the connection record and session of `name`.
    pub async fn forget(&self, name: &str) {
        self.cache.remove(name).await;
        self.sessions.lock().await.remove(name);
    }

    /// Reconcile every cached host. Returns the number of status writes.
    pub async fn reconcile_all(&self) -> usize {
        let dynamic = self.cache.dynamic_hosts().await;
        let declared = self.cache.static_hosts().await;
        debug!(
            kind = S::KIND,
            dynamic = dynamic.len(),
            declared = declared.len(),
            "Starting host status sweep"
        );
        let names: Vec<String> = dynamic.into_iter().chain(declared).map(|c| c.name).collect();
        self.reconcile_hosts(&names).await
    }

    /// Reconcile the listed hosts concurrently. Returns the number of status writes.
    pub async fn reconcile_hosts(&self, names: &[String]) -> usize {
        let results: Vec<(String, Result<bool, SyncError>)> = stream::iter(names.iter().cloned())
            .map(|name| async move {
                let result = self.reconcile_one(&name).await;
                (name, result)
            })
            .buffer_unordered(HOST_SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut written = 0;
        for (name, result) in results {
            match result {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!(kind = S::KIND, host = %name, error = %e, "Host status sync failed"),
            }
        }
        debug!(kind = S::KIND, hosts = names.len(), written, "Host status sweep finished");
        written
    }

    /// Sweep every cached host each `interval` until `stop` turns true.
    pub async fn run_periodic(&self, interval: Duration, mut stop: watch::Receiver<bool>) {
        info!(kind = S::KIND, interval_secs = interval.as_secs(), "Starting periodic host status sync");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*stop.borrow_and_update() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile_all().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(kind = S::KIND, "Periodic host status sync stopped");
    }
}

impl<P: HostProtocol, S: DhcpDiscovered> HostStatusSynchronizer<P, S> {
    /// Apply one lease event.
    ///
    /// # Errors
    ///
    /// Store and credential failures. Retryable ones are resubmitted by
    /// [`HostStatusSynchronizer::run_lease_events`].
    pub async fn on_lease_event(self: &Arc<Self>, event: &LeaseEvent) -> Result<(), SyncError> {
        let client = &event.client;
        let name = host_name_for_ip(&client.ip);
        debug!(
            kind = S::KIND,
            host = %name,
            event = event.kind.as_str(),
            mac = %client.mac,
            "Handling lease event"
        );

        let guard = self.locks.acquire(&Self::lock_key(&name)).await;
        let record = self.store.get(&name).await?;

        if event.kind == LeaseEventKind::Gone {
            if let Some(record) = record {
                self.lease_gone(&record).await?;
            }
            return Ok(());
        }

        let discovered = match record {
            Some(record) if record.status.is_some() => {
                self.refresh_lease(&record, client).await?;
                false
            }
            existing => {
                if !self.discover(&name, client, existing.is_some()).await? {
                    return Ok(());
                }
                true
            }
        };

        if client.enable_bind_ip {
            self.ensure_binding(&name, client).await?;
        }
        drop(guard);

        if discovered {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.reconcile_one(&name).await {
                    warn!(host = %name, error = %e, "Initial host status sync failed");
                }
            });
        }
        Ok(())
    }

    async fn refresh_lease(
        &self,
        record: &StoredRecord<S>,
        client: &DhcpClientInfo,
    ) -> Result<(), SyncError> {
        let mut status = record.status.clone().unwrap_or_default();
        if status.refresh_lease(client) {
            self.store
                .update_status(&record.name, &status, record.resource_version.as_deref())
                .await?;
            info!(host = %record.name, mac = %client.mac, "Refreshed lease facts of host");
        }
        if record.labels.get(DHCP_IP_ACTIVE).map(String::as_str) != Some(VALUE_TRUE) {
            let labels = BTreeMap::from([(DHCP_IP_ACTIVE.to_string(), VALUE_TRUE.to_string())]);
            self.store.merge_labels(&record.name, &labels).await?;
        }
        Ok(())
    }

    /// Connect to a new DHCP client and create its record if it answers.
    ///
    /// Returns `false` when the host was unreachable and nothing was written.
    async fn discover(
        &self,
        name: &str,
        client: &DhcpClientInfo,
        record_exists: bool,
    ) -> Result<bool, SyncError> {
        let Some(defaults) = &self.dhcp else {
            debug!(host = %name, "DHCP discovery disabled, ignoring lease");
            return Ok(false);
        };
        let credentials = self
            .credentials
            .credentials(&defaults.secret_name, &defaults.secret_namespace)
            .await?;
        let endpoint = HostConnection {
            name: name.to_string(),
            address: client.ip.clone(),
            port: defaults.port,
            https: defaults.https,
            credentials,
            secret_name: defaults.secret_name.clone(),
            secret_namespace: defaults.secret_namespace.clone(),
            origin: HostOrigin::Dynamic,
            cluster_name: client.cluster_name.clone(),
            subnet_name: Some(client.subnet_name.clone()),
        };

        let session = match self.protocol.connect(&endpoint).await {
            Ok(session) => session,
            Err(e) => {
                info!(
                    host = %name,
                    address = %client.ip,
                    error = %e,
                    "DHCP client is not reachable, not creating a status record"
                );
                return Ok(false);
            }
        };
        self.sessions
            .lock()
            .await
            .insert(name.to_string(), (endpoint.clone(), Arc::new(session)));

        if !record_exists {
            let labels = BTreeMap::from([(SUBNET_NAME.to_string(), client.subnet_name.clone())]);
            match self.store.create(name, labels, None).await {
                Ok(()) => info!(kind = S::KIND, host = %name, "Created status record"),
                Err(StoreError::AlreadyExists { .. }) => {
                    debug!(host = %name, "Status record already exists");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let labels = BTreeMap::from([
            (CLUSTER_NAME.to_string(), client.cluster_name.clone()),
            (IP_ADDR.to_string(), client.ip.clone()),
            (MODE.to_string(), HOST_TYPE_DHCP.to_string()),
            (DHCP_IP_ACTIVE.to_string(), VALUE_TRUE.to_string()),
        ]);
        self.store.merge_labels(name, &labels).await?;

        let status = S::for_dhcp_client(client, &endpoint);
        self.store.update_status(name, &status, None).await?;
        self.cache.upsert(endpoint).await;
        Ok(true)
    }

    async fn lease_gone(&self, record: &StoredRecord<S>) -> Result<(), SyncError> {
        let mut status = record.status.clone().unwrap_or_default();
        if status.deactivate() {
            self.store
                .update_status(&record.name, &status, record.resource_version.as_deref())
                .await?;
        }
        if record.labels.get(DHCP_IP_ACTIVE).map(String::as_str) != Some(VALUE_FALSE) {
            let labels = BTreeMap::from([(DHCP_IP_ACTIVE.to_string(), VALUE_FALSE.to_string())]);
            self.store.merge_labels(&record.name, &labels).await?;
            info!(host = %record.name, "DHCP lease of host is gone");
        }
        Ok(())
    }

    /// Pin a discovered client with a `BindingIp` named after the host.
    async fn ensure_binding(&self, name: &str, client: &DhcpClientInfo) -> Result<(), SyncError> {
        let Some(bindings) = &self.bindings else {
            return Ok(());
        };

        for (existing, spec) in bindings.list().await? {
            if spec.ip_addr == client.ip {
                if spec.mac_addr.eq_ignore_ascii_case(&client.mac) {
                    return Ok(());
                }
                warn!(
                    binding = %existing,
                    ip = %client.ip,
                    bound_mac = %spec.mac_addr,
                    lease_mac = %client.mac,
                    "IP is already bound to another MAC, not binding"
                );
                return Ok(());
            }
            if existing == name {
                warn!(
                    binding = %existing,
                    bound_ip = %spec.ip_addr,
                    lease_ip = %client.ip,
                    "BindingIp name is taken by another IP, not binding"
                );
                return Ok(());
            }
        }

        let spec = BindingIpSpec {
            subnet: client.subnet_name.clone(),
            ip_addr: client.ip.clone(),
            mac_addr: client.mac.clone(),
            hostname: (!client.hostname.is_empty()).then(|| client.hostname.clone()),
        };
        let labels = BTreeMap::from([(REDFISH_STATUS_OWNER.to_string(), name.to_string())]);
        match bindings.create(name, &spec, labels).await {
            Ok(()) => {
                info!(binding = %name, ip = %client.ip, mac = %client.mac, "Created BindingIp");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume lease events until `stop` turns true.
    ///
    /// Retryable failures are resubmitted to `resubmit` after the retry delay.
    pub async fn run_lease_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LeaseEvent>,
        resubmit: mpsc::Sender<LeaseEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(kind = S::KIND, "Processing lease events");
        while !*stop.borrow_and_update() {
            let event = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.on_lease_event(&event).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    warn!(
                        ip = %event.client.ip,
                        error = %e,
                        retry_after = ?self.retry_delay,
                        "Lease event failed, will retry"
                    );
                    let tx = resubmit.clone();
                    let delay = self.retry_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if tx.send(event).await.is_err() {
                            debug!("Lease event queue closed, dropping retried event");
                        }
                    });
                }
                Err(e) => error!(ip = %event.client.ip, error = %e, "Lease event failed"),
            }
        }
        info!(kind = S::KIND, "Lease event processing stopped");
    }
}

#[cfg(test)]
#[path = "synchronizer_tests.rs"]
mod synchronizer_tests;
