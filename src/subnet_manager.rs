// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Routes `Subnet` and `BindingIp` changes to per-subnet DHCP supervisors.
//!
//! The manager owns one [`DhcpSupervisor`] per subnet. A subnet seen for the
//! first time is started; a spec that differs from the last applied one is
//! pushed to the running supervisor as an update; a deleted subnet is stopped
//! and forgotten.
//!
//! Binding events travel through a bounded queue. An event for a subnet whose
//! supervisor is not running yet is resubmitted after a delay, which covers the
//! window at startup where bindings are replayed before every subnet is up.

use crate::constants::{BINDING_EVENT_RETRY_DELAY, EVENT_QUEUE_CAPACITY};
use crate::crd::SubnetSpec;
use crate::dhcp::{DhcpSupervisor, ManualBinding, SupervisorDeps};
use crate::dhcp_errors::DhcpError;
use crate::metrics;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// A static binding appeared or disappeared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingEvent {
    Added(ManualBinding),
    Deleted(ManualBinding),
}

impl BindingEvent {
    #[must_use]
    pub fn binding(&self) -> &ManualBinding {
        match self {
            Self::Added(b) | Self::Deleted(b) => b,
        }
    }
}

/// Outcome of [`SubnetManager::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetChange {
    /// The spec matches the last applied one.
    Unchanged,
    Started,
    Updated,
}

/// Last known `BindingIp` records, keyed by record name.
#[derive(Debug, Default)]
pub struct BindingIndex {
    entries: RwLock<BTreeMap<String, ManualBinding>>,
}

impl BindingIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `binding` under `name`, returning what it replaced.
    pub async fn upsert(&self, name: &str, binding: ManualBinding) -> Option<ManualBinding> {
        self.entries.write().await.insert(name.to_string(), binding)
    }

    pub async fn remove(&self, name: &str) -> Option<ManualBinding> {
        self.entries.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<ManualBinding> {
        self.entries.read().await.get(name).cloned()
    }

    /// Bindings that belong to `subnet`, ordered by record name.
    pub async fn for_subnet(&self, subnet: &str) -> Vec<ManualBinding> {
        self.entries
            .read()
            .await
            .values()
            .filter(|b| b.subnet == subnet)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<ManualBinding> {
        self.entries.read().await.values().cloned().collect()
    }
}

/// Owns the DHCP supervisors of this node.
pub struct SubnetManager {
    deps: SupervisorDeps,
    supervisors: RwLock<HashMap<String, Arc<DhcpSupervisor>>>,
    applied: RwLock<HashMap<String, SubnetSpec>>,
    bindings: Arc<BindingIndex>,
    binding_tx: mpsc::Sender<BindingEvent>,
    binding_rx: Mutex<Option<mpsc::Receiver<BindingEvent>>>,
    binding_retry_delay: Duration,
    stop_tx: watch::Sender<bool>,
}

impl SubnetManager {
    #[must_use]
    pub fn new(deps: SupervisorDeps) -> Self {
        let (binding_tx, binding_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            deps,
            supervisors: RwLock::new(HashMap::new()),
            applied: RwLock::new(HashMap::new()),
            bindings: Arc::new(BindingIndex::new()),
            binding_tx,
            binding_rx: Mutex::new(Some(binding_rx)),
            binding_retry_delay: BINDING_EVENT_RETRY_DELAY,
            stop_tx,
        }
    }

    /// Override the delay before an unroutable binding event is retried.
    #[must_use]
    pub fn with_binding_retry_delay(mut self, delay: Duration) -> Self {
        self.binding_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn binding_index(&self) -> Arc<BindingIndex> {
        Arc::clone(&self.bindings)
    }

    /// Sender side of the binding event queue.
    #[must_use]
    pub fn binding_events(&self) -> mpsc::Sender<BindingEvent> {
        self.binding_tx.clone()
    }

    pub async fn supervisor(&self, name: &str) -> Option<Arc<DhcpSupervisor>> {
        self.supervisors.read().await.get(name).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.supervisors.read().await.len()
    }

    /// Converge the supervisor of `name` to `spec`.
    ///
    /// # Errors
    ///
    /// Returns the start or update failure. The spec is not recorded as applied
    /// in that case, so the next reconcile tries again.
    pub async fn apply(&self, name: &str, spec: &SubnetSpec) -> Result<SubnetChange, DhcpError> {
        if self.applied.read().await.get(name) == Some(spec) {
            debug!(subnet = %name, "Subnet spec unchanged");
            return Ok(SubnetChange::Unchanged);
        }

        info!(
            subnet = %name,
            cidr = %spec.ipv4_subnet.subnet,
            ip_range = %spec.ipv4_subnet.ip_range,
            "Subnet is new or its spec changed"
        );

        let change = match self.supervisor(name).await {
            Some(supervisor) => {
                supervisor.update(spec.clone())?;
                info!(subnet = %name, "Updated DHCP server");
                SubnetChange::Updated
            }
            None => {
                self.start(name, spec).await?;
                SubnetChange::Started
            }
        };

        self.applied
            .write()
            .await
            .insert(name.to_string(), spec.clone());
        Ok(change)
    }

    /// Start a supervisor and seed it with the bindings already known for it.
    async fn start(&self, name: &str, spec: &SubnetSpec) -> Result<(), DhcpError> {
        let supervisor =
            Arc::new(DhcpSupervisor::start(name, spec.clone(), self.deps.clone()).await?);
        info!(subnet = %name, "Started DHCP server");

        let known = self.bindings.for_subnet(name).await;
        if !known.is_empty() {
            info!(subnet = %name, count = known.len(), "Applying known bindings to new DHCP server");
        }
        for binding in known {
            supervisor.add_binding(binding)?;
        }

        self.supervisors
            .write()
            .await
            .insert(name.to_string(), supervisor);
        self.publish_active_count().await;
        Ok(())
    }

    /// Stop and forget the supervisor of a deleted subnet.
    ///
    /// Returns `false` when no supervisor was running.
    pub async fn remove(&self, name: &str) -> bool {
        self.applied.write().await.remove(name);
        let removed = self.supervisors.write().await.remove(name);
        match removed {
            Some(supervisor) => {
                info!(subnet = %name, "Subnet deleted, stopping DHCP server");
                supervisor.stop().await;
                self.publish_active_count().await;
                true
            }
            None => {
                debug!(subnet = %name, "Subnet deleted, no DHCP server was running");
                false
            }
        }
    }

    /// Start every listed subnet that has no supervisor yet. Used when this
    /// replica becomes leader. Failures are logged and left to the controller.
    pub async fn start_all(&self, subnets: Vec<(String, SubnetSpec)>) {
        for (name, spec) in subnets {
            if self.supervisor(&name).await.is_some() {
                continue;
            }
            match self.start(&name, &spec).await {
                Ok(()) => {
                    self.applied.write().await.insert(name, spec);
                }
                Err(e) => error!(subnet = %name, error = %e, "Failed to start DHCP server"),
            }
        }
    }

    /// Stop every supervisor and the binding router.
    pub async fn stop_all(&self) {
        info!("Stopping subnet manager");
        self.stop_tx.send_replace(true);
        let supervisors: Vec<_> = self.supervisors.write().await.drain().collect();
        self.applied.write().await.clear();
        for (name, supervisor) in supervisors {
            debug!(subnet = %name, "Stopping DHCP server");
            supervisor.stop().await;
        }
        self.publish_active_count().await;
    }

    /// Consume the binding event queue until [`SubnetManager::stop_all`].
    ///
    /// Only the first call does anything; the queue has a single consumer.
    pub async fn run_binding_router(&self) {
        let Some(mut rx) = self.binding_rx.lock().await.take() else {
            warn!("Binding event router already running");
            return;
        };
        let mut stop = self.stop_tx.subscribe();
        info!("Processing binding events");

        while !*stop.borrow_and_update() {
            tokio::select! {
                _ = stop.changed() => {}
                event = rx.recv() => match event {
                    Some(event) => self.route_binding(event).await,
                    None => break,
                },
            }
        }
        info!("Binding event router stopped");
    }

    async fn route_binding(&self, event: BindingEvent) {
        let subnet = event.binding().subnet.clone();
        if subnet.is_empty() {
            error!(event = ?event, "Binding event without subnet, skipping");
            return;
        }

        let Some(supervisor) = self.supervisor(&subnet).await else {
            warn!(
                subnet = %subnet,
                retry_after = ?self.binding_retry_delay,
                "Subnet is not running, will retry binding event"
            );
            let tx = self.binding_tx.clone();
            let delay = self.binding_retry_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if tx.send(event).await.is_err() {
                    debug!("Binding event queue closed, dropping retried event");
                }
            });
            return;
        };

        let result = match event {
            BindingEvent::Added(binding) => {
                debug!(subnet = %subnet, ip = %binding.ip, "Routing binding add");
                supervisor.add_binding(binding)
            }
            BindingEvent::Deleted(binding) => {
                debug!(subnet = %subnet, ip = %binding.ip, "Routing binding delete");
                supervisor.remove_binding(binding)
            }
        };
        if let Err(e) = result {
            error!(subnet = %subnet, error = %e, "Failed to apply binding event");
        }
    }

    async fn publish_active_count(&self) {
        let count = self.active_count().await;
        metrics::set_active_subnets(&self.deps.config.node_name, count);
    }
}

#[cfg(test)]
#[path = "subnet_manager_tests.rs"]
mod subnet_manager_tests;
