// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Scriptable [`HostProtocol`] for tests.
//!
//! Hosts are scripted by address. A session reads the scripted state on every
//! call, so toggling reachability affects sessions that are already open.

use super::{HostInfo, HostProtocol, HostSession, LogEntry};
use crate::connection_cache::HostConnection;
use crate::crd::HostAction;
use crate::host_errors::HostError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted behaviour of one host.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    pub reachable: bool,
    pub info: HostInfo,
    pub logs: Vec<LogEntry>,
    /// Reject power actions with a protocol error.
    pub fail_power: bool,
}

#[derive(Default)]
struct FakeState {
    hosts: Mutex<HashMap<String, FakeHost>>,
    connects: AtomicUsize,
    probe_delay: Mutex<Duration>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    power_calls: Mutex<Vec<(String, HostAction)>>,
}

/// Protocol whose hosts are scripted in memory.
#[derive(Clone, Default)]
pub struct FakeProtocol {
    state: Arc<FakeState>,
}

impl FakeProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a reachable host answering `info`.
    pub async fn reachable(&self, address: &str, info: &[(&str, &str)]) {
        let info = info
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.set_host(
            address,
            FakeHost {
                reachable: true,
                info,
                ..FakeHost::default()
            },
        )
        .await;
    }

    pub async fn set_host(&self, address: &str, host: FakeHost) {
        self.state
            .hosts
            .lock()
            .await
            .insert(address.to_string(), host);
    }

    pub async fn set_reachable(&self, address: &str, reachable: bool) {
        self.state
            .hosts
            .lock()
            .await
            .entry(address.to_string())
            .or_default()
            .reachable = reachable;
    }

    pub async fn set_logs(&self, address: &str, logs: Vec<LogEntry>) {
        self.state
            .hosts
            .lock()
            .await
            .entry(address.to_string())
            .or_default()
            .logs = logs;
    }

    /// Hold every info request for `delay` to widen race windows.
    pub async fn set_probe_delay(&self, delay: Duration) {
        *self.state.probe_delay.lock().await = delay;
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent info requests seen for a single address.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn power_calls(&self) -> Vec<(String, HostAction)> {
        self.state.power_calls.lock().await.clone()
    }
}

#[async_trait]
impl HostProtocol for FakeProtocol {
    type Session = FakeSession;

    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self, endpoint: &HostConnection) -> Result<FakeSession, HostError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let reachable = self
            .state
            .hosts
            .lock()
            .await
            .get(&endpoint.address)
            .is_some_and(|h| h.reachable);
        if !reachable {
            return Err(HostError::Connect {
                address: endpoint.address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(FakeSession {
            address: endpoint.address.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakeSession {
    address: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    async fn host(&self) -> Result<FakeHost, HostError> {
        match self.state.hosts.lock().await.get(&self.address) {
            Some(host) if host.reachable => Ok(host.clone()),
            _ => Err(HostError::Connect {
                address: self.address.clone(),
                reason: "connection reset".to_string(),
            }),
        }
    }
}

#[async_trait]
impl HostSession for FakeSession {
    async fn is_healthy(&self) -> bool {
        self.host().await.is_ok()
    }

    async fn info(&self) -> Result<HostInfo, HostError> {
        {
            let mut in_flight = self.state.in_flight.lock().await;
            let count = in_flight.entry(self.address.clone()).or_default();
            *count += 1;
            self.state.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        }

        let delay = *self.state.probe_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.host().await.map(|h| h.info);

        if let Some(count) = self.state.in_flight.lock().await.get_mut(&self.address) {
            *count -= 1;
        }
        result
    }

    async fn logs(&self) -> Result<Vec<LogEntry>, HostError> {
        self.host().await.map(|h| h.logs)
    }

    async fn power(&self, action: HostAction) -> Result<(), HostError> {
        let host = self.host().await?;
        if host.fail_power {
            return Err(HostError::Protocol {
                address: self.address.clone(),
                reason: format!("{action:?} rejected"),
            });
        }
        self.state
            .power_calls
            .lock()
            .await
            .push((self.address.clone(), action));
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<String, HostError> {
        self.host().await?;
        Ok(format!("{command}\n"))
    }
}
