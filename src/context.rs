// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every controller receives an `Arc<Context>` holding:
//! - the Kubernetes client, for finalizer patches and record creation
//! - the immutable [`AgentConfig`]
//! - the [`SubnetManager`] that owns this node's DHCP servers
//! - one [`HostStatusSynchronizer`] per management protocol
//! - store handles for the status records the controllers write
//! - reflector stores for lookups that would otherwise need an API call

use crate::config::AgentConfig;
use crate::connection_cache::ConnectionCache;
use crate::crd::{
    HostEndpoint, HostOperation, HostOperationStatus, RedfishHostStatus, RedfishStatus,
    SshHostStatus, SshStatus, Subnet, SubnetStatus,
};
use crate::dhcp::interface::IpLinkManager;
use crate::dhcp::{DnsmasqLauncher, LeaseEvent, SupervisorDeps, SupervisorTiming};
use crate::host_status::redfish::RedfishProtocol;
use crate::host_status::ssh::SshProtocol;
use crate::host_status::synchronizer::{DhcpDefaults, HostStatusSynchronizer};
use crate::lock::LockRegistry;
use crate::store::kube::{KubeBindingStore, KubeCredentialSource, KubeEventRecorder, KubeStatusStore};
use crate::store::{CredentialSource, HostRecordStore, StatusStore};
use crate::subnet_manager::SubnetManager;
use kube::runtime::reflector::Store;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Synchronizer for BMC hosts.
pub type RedfishSynchronizer = HostStatusSynchronizer<RedfishProtocol, RedfishHostStatus>;

/// Synchronizer for SSH hosts.
pub type SshSynchronizer = HostStatusSynchronizer<SshProtocol, SshHostStatus>;

/// Reflector stores populated by background watchers.
#[derive(Clone)]
pub struct Stores {
    pub host_endpoints: Store<HostEndpoint>,
}

impl Stores {
    #[must_use]
    pub fn get_host_endpoint(&self, name: &str) -> Option<Arc<HostEndpoint>> {
        self.host_endpoints
            .state()
            .iter()
            .find(|ep| ep.name_any() == name)
            .cloned()
    }
}

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<AgentConfig>,
    pub stores: Stores,
    pub subnets: Arc<SubnetManager>,
    pub redfish: Arc<RedfishSynchronizer>,
    pub ssh: Arc<SshSynchronizer>,
    pub subnet_records: Arc<dyn StatusStore<SubnetStatus>>,
    pub redfish_records: Arc<dyn HostRecordStore<RedfishHostStatus>>,
    pub ssh_records: Arc<dyn HostRecordStore<SshHostStatus>>,
    pub operation_records: Arc<dyn StatusStore<HostOperationStatus>>,
    pub credentials: Arc<dyn CredentialSource>,
}

impl Context {
    /// Wire the production collaborators around `client`.
    ///
    /// Lease events produced by the DHCP supervisors are sent on `lease_events`.
    #[must_use]
    pub fn new(
        client: Client,
        config: Arc<AgentConfig>,
        stores: Stores,
        lease_events: mpsc::Sender<LeaseEvent>,
    ) -> Self {
        let subnet_records: Arc<dyn StatusStore<SubnetStatus>> =
            Arc::new(KubeStatusStore::<Subnet>::new(client.clone()));
        let redfish_records: Arc<dyn HostRecordStore<RedfishHostStatus>> =
            Arc::new(KubeStatusStore::<RedfishStatus>::new(client.clone()));
        let ssh_records: Arc<dyn HostRecordStore<SshHostStatus>> =
            Arc::new(KubeStatusStore::<SshStatus>::new(client.clone()));
        let operation_records: Arc<dyn StatusStore<HostOperationStatus>> =
            Arc::new(KubeStatusStore::<HostOperation>::new(client.clone()));
        let credentials: Arc<dyn CredentialSource> =
            Arc::new(KubeCredentialSource::new(client.clone()));
        let events = Arc::new(KubeEventRecorder::new(client.clone(), &config.pod_namespace));

        // Both synchronizers share one registry so a host is never probed twice at once.
        let locks = Arc::new(LockRegistry::new());

        let redfish = Arc::new(
            HostStatusSynchronizer::new(
                RedfishProtocol::new(),
                Arc::new(ConnectionCache::new("redfish")),
                Arc::clone(&locks),
                Arc::clone(&redfish_records),
                events.clone(),
                Arc::clone(&credentials),
            )
            .with_dhcp(
                DhcpDefaults::from_config(&config),
                Arc::new(KubeBindingStore::new(client.clone())),
            ),
        );
        let ssh = Arc::new(HostStatusSynchronizer::new(
            SshProtocol::new(),
            Arc::new(ConnectionCache::new("ssh")),
            locks,
            Arc::clone(&ssh_records),
            events,
            Arc::clone(&credentials),
        ));

        let subnets = Arc::new(SubnetManager::new(SupervisorDeps {
            config: Arc::clone(&config),
            links: Arc::new(IpLinkManager),
            launcher: Arc::new(DnsmasqLauncher),
            subnets: Arc::clone(&subnet_records),
            lease_events,
            timing: SupervisorTiming::default(),
        }));

        Self {
            client,
            config,
            stores,
            subnets,
            redfish,
            ssh,
            subnet_records,
            redfish_records,
            ssh_records,
            operation_records,
            credentials,
        }
    }
}
