// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `secret.rs`

#[cfg(test)]
mod tests {
    use super::super::rotate_credentials;
    use crate::connection_cache::{ConnectionCache, Credentials, HostConnection, HostOrigin};
    use crate::crd::{RedfishBasicInfo, RedfishHostStatus};
    use crate::host_status::fake::FakeProtocol;
    use crate::host_status::synchronizer::HostStatusSynchronizer;
    use crate::lock::LockRegistry;
    use crate::store::memory::{MemoryCredentialSource, MemoryEventRecorder, MemoryStatusStore};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn host(name: &str, address: &str, secret: &str) -> HostConnection {
        HostConnection {
            name: name.to_string(),
            address: address.to_string(),
            port: 443,
            https: true,
            credentials: Credentials::new("admin", "old"),
            secret_name: secret.to_string(),
            secret_namespace: "topohub".to_string(),
            origin: HostOrigin::Static,
            cluster_name: String::new(),
            subnet_name: None,
        }
    }

    #[tokio::test]
    async fn test_rotation_updates_and_reprobes_matching_hosts() {
        let protocol = FakeProtocol::new();
        protocol.reachable("10.0.0.5", &[("Vendor", "Dell")]).await;
        protocol.reachable("10.0.0.6", &[("Vendor", "HPE")]).await;
        let store = Arc::new(MemoryStatusStore::<RedfishHostStatus>::new("RedfishStatus"));
        let sync = HostStatusSynchronizer::new(
            protocol.clone(),
            Arc::new(ConnectionCache::new("fake")),
            Arc::new(LockRegistry::new()),
            store.clone(),
            Arc::new(MemoryEventRecorder::new()),
            Arc::new(MemoryCredentialSource::new()),
        );
        for (name, address, secret) in [("a", "10.0.0.5", "bmc"), ("b", "10.0.0.6", "other")] {
            let status = RedfishHostStatus {
                basic: RedfishBasicInfo {
                    ip_addr: address.to_string(),
                    ..RedfishBasicInfo::default()
                },
                ..RedfishHostStatus::default()
            };
            store.insert(name, BTreeMap::new(), Some(status)).await;
            sync.cache().upsert(host(name, address, secret)).await;
        }

        let fresh = Credentials::new("admin", "new");
        assert_eq!(rotate_credentials(&sync, "bmc", "topohub", &fresh).await, 1);

        assert_eq!(sync.cache().get("a").await.unwrap().credentials, fresh);
        assert_eq!(
            sync.cache().get("b").await.unwrap().credentials,
            Credentials::new("admin", "old")
        );
        assert!(store.status("a").await.unwrap().healthy);
        assert!(!store.status("b").await.unwrap().healthy);

        // Same credentials again change nothing.
        assert_eq!(rotate_credentials(&sync, "bmc", "topohub", &fresh).await, 0);
    }
}
