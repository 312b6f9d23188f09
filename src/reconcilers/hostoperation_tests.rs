// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `hostoperation.rs`

#[cfg(test)]
mod tests {
    use super::super::{is_pending, run_operation};
    use crate::connection_cache::{ConnectionCache, Credentials, HostConnection, HostOrigin};
    use crate::constants::REQUEUE_SHORT_SECS;
    use crate::crd::{HostAction, HostOperationSpec, HostOperationStatus, RedfishHostStatus};
    use crate::host_status::fake::{FakeHost, FakeProtocol};
    use crate::host_status::synchronizer::HostStatusSynchronizer;
    use crate::lock::LockRegistry;
    use crate::store::memory::{MemoryCredentialSource, MemoryEventRecorder, MemoryStatusStore};
    use kube::runtime::controller::Action;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        protocol: FakeProtocol,
        operations: MemoryStatusStore<HostOperationStatus>,
        sync: HostStatusSynchronizer<FakeProtocol, RedfishHostStatus>,
    }

    async fn fixture() -> Fixture {
        let protocol = FakeProtocol::new();
        let sync = HostStatusSynchronizer::new(
            protocol.clone(),
            Arc::new(ConnectionCache::new("fake")),
            Arc::new(LockRegistry::new()),
            Arc::new(MemoryStatusStore::<RedfishHostStatus>::new("RedfishStatus")),
            Arc::new(MemoryEventRecorder::new()),
            Arc::new(MemoryCredentialSource::new()),
        );
        let operations = MemoryStatusStore::<HostOperationStatus>::new("HostOperation");
        operations.insert("reboot", BTreeMap::new(), None).await;
        Fixture {
            protocol,
            operations,
            sync,
        }
    }

    async fn cache_host(fx: &Fixture) {
        fx.sync
            .cache()
            .upsert(HostConnection {
                name: "node-17-bmc".to_string(),
                address: "10.20.0.17".to_string(),
                port: 443,
                https: true,
                credentials: Credentials::new("admin", "secret"),
                secret_name: "bmc-credentials".to_string(),
                secret_namespace: "topohub".to_string(),
                origin: HostOrigin::Static,
                cluster_name: "rack-a".to_string(),
                subnet_name: None,
            })
            .await;
    }

    fn spec(action: HostAction) -> HostOperationSpec {
        HostOperationSpec {
            action,
            redfish_status_name: "node-17-bmc".to_string(),
        }
    }

    #[test]
    fn test_is_pending() {
        assert!(is_pending(None));
        let mut status = HostOperationStatus::default();
        assert!(is_pending(Some(&status)));
        status.status = "Pending".to_string();
        assert!(is_pending(Some(&status)));
        status.status = "Success".to_string();
        assert!(!is_pending(Some(&status)));
        status.status = "Failed".to_string();
        assert!(!is_pending(Some(&status)));
    }

    #[tokio::test]
    async fn test_uncached_target_requeues() {
        let fx = fixture().await;

        let action = run_operation(
            &fx.sync,
            &fx.operations,
            "reboot",
            &spec(HostAction::ForceRestart),
            None,
        )
        .await;

        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SHORT_SECS)));
        assert_eq!(fx.operations.status_writes().await, 0);
    }

    #[tokio::test]
    async fn test_successful_action_is_recorded() {
        let fx = fixture().await;
        cache_host(&fx).await;
        fx.protocol.reachable("10.20.0.17", &[]).await;

        let action = run_operation(
            &fx.sync,
            &fx.operations,
            "reboot",
            &spec(HostAction::PxeReboot),
            None,
        )
        .await;

        assert_eq!(action, Action::await_change());
        assert_eq!(
            fx.protocol.power_calls().await,
            vec![("10.20.0.17".to_string(), HostAction::PxeReboot)]
        );
        let status = fx.operations.status("reboot").await.unwrap();
        assert_eq!(status.status, "Success");
        assert_eq!(status.cluster_name, "rack-a");
        assert_eq!(status.ip_addr, "10.20.0.17");
        assert!(!status.last_update_time.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_action_is_recorded_as_failed() {
        let fx = fixture().await;
        cache_host(&fx).await;
        fx.protocol
            .set_host(
                "10.20.0.17",
                FakeHost {
                    reachable: true,
                    fail_power: true,
                    ..FakeHost::default()
                },
            )
            .await;

        run_operation(
            &fx.sync,
            &fx.operations,
            "reboot",
            &spec(HostAction::ForceOff),
            None,
        )
        .await;

        let status = fx.operations.status("reboot").await.unwrap();
        assert_eq!(status.status, "Failed");
        assert!(status.message.contains("ForceOff"));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_operation() {
        let fx = fixture().await;
        cache_host(&fx).await;

        run_operation(
            &fx.sync,
            &fx.operations,
            "reboot",
            &spec(HostAction::On),
            None,
        )
        .await;

        let status = fx.operations.status("reboot").await.unwrap();
        assert_eq!(status.status, "Failed");
        assert!(fx.protocol.power_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_finished_operation_is_not_rerun() {
        let fx = fixture().await;
        cache_host(&fx).await;
        fx.protocol.reachable("10.20.0.17", &[]).await;
        let done = HostOperationStatus {
            status: "Success".to_string(),
            ..HostOperationStatus::default()
        };

        run_operation(
            &fx.sync,
            &fx.operations,
            "reboot",
            &spec(HostAction::On),
            Some(&done),
        )
        .await;

        assert!(fx.protocol.power_calls().await.is_empty());
    }
}
