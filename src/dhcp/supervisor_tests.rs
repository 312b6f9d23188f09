// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `supervisor.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        is_lease_write, record_failure, DhcpSupervisor, MemoryLauncher, SupervisorDeps,
        SupervisorTiming,
    };
    use crate::config::test_agent_config;
    use crate::crd::{
        InterfaceConfig, Ipv4SubnetConfig, SubnetFeature, SubnetSpec, SubnetStatus,
        SyncRedfishStatusConfig,
    };
    use crate::dhcp::bindings::ManualBinding;
    use crate::dhcp::interface::MemoryLinkManager;
    use crate::dhcp::lease::{LeaseEvent, LeaseEventKind};
    use crate::dhcp_errors::DhcpError;
    use crate::status_reasons::{CONDITION_TYPE_DHCP_SERVER, REASON_FAILED};
    use crate::store::memory::MemoryStatusStore;
    use crate::store::StatusStore;
    use notify::event::{CreateKind, ModifyKind};
    use notify::{Event, EventKind};
    use std::collections::BTreeMap;
    use std::future::Future;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const TEMPLATE: &str = "interface={{ interface }}\n\
        {% for range in ip_ranges %}dhcp-range={{ range }}\n{% endfor %}\
        {% if dns %}dns={{ dns }}\n{% endif %}";

    struct Fixture {
        dir: TempDir,
        links: Arc<MemoryLinkManager>,
        launcher: Arc<MemoryLauncher>,
        subnets: Arc<MemoryStatusStore<SubnetStatus>>,
        lease_rx: mpsc::Receiver<LeaseEvent>,
        deps: SupervisorDeps,
    }

    impl Fixture {
        fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("dnsmasq.conf.j2");
        std::fs::write(&template, TEMPLATE).unwrap();
        let config = Arc::new(test_agent_config(dir.path(), &template));

        let links = Arc::new(MemoryLinkManager::new().with_link("eth1", true, &[]).await);
        let launcher = Arc::new(MemoryLauncher::new());
        let subnets = Arc::new(MemoryStatusStore::<SubnetStatus>::new("Subnet"));
        subnets
            .insert("net1", BTreeMap::new(), Some(SubnetStatus::default()))
            .await;
        let (lease_tx, lease_rx) = mpsc::channel(16);

        let deps = SupervisorDeps {
            config,
            links: links.clone(),
            launcher: launcher.clone(),
            subnets: subnets.clone(),
            lease_events: lease_tx,
            timing: SupervisorTiming {
                liveness_interval: Duration::from_millis(30),
                publish_tick: Duration::from_millis(10),
                startup_grace: Duration::ZERO,
            },
        };

        Fixture {
            dir,
            links,
            launcher,
            subnets,
            lease_rx,
            deps,
        }
    }

    fn spec(sync: bool) -> SubnetSpec {
        SubnetSpec {
            ipv4_subnet: Ipv4SubnetConfig {
                subnet: "10.0.0.0/24".to_string(),
                ip_range: "10.0.0.10-10.0.0.20".to_string(),
                gateway: None,
                dns: None,
            },
            interface: InterfaceConfig {
                interface: "eth1".to_string(),
                vlan_id: Some(100),
                ipv4: "10.0.0.2/24".to_string(),
            },
            feature: sync.then(|| SubnetFeature {
                sync_redfish_status: Some(SyncRedfishStatusConfig {
                    enabled: true,
                    enable_bind_dhcp_ip: false,
                    default_cluster_name: Some("rack-a".to_string()),
                }),
                ..Default::default()
            }),
        }
    }

    fn binding(ip: &str, mac: &str) -> ManualBinding {
        ManualBinding {
            ip: ip.to_string(),
            mac: mac.to_string(),
            hostname: "node17".to_string(),
            subnet: "net1".to_string(),
        }
    }

    /// Poll `check` until it holds or two seconds pass.
    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_start_provisions_renders_and_publishes() {
        let fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();

        assert_eq!(fx.launcher.launches(), 1);
        assert!(fx
            .links
            .mutations()
            .await
            .contains(&"add_vlan eth1.100".to_string()));

        let rendered = read(&fx.path("dhcp/config/net1.conf"));
        assert!(rendered.contains("interface=eth1.100"));
        assert!(rendered.contains("dhcp-range=10.0.0.10,10.0.0.20"));
        assert!(fx.path("dhcp/config/net1-bindings.conf").exists());

        let subnets = &fx.subnets;
        assert!(
            eventually(move || async move {
                subnets
                    .status("net1")
                    .await
                    .is_some_and(|s| s.host_node.as_deref() == Some("node-a"))
            })
            .await
        );
        let status = fx.subnets.status("net1").await.unwrap();
        let counters = status.dhcp_status.unwrap();
        assert_eq!(counters.dhcp_ip_total_amount, 11);
        assert_eq!(counters.dhcp_ip_available_amount, 11);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(sup.publish_requests(), 1);

        sup.stop().await;
        assert_eq!(fx.launcher.alive().await, 0);
    }

    #[tokio::test]
    async fn test_killed_daemon_is_restarted_with_one_publish() {
        let fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();
        let subnets = &fx.subnets;
        assert!(eventually(move || async move { subnets.status_writes().await == 1 }).await);
        assert_eq!(sup.publish_requests(), 1);

        fx.launcher.kill_all().await;

        let sup_ref = &sup;
        assert!(eventually(move || async move { sup_ref.restarts() == 1 }).await);
        // Several liveness ticks with a healthy daemon.
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(fx.launcher.launches(), 2);
        assert_eq!(sup.restarts(), 1);
        assert_eq!(sup.publish_requests(), 2);
        assert_eq!(fx.launcher.alive().await, 1);

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_binding_events_rewrite_file_and_reload() {
        let fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();
        let bindings_file = fx.path("dhcp/config/net1-bindings.conf");
        let launcher = &fx.launcher;

        sup.add_binding(binding("10.0.0.50", "aa:bb:cc:dd:ee:01")).unwrap();
        assert!(eventually(move || async move { launcher.reloads() == 1 }).await);
        let content = read(&bindings_file);
        assert!(content.contains("# hostname node17"));
        assert!(content.contains("dhcp-host=aa:bb:cc:dd:ee:01,10.0.0.50"));

        // Identical add and a removal for another MAC are no-ops.
        sup.add_binding(binding("10.0.0.50", "aa:bb:cc:dd:ee:01")).unwrap();
        sup.remove_binding(binding("10.0.0.50", "aa:bb:cc:dd:ee:99")).unwrap();
        sup.remove_binding(binding("10.0.0.50", "AA:BB:CC:DD:EE:01")).unwrap();

        assert!(eventually(move || async move { launcher.reloads() == 2 }).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.launcher.reloads(), 2);
        assert!(!read(&bindings_file).contains("10.0.0.50"));
        assert!(sup.bindings().await.is_empty());
        assert_eq!(fx.launcher.launches(), 1);

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_spec_update_reloads_without_restart() {
        let fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();
        let config_file = fx.path("dhcp/config/net1.conf");

        let mut updated = spec(false);
        updated.ipv4_subnet.dns = Some("10.0.0.53".to_string());
        sup.update(updated.clone()).unwrap();

        let launcher = &fx.launcher;
        assert!(eventually(move || async move { launcher.reloads() == 1 }).await);
        assert!(read(&config_file).contains("dns=10.0.0.53"));
        assert_eq!(sup.spec().await, updated);
        assert_eq!(fx.launcher.launches(), 1);

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_lease_changes_forwarded_when_sync_enabled() {
        let mut fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(true), fx.deps.clone())
            .await
            .unwrap();

        std::fs::write(
            fx.path("dhcp/lease/net1.leases"),
            "1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *\n",
        )
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), fx.lease_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, LeaseEventKind::Appeared);
        assert_eq!(event.client.ip, "10.0.0.10");
        assert_eq!(event.client.subnet_name, "net1");
        assert_eq!(event.client.cluster_name, "rack-a");

        let subnets = &fx.subnets;
        assert!(
            eventually(move || async move {
                subnets
                    .status("net1")
                    .await
                    .and_then(|s| s.dhcp_status)
                    .is_some_and(|d| d.dhcp_ip_active_amount == 1 && d.dhcp_ip_available_amount == 10)
            })
            .await
        );
        let details = fx.subnets.status("net1").await.unwrap().dhcp_client_details;
        assert!(details.contains("10.0.0.10"));

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_lease_changes_not_forwarded_without_sync() {
        let mut fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();

        std::fs::write(
            fx.path("dhcp/lease/net1.leases"),
            "1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *\n",
        )
        .unwrap();

        let sup_ref = &sup;
        assert!(
            eventually(move || async move { sup_ref.leases().await.contains_key("10.0.0.10") })
                .await
        );
        assert!(fx.lease_rx.try_recv().is_err());

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_start_fails_without_base_interface() {
        let mut fx = fixture().await;
        fx.deps.links = Arc::new(MemoryLinkManager::new());

        let err = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DhcpError::Interface(_)));
        assert_eq!(fx.launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_when_launch_refused() {
        let fx = fixture().await;
        fx.launcher.refuse_launches(true);

        let err = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DhcpError::Process { .. }));
    }

    #[tokio::test]
    async fn test_stopped_supervisor_rejects_commands() {
        let fx = fixture().await;
        let sup = DhcpSupervisor::start("net1", spec(false), fx.deps.clone())
            .await
            .unwrap();
        sup.stop().await;

        let err = sup.add_binding(binding("10.0.0.50", "aa:bb:cc:dd:ee:01")).unwrap_err();
        assert!(matches!(err, DhcpError::NotRunning(name) if name == "net1"));
    }

    #[tokio::test]
    async fn test_record_failure_appends_once() {
        let store = MemoryStatusStore::<SubnetStatus>::new("Subnet");
        store.insert("net1", BTreeMap::new(), None).await;

        record_failure(&store, "net1", "interface eth9 not found")
            .await
            .unwrap();
        record_failure(&store, "net1", "interface eth9 not found")
            .await
            .unwrap();

        let status = store.status("net1").await.unwrap();
        assert_eq!(status.conditions.len(), 1);
        let condition = &status.conditions[0];
        assert_eq!(condition.r#type, CONDITION_TYPE_DHCP_SERVER);
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason.as_deref(), Some(REASON_FAILED));
        assert_eq!(store.status_writes().await, 1);
    }

    #[tokio::test]
    async fn test_record_failure_missing_subnet() {
        let store = MemoryStatusStore::<SubnetStatus>::new("Subnet");
        let err = record_failure(&store, "gone", "boom").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get("gone").await.unwrap().is_none());
    }

    #[test]
    fn test_is_lease_write() {
        let lease = Path::new("/s/dhcp/lease/net1.leases");

        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/s/dhcp/lease/net1.leases"));
        assert!(is_lease_write(&modify, lease));

        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/s/dhcp/lease/net1.leases"));
        assert!(is_lease_write(&create, lease));

        let other_file = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/s/dhcp/lease/net2.leases"));
        assert!(!is_lease_write(&other_file, lease));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/s/dhcp/lease/net1.leases"));
        assert!(!is_lease_write(&access, lease));
    }
}
