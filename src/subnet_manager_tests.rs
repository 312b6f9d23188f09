// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `subnet_manager.rs`

#[cfg(test)]
mod tests {
    use super::super::{BindingEvent, BindingIndex, SubnetChange, SubnetManager};
    use crate::config::test_agent_config;
    use crate::crd::{InterfaceConfig, Ipv4SubnetConfig, SubnetSpec, SubnetStatus};
    use crate::dhcp::interface::MemoryLinkManager;
    use crate::dhcp::supervisor::MemoryLauncher;
    use crate::dhcp::{ManualBinding, SupervisorDeps, SupervisorTiming};
    use crate::store::memory::MemoryStatusStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        launcher: Arc<MemoryLauncher>,
        manager: Arc<SubnetManager>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.j2");
        std::fs::write(&template, "interface={{ interface }}\n").unwrap();

        let links = MemoryLinkManager::new()
            .with_link("eth1", true, &[])
            .await
            .with_link("eth2", true, &[])
            .await;
        let launcher = Arc::new(MemoryLauncher::new());
        let subnets = Arc::new(MemoryStatusStore::<SubnetStatus>::new("Subnet"));
        for name in ["net1", "net2"] {
            subnets
                .insert(name, BTreeMap::new(), Some(SubnetStatus::default()))
                .await;
        }
        let (lease_tx, _lease_rx) = mpsc::channel(16);

        let deps = SupervisorDeps {
            config: Arc::new(test_agent_config(dir.path(), &template)),
            links: Arc::new(links),
            launcher: launcher.clone(),
            subnets,
            lease_events: lease_tx,
            timing: SupervisorTiming {
                liveness_interval: Duration::from_secs(60),
                publish_tick: Duration::from_millis(10),
                startup_grace: Duration::ZERO,
            },
        };
        let manager =
            Arc::new(SubnetManager::new(deps).with_binding_retry_delay(Duration::from_millis(50)));

        Fixture {
            _dir: dir,
            launcher,
            manager,
        }
    }

    fn spec(interface: &str, cidr: &str, range: &str) -> SubnetSpec {
        SubnetSpec {
            ipv4_subnet: Ipv4SubnetConfig {
                subnet: cidr.to_string(),
                ip_range: range.to_string(),
                gateway: None,
                dns: None,
            },
            interface: InterfaceConfig {
                interface: interface.to_string(),
                vlan_id: None,
                ipv4: cidr.replace(".0/", ".2/"),
            },
            feature: None,
        }
    }

    fn net1() -> SubnetSpec {
        spec("eth1", "10.0.0.0/24", "10.0.0.10-10.0.0.20")
    }

    fn binding(subnet: &str, ip: &str) -> ManualBinding {
        ManualBinding {
            ip: ip.to_string(),
            mac: "aa:bb:cc:dd:ee:01".to_string(),
            hostname: String::new(),
            subnet: subnet.to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_starts_then_skips_identical_spec() {
        let fx = fixture().await;

        let first = fx.manager.apply("net1", &net1()).await.unwrap();
        let second = fx.manager.apply("net1", &net1()).await.unwrap();

        assert_eq!(first, SubnetChange::Started);
        assert_eq!(second, SubnetChange::Unchanged);
        assert_eq!(fx.launcher.launches(), 1);
        assert_eq!(fx.manager.active_count().await, 1);

        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_apply_changed_spec_updates_running_supervisor() {
        let fx = fixture().await;
        fx.manager.apply("net1", &net1()).await.unwrap();

        let mut changed = net1();
        changed.ipv4_subnet.gateway = Some("10.0.0.1".to_string());
        let outcome = fx.manager.apply("net1", &changed).await.unwrap();

        assert_eq!(outcome, SubnetChange::Updated);
        assert_eq!(fx.launcher.launches(), 1);

        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_failed_start_is_not_recorded() {
        let fx = fixture().await;
        let broken = spec("eth9", "10.0.0.0/24", "10.0.0.10-10.0.0.20");

        assert!(fx.manager.apply("net1", &broken).await.is_err());
        assert!(fx.manager.apply("net1", &broken).await.is_err());
        assert_eq!(fx.manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_stops_supervisor() {
        let fx = fixture().await;
        fx.manager.apply("net1", &net1()).await.unwrap();

        assert!(fx.manager.remove("net1").await);
        assert!(!fx.manager.remove("net1").await);
        assert_eq!(fx.manager.active_count().await, 0);
        assert_eq!(fx.launcher.alive().await, 0);

        // A re-created subnet starts again.
        let outcome = fx.manager.apply("net1", &net1()).await.unwrap();
        assert_eq!(outcome, SubnetChange::Started);

        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_new_supervisor_receives_indexed_bindings() {
        let fx = fixture().await;
        let index = fx.manager.binding_index();
        index.upsert("10-0-0-50", binding("net1", "10.0.0.50")).await;
        index.upsert("10-1-0-50", binding("net2", "10.1.0.50")).await;

        fx.manager.apply("net1", &net1()).await.unwrap();
        let supervisor = fx.manager.supervisor("net1").await.unwrap();

        let mut bindings = BTreeMap::new();
        for _ in 0..100 {
            bindings = supervisor.bindings().await;
            if !bindings.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bindings.len(), 1);
        assert!(bindings.contains_key("10.0.0.50"));

        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_binding_event_retried_until_subnet_runs() {
        let fx = fixture().await;
        let router = {
            let manager = Arc::clone(&fx.manager);
            tokio::spawn(async move { manager.run_binding_router().await })
        };

        fx.manager
            .binding_events()
            .send(BindingEvent::Added(binding("net1", "10.0.0.60")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        fx.manager.apply("net1", &net1()).await.unwrap();

        let supervisor = fx.manager.supervisor("net1").await.unwrap();
        let mut routed = false;
        for _ in 0..200 {
            if supervisor.bindings().await.contains_key("10.0.0.60") {
                routed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(routed);

        fx.manager.stop_all().await;
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_binding_event_without_subnet_is_dropped() {
        let fx = fixture().await;
        fx.manager.apply("net1", &net1()).await.unwrap();
        let router = {
            let manager = Arc::clone(&fx.manager);
            tokio::spawn(async move { manager.run_binding_router().await })
        };

        fx.manager
            .binding_events()
            .send(BindingEvent::Added(binding("", "10.0.0.70")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let supervisor = fx.manager.supervisor("net1").await.unwrap();
        assert!(supervisor.bindings().await.is_empty());

        fx.manager.stop_all().await;
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_all_skips_running_and_tolerates_failures() {
        let fx = fixture().await;
        fx.manager.apply("net1", &net1()).await.unwrap();

        fx.manager
            .start_all(vec![
                ("net1".to_string(), net1()),
                (
                    "net2".to_string(),
                    spec("eth2", "10.1.0.0/24", "10.1.0.10-10.1.0.20"),
                ),
                (
                    "broken".to_string(),
                    spec("eth9", "10.2.0.0/24", "10.2.0.10"),
                ),
            ])
            .await;

        assert_eq!(fx.launcher.launches(), 2);
        assert_eq!(fx.manager.active_count().await, 2);
        assert!(fx.manager.supervisor("broken").await.is_none());

        // Started at leader startup counts as applied.
        let outcome = fx
            .manager
            .apply("net2", &spec("eth2", "10.1.0.0/24", "10.1.0.10-10.1.0.20"))
            .await
            .unwrap();
        assert_eq!(outcome, SubnetChange::Unchanged);

        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_binding_index() {
        let index = BindingIndex::new();
        assert!(index.upsert("a", binding("net1", "10.0.0.5")).await.is_none());
        let previous = index.upsert("a", binding("net1", "10.0.0.6")).await;
        assert_eq!(previous.unwrap().ip, "10.0.0.5");
        index.upsert("b", binding("net2", "10.1.0.5")).await;

        assert_eq!(index.for_subnet("net1").await.len(), 1);
        assert_eq!(index.all().await.len(), 2);
        assert_eq!(index.remove("a").await.unwrap().ip, "10.0.0.6");
        assert!(index.get("a").await.is_none());
    }
}
