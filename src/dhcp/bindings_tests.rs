// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `bindings.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        count_range, ensure_file, merge_client_view, merge_subnet_status, parse_ip_ranges,
        render_bindings, write_atomic, BindingMap, ClientDetail, ManualBinding, StatusReport,
    };
    use crate::crd::{BindingIpSpec, SubnetStatus};
    use crate::dhcp::lease::{parse_leases, LeaseContext, LeaseSnapshot};
    use crate::status_reasons::{CONDITION_TYPE_DHCP_SERVER, REASON_HOST_CHANGE};
    use std::collections::BTreeMap;

    fn leases(content: &str) -> LeaseSnapshot {
        parse_leases(content, &LeaseContext::default())
    }

    fn binding(ip: &str, mac: &str, hostname: &str) -> ManualBinding {
        ManualBinding {
            ip: ip.to_string(),
            mac: mac.to_string(),
            hostname: hostname.to_string(),
            subnet: "net1".to_string(),
        }
    }

    fn bindings(items: &[ManualBinding]) -> BindingMap {
        items.iter().map(|b| (b.ip.clone(), b.clone())).collect()
    }

    #[test]
    fn test_manual_binding_from_spec() {
        let spec = BindingIpSpec {
            subnet: "net1".to_string(),
            ip_addr: "10.0.0.5".to_string(),
            mac_addr: "cc:dd:cc:dd:cc:dd".to_string(),
            hostname: None,
        };
        let b = ManualBinding::from(&spec);
        assert_eq!(b.ip, "10.0.0.5");
        assert_eq!(b.hostname, "");
    }

    #[test]
    fn test_render_bindings_format() {
        let rendered = render_bindings(&bindings(&[
            binding("10.0.0.5", "cc:dd:cc:dd:cc:dd", "node5"),
            binding("10.0.0.6", "ee:ff:ee:ff:ee:ff", ""),
        ]));
        assert_eq!(
            rendered,
            "# hostname node5\ndhcp-host=cc:dd:cc:dd:cc:dd,10.0.0.5\ndhcp-host=ee:ff:ee:ff:ee:ff,10.0.0.6\n"
        );
    }

    #[test]
    fn test_render_empty_bindings() {
        assert_eq!(render_bindings(&BindingMap::new()), "\n");
    }

    #[test]
    fn test_static_binding_wins_over_lease() {
        let leases = leases("1700000000 aa:bb:aa:bb:aa:bb 10.0.0.5 leased *");
        let bindings = bindings(&[binding("10.0.0.5", "cc:dd:cc:dd:cc:dd", "")]);

        let view = merge_client_view(&leases, &bindings);
        let entry = &view.clients["10.0.0.5"];
        assert_eq!(entry.mac, "cc:dd:cc:dd:cc:dd");
        assert!(entry.is_bound);
        assert!(entry.is_allocated);
        assert_eq!(entry.hostname, "leased");
        assert_eq!(view.conflicts.len(), 1);
        assert_eq!(view.conflicts[0].leased_mac, "aa:bb:aa:bb:aa:bb");

        assert!(render_bindings(&bindings).contains("dhcp-host=cc:dd:cc:dd:cc:dd,10.0.0.5"));
    }

    #[test]
    fn test_matching_mac_is_not_a_conflict() {
        let leases = leases("1700000000 cc:dd:cc:dd:cc:dd 10.0.0.5 h *");
        let bindings = bindings(&[binding("10.0.0.5", "CC:DD:CC:DD:CC:DD", "")]);
        assert!(merge_client_view(&leases, &bindings).conflicts.is_empty());
    }

    #[test]
    fn test_client_details_json() {
        let view = merge_client_view(
            &leases("1700000000 aa:bb:aa:bb:aa:bb 10.0.0.7 h7 *"),
            &BindingMap::new(),
        );
        let parsed: BTreeMap<String, ClientDetail> = serde_json::from_str(&view.to_json()).unwrap();
        let entry = &parsed["10.0.0.7"];
        assert!(!entry.is_bound);
        assert!(entry.is_allocated);
        assert!(entry.dhcp_expire_time.starts_with("2023-11-14"));
        assert!(view.to_json().contains("\"isAllocated\":true"));
    }

    #[test]
    fn test_empty_view_is_empty_object() {
        let view = merge_client_view(&LeaseSnapshot::new(), &BindingMap::new());
        assert_eq!(view.to_json(), "{}");
    }

    #[test]
    fn test_count_range() {
        assert_eq!(count_range("10.0.0.10-10.0.0.19").unwrap(), 10);
        assert_eq!(count_range("10.0.0.10-10.0.0.19,10.0.0.30").unwrap(), 11);
        assert_eq!(count_range("10.0.0.250-10.0.1.4").unwrap(), 11);
    }

    #[test]
    fn test_parse_ip_ranges_rejects_bad_input() {
        assert!(parse_ip_ranges("10.0.0.20-10.0.0.10").is_err());
        assert!(parse_ip_ranges("10.0.0.x").is_err());
        assert!(parse_ip_ranges("").is_err());
    }

    #[test]
    fn test_available_invariant_for_overlap_mixes() {
        let range = "10.0.0.1-10.0.0.20";
        let cases = [
            ("", vec![]),
            ("1700000000 aa:00:00:00:00:01 10.0.0.1 a *", vec![]),
            ("", vec![binding("10.0.0.2", "bb:00:00:00:00:02", "")]),
            (
                "1700000000 aa:00:00:00:00:01 10.0.0.1 a *\n1700000000 aa:00:00:00:00:03 10.0.0.3 c *",
                vec![
                    binding("10.0.0.1", "aa:00:00:00:00:01", ""),
                    binding("10.0.0.2", "bb:00:00:00:00:02", ""),
                ],
            ),
        ];

        for (lease_content, items) in cases {
            let leases = leases(lease_content);
            let bindings = bindings(&items);
            let view = merge_client_view(&leases, &bindings);
            let report = StatusReport::build(range, &leases, &bindings, "node-a");
            assert_eq!(
                report.dhcp_status.dhcp_ip_available_amount,
                20 - view.clients.len() as u64
            );
            assert_eq!(report.dhcp_status.dhcp_ip_active_amount, leases.len() as u64);
            assert_eq!(report.dhcp_status.dhcp_ip_bind_amount, bindings.len() as u64);
        }
    }

    #[test]
    fn test_available_saturates() {
        let leases = leases(
            "1700000000 aa:00:00:00:00:01 10.0.0.1 a *\n1700000000 aa:00:00:00:00:02 10.0.0.2 b *",
        );
        let report = StatusReport::build("10.0.0.1", &leases, &BindingMap::new(), "node-a");
        assert_eq!(report.dhcp_status.dhcp_ip_available_amount, 0);
    }

    #[test]
    fn test_merge_status_records_host_change_once() {
        let report = StatusReport::build("10.0.0.1-10.0.0.10", &LeaseSnapshot::new(), &BindingMap::new(), "node-a");

        let first = merge_subnet_status(&SubnetStatus::default(), &report).unwrap();
        assert_eq!(first.host_node.as_deref(), Some("node-a"));
        assert_eq!(first.conditions.len(), 1);
        assert_eq!(first.conditions[0].r#type, CONDITION_TYPE_DHCP_SERVER);
        assert_eq!(first.conditions[0].reason.as_deref(), Some(REASON_HOST_CHANGE));

        assert!(merge_subnet_status(&first, &report).is_none());

        let moved = StatusReport {
            node_name: "node-b".to_string(),
            ..report
        };
        let second = merge_subnet_status(&first, &moved).unwrap();
        assert_eq!(second.conditions.len(), 2);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/net1-bindings.conf");

        write_atomic(&path, "first\n").await.unwrap();
        write_atomic(&path, "second\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!dir.path().join("config/net1-bindings.conf.tmp").exists());
    }

    #[tokio::test]
    async fn test_ensure_file_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.conf");
        ensure_file(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        std::fs::write(&path, "dhcp-host=a,b\n").unwrap();
        ensure_file(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dhcp-host=a,b\n");
    }
}
