// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `lease.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        diff_leases, parse_leases, read_lease_file, LeaseContext, LeaseEventKind, LeaseSnapshot,
    };
    use std::collections::BTreeSet;

    fn ctx() -> LeaseContext {
        LeaseContext {
            subnet_cidr: "10.0.0.0/24".to_string(),
            subnet_name: "net1".to_string(),
            cluster_name: "rack-a".to_string(),
            enable_bind_ip: true,
            sync_enabled: true,
        }
    }

    fn snapshot(content: &str) -> LeaseSnapshot {
        parse_leases(content, &ctx())
    }

    #[test]
    fn test_parse_single_lease() {
        let leases = snapshot("1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *\n");
        let client = &leases["10.0.0.10"];
        assert_eq!(client.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(client.hostname, "host1");
        assert_eq!(client.expire_time.unwrap().timestamp(), 1_700_000_000);
        assert!(client.active);
        assert_eq!(client.subnet, "10.0.0.0/24");
        assert_eq!(client.subnet_name, "net1");
        assert_eq!(client.cluster_name, "rack-a");
        assert!(client.enable_bind_ip);
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let leases = snapshot(
            "garbage\n\
             notanumber aa:bb:cc:dd:ee:01 10.0.0.11 host *\n\
             1700000000 aa:bb:cc:dd:ee:02 10.0.0.12\n\
             \n\
             1700000000 aa:bb:cc:dd:ee:03 10.0.0.13 host3 01:aa:bb:cc:dd:ee:03\n",
        );
        assert_eq!(leases.len(), 1);
        assert!(leases.contains_key("10.0.0.13"));
    }

    #[test]
    fn test_parse_anonymous_and_infinite() {
        let leases = snapshot("0 AA:BB:CC:DD:EE:FF 10.0.0.10 * *\n");
        let client = &leases["10.0.0.10"];
        assert_eq!(client.hostname, "");
        assert_eq!(client.mac, "aa:bb:cc:dd:ee:ff");
        assert!(client.expire_time.is_none());
        assert_eq!(client.expire_time_rfc3339(), "");
    }

    #[test]
    fn test_diff_appeared() {
        let diff = diff_leases(
            &LeaseSnapshot::new(),
            &snapshot("1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *"),
        );
        assert!(diff.changed);
        assert_eq!(diff.events.len(), 1);
        assert_eq!(diff.events[0].kind, LeaseEventKind::Appeared);
        assert_eq!(diff.events[0].client.ip, "10.0.0.10");
    }

    #[test]
    fn test_diff_mac_change() {
        let before = snapshot("1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *");
        let after = snapshot("1700000000 11:22:33:44:55:66 10.0.0.10 host1 *");
        let diff = diff_leases(&before, &after);
        assert!(diff.changed);
        assert_eq!(diff.events.len(), 1);
        assert_eq!(diff.events[0].kind, LeaseEventKind::Changed);
        assert_eq!(diff.events[0].client.mac, "11:22:33:44:55:66");
    }

    #[test]
    fn test_diff_expiry_only_change_does_not_set_flag() {
        let before = snapshot("1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *");
        let after = snapshot("1700003600 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *");
        let diff = diff_leases(&before, &after);
        assert!(!diff.changed);
        assert_eq!(diff.events.len(), 1);
        assert_eq!(diff.events[0].kind, LeaseEventKind::Changed);
    }

    #[test]
    fn test_diff_gone_marks_inactive() {
        let before = snapshot("1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *");
        let diff = diff_leases(&before, &LeaseSnapshot::new());
        assert!(!diff.changed);
        assert_eq!(diff.events.len(), 1);
        assert_eq!(diff.events[0].kind, LeaseEventKind::Gone);
        assert!(!diff.events[0].client.active);
    }

    #[test]
    fn test_diff_identical_is_silent() {
        let content = "1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *";
        let diff = diff_leases(&snapshot(content), &snapshot(content));
        assert!(diff.events.is_empty());
        assert!(!diff.changed);
    }

    #[test]
    fn test_diff_one_event_per_differing_ip() {
        let before = snapshot(
            "1700000000 aa:00:00:00:00:01 10.0.0.1 a *\n\
             1700000000 aa:00:00:00:00:02 10.0.0.2 b *\n\
             1700000000 aa:00:00:00:00:03 10.0.0.3 c *\n\
             1700000000 aa:00:00:00:00:04 10.0.0.4 d *\n",
        );
        let after = snapshot(
            "1700000000 aa:00:00:00:00:01 10.0.0.1 a *\n\
             1700000000 aa:00:00:00:00:99 10.0.0.2 b *\n\
             1700009999 aa:00:00:00:00:03 10.0.0.3 c *\n\
             1700000000 aa:00:00:00:00:05 10.0.0.5 e *\n",
        );

        let diff = diff_leases(&before, &after);
        let non_gone: Vec<_> = diff
            .events
            .iter()
            .filter(|e| e.kind != LeaseEventKind::Gone)
            .map(|e| e.client.ip.as_str())
            .collect();
        let gone: Vec<_> = diff
            .events
            .iter()
            .filter(|e| e.kind == LeaseEventKind::Gone)
            .map(|e| e.client.ip.as_str())
            .collect();

        assert_eq!(non_gone, vec!["10.0.0.2", "10.0.0.3", "10.0.0.5"]);
        assert_eq!(gone, vec!["10.0.0.4"]);
        let unique: BTreeSet<_> = diff.events.iter().map(|e| &e.client.ip).collect();
        assert_eq!(unique.len(), diff.events.len());
    }

    #[tokio::test]
    async fn test_read_missing_lease_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net1.leases");
        assert!(read_lease_file(&path, true).await.unwrap().is_none());
        assert!(read_lease_file(&path, false).await.is_err());
    }

    #[tokio::test]
    async fn test_read_existing_lease_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net1.leases");
        std::fs::write(&path, "1700000000 aa:bb:cc:dd:ee:ff 10.0.0.10 host1 *\n").unwrap();
        let content = read_lease_file(&path, false).await.unwrap().unwrap();
        assert_eq!(snapshot(&content).len(), 1);
    }

    #[tokio::test]
    async fn test_read_skips_non_utf8_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net1.leases");
        let mut content = b"1700000000 aa:bb:cc:dd:ee:01 10.0.0.5 good *\n".to_vec();
        content.extend_from_slice(b"1700000000 aa:bb:cc:dd:ee:02 10.0.0.6 bad\xff\xfe *\n");
        std::fs::write(&path, content).unwrap();

        let content = read_lease_file(&path, false).await.unwrap().unwrap();
        let leases = snapshot(&content);
        assert_eq!(leases.len(), 1);
        assert_eq!(leases["10.0.0.5"].hostname, "good");
    }
}
