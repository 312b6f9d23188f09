// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config_render.rs`

#[cfg(test)]
mod tests {
    use super::super::{render_template, write_daemon_config, SubnetPaths, TemplateData};
    use crate::config::test_agent_config;
    use crate::crd::{InterfaceConfig, Ipv4SubnetConfig, SubnetFeature, SubnetSpec};
    use crate::dhcp_errors::DhcpError;
    use std::path::Path;

    const SHIPPED_TEMPLATE: &str = include_str!("../../deploy/dnsmasq.conf.j2");

    fn spec() -> SubnetSpec {
        SubnetSpec {
            ipv4_subnet: Ipv4SubnetConfig {
                subnet: "10.0.0.0/24".to_string(),
                ip_range: "10.0.0.10-10.0.0.20,10.0.0.30".to_string(),
                gateway: Some("10.0.0.1".to_string()),
                dns: None,
            },
            interface: InterfaceConfig {
                interface: "eth1".to_string(),
                vlan_id: Some(100),
                ipv4: "10.0.0.2/24".to_string(),
            },
            feature: Some(SubnetFeature {
                enable_pxe: true,
                ..Default::default()
            }),
        }
    }

    fn data(storage: &Path) -> TemplateData {
        let config = test_agent_config(storage, &storage.join("t.j2"));
        let paths = SubnetPaths::new(&config, "net1");
        TemplateData::build("net1", &spec(), &paths, &config).unwrap()
    }

    #[test]
    fn test_paths_are_per_subnet() {
        let config = test_agent_config(Path::new("/var/lib/topohub"), Path::new("/t.j2"));
        let paths = SubnetPaths::new(&config, "net1");
        assert_eq!(paths.lease, Path::new("/var/lib/topohub/dhcp/lease/net1.leases"));
        assert_eq!(paths.config, Path::new("/var/lib/topohub/dhcp/config/net1.conf"));
        assert_eq!(
            paths.bindings,
            Path::new("/var/lib/topohub/dhcp/config/net1-bindings.conf")
        );
    }

    #[test]
    fn test_template_data() {
        let data = data(Path::new("/var/lib/topohub"));
        assert_eq!(data.interface, "eth1.100");
        assert_eq!(data.ip_ranges, vec!["10.0.0.10,10.0.0.20", "10.0.0.30,10.0.0.30"]);
        assert_eq!(data.self_ip, "10.0.0.2");
        assert!(data.enable_pxe);
        assert!(!data.enable_ztp);
        assert_eq!(data.pxe_efi_in_tftp_server_dir, "/var/lib/topohub/tftp/boot/grub/x86_64-efi");
    }

    #[test]
    fn test_template_data_rejects_bad_range() {
        let config = test_agent_config(Path::new("/s"), Path::new("/t.j2"));
        let paths = SubnetPaths::new(&config, "net1");
        let mut spec = spec();
        spec.ipv4_subnet.ip_range = "10.0.0.20-10.0.0.10".to_string();
        let err = TemplateData::build("net1", &spec, &paths, &config).unwrap_err();
        assert!(matches!(err, DhcpError::InvalidRange { .. }));
    }

    #[test]
    fn test_render_shipped_template() {
        let rendered =
            render_template(Path::new("dnsmasq.conf.j2"), SHIPPED_TEMPLATE, &data(Path::new("/s")))
                .unwrap();

        assert!(rendered.contains("interface=eth1.100"));
        assert!(rendered.contains("dhcp-range=10.0.0.10,10.0.0.20,12h"));
        assert!(rendered.contains("dhcp-range=10.0.0.30,10.0.0.30,12h"));
        assert!(rendered.contains("dhcp-option=option:router,10.0.0.1"));
        assert!(!rendered.contains("dns-server"));
        assert!(rendered.contains("enable-tftp"));
        assert!(rendered.contains("dhcp-hostsfile=/s/dhcp/config/net1-bindings.conf"));
        assert!(rendered.contains("dhcp-leasefile=/s/dhcp/lease/net1.leases"));
    }

    #[test]
    fn test_render_syntax_error() {
        let err = render_template(Path::new("bad.j2"), "{% if %}", &data(Path::new("/s")))
            .unwrap_err();
        assert!(matches!(err, DhcpError::Template { .. }));
    }

    #[tokio::test]
    async fn test_write_daemon_config() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.j2");
        std::fs::write(&template, "interface={{ interface }}\n").unwrap();
        let out = dir.path().join("dhcp/config/net1.conf");

        write_daemon_config(&template, &data(dir.path()), &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "interface=eth1.100");
    }

    #[tokio::test]
    async fn test_write_daemon_config_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_daemon_config(
            &dir.path().join("missing.j2"),
            &data(dir.path()),
            &dir.path().join("out.conf"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DhcpError::Template { .. }));
    }
}
