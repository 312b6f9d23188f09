// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for DHCP error types.

#[cfg(test)]
mod tests {
    use crate::dhcp_errors::*;
    use std::path::PathBuf;

    #[test]
    fn test_name_too_long_message() {
        let error = InterfaceError::NameTooLong {
            name: "enp129s0f1np1.4000".to_string(),
            max: 15,
        };
        assert_eq!(
            error.to_string(),
            "interface name 'enp129s0f1np1.4000' exceeds 15 characters"
        );
    }

    #[test]
    fn test_address_conflict_message() {
        let error = InterfaceError::AddressConflict {
            address: "10.0.0.2/24".to_string(),
            existing: "10.0.0.1/24".to_string(),
            link: "eth0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "address 10.0.0.2/24 conflicts with 10.0.0.1/24 on interface 'eth0'"
        );
    }

    #[test]
    fn test_interface_error_converts_transparently() {
        let error: DhcpError = InterfaceError::NotFound {
            name: "eth9".to_string(),
        }
        .into();
        assert_eq!(error.to_string(), "interface 'eth9' not found");
        assert_eq!(error.status_reason(), "InterfaceSetupFailed");
    }

    #[test]
    fn test_status_reasons() {
        let template = DhcpError::Template {
            path: PathBuf::from("/etc/dnsmasq.conf.j2"),
            reason: "syntax error".to_string(),
        };
        assert_eq!(template.status_reason(), "ConfigRenderFailed");

        let process = DhcpError::Process {
            subnet: "net1".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(process.status_reason(), "ProcessFailed");
        assert_eq!(
            process.to_string(),
            "dhcp daemon for subnet 'net1': No such file or directory"
        );

        let io = DhcpError::io(
            "/var/lib/topohub",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(io.status_reason(), "StorageFailed");
    }
}
