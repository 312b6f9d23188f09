// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for host error types.

#[cfg(test)]
mod tests {
    use crate::host_errors::{from_http_status, HostError, SyncError};
    use crate::store::StoreError;
    use reqwest::StatusCode;

    #[test]
    fn test_connect_is_transient() {
        let error = HostError::Connect {
            address: "10.0.0.10:443".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(error.is_transient());
        assert_eq!(
            error.to_string(),
            "failed to connect to 10.0.0.10:443: connection refused"
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = HostError::Timeout {
            address: "10.0.0.10:22".to_string(),
            timeout_secs: 10,
        };
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "timed out after 10s talking to 10.0.0.10:22");
    }

    #[test]
    fn test_auth_is_permanent() {
        let error = HostError::Auth {
            address: "10.0.0.10:22".to_string(),
            reason: "no valid authentication method".to_string(),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn test_unsupported_message() {
        assert_eq!(
            HostError::Unsupported("power control").to_string(),
            "power control is not supported by this protocol"
        );
    }

    #[test]
    fn test_http_status_classification() {
        let auth = from_http_status("10.0.0.10:443", StatusCode::UNAUTHORIZED, "/redfish/v1/Systems");
        assert!(matches!(auth, HostError::Auth { .. }));
        assert!(auth.to_string().contains("/redfish/v1/Systems returned 401"));

        let other = from_http_status("10.0.0.10:443", StatusCode::NOT_FOUND, "/redfish/v1/Managers");
        assert!(matches!(other, HostError::Protocol { .. }));
    }

    #[test]
    fn test_sync_error_retryable() {
        let conflict = SyncError::from(StoreError::Conflict {
            kind: "RedfishStatus".to_string(),
            name: "10-0-0-10".to_string(),
        });
        assert!(conflict.is_retryable());

        let missing = SyncError::from(StoreError::NotFound {
            kind: "RedfishStatus".to_string(),
            name: "10-0-0-10".to_string(),
        });
        assert!(!missing.is_retryable());
        assert!(!SyncError::NotCached("10-0-0-10".to_string()).is_retryable());
    }
}
