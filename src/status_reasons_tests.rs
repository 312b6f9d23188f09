// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_condition_type_constant() {
        assert_eq!(CONDITION_TYPE_DHCP_SERVER, "DhcpServer");
    }

    #[test]
    fn test_subnet_reasons() {
        assert_eq!(REASON_HOST_CHANGE, "hostChange");
        assert_eq!(REASON_FAILED, "Failed");
    }

    #[test]
    fn test_operation_states_are_distinct() {
        let states = [OPERATION_PENDING, OPERATION_SUCCESS, OPERATION_FAILED];
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_event_types() {
        assert_eq!(EVENT_TYPE_NORMAL, "Normal");
        assert_eq!(EVENT_TYPE_WARNING, "Warning");
    }

    #[test]
    fn test_host_change_message() {
        assert_eq!(
            host_change_message("worker-1"),
            "dhcp server is hosted by node worker-1"
        );
    }
}
