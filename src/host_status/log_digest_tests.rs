// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `log_digest.rs`

#[cfg(test)]
mod tests {
    use super::super::fold_log;
    use crate::crd::{LogDigest, LogEntrySummary};
    use crate::host_status::LogEntry;

    fn entry(created: &str, severity: &str, message: &str) -> LogEntry {
        LogEntry {
            created: created.to_string(),
            severity: severity.to_string(),
            sensor_type: "Temperature".to_string(),
            message: message.to_string(),
        }
    }

    fn log() -> Vec<LogEntry> {
        vec![
            entry("2025-03-01T10:02:00Z", "OK", "fan normal"),
            entry("2025-03-01T10:01:00Z", "Warning", "inlet hot"),
            entry("2025-03-01T10:00:00Z", "OK", "boot"),
        ]
    }

    #[test]
    fn test_first_read_announces_everything() {
        let update = fold_log(&LogDigest::default(), &log());

        assert_eq!(update.new_entries.len(), 3);
        assert_eq!(update.digest.total, 3);
        assert_eq!(update.digest.warnings, 1);
        assert_eq!(
            update.digest.latest,
            Some(LogEntrySummary {
                time: "2025-03-01T10:02:00Z".to_string(),
                message: "[2025-03-01T10:02:00Z][OK]: Temperature fan normal".to_string(),
            })
        );
        assert_eq!(
            update.digest.latest_warning.unwrap().time,
            "2025-03-01T10:01:00Z"
        );
    }

    #[test]
    fn test_only_newer_entries_are_announced() {
        let first = fold_log(&LogDigest::default(), &log());

        let mut entries = log();
        entries.insert(0, entry("2025-03-01T10:03:00Z", "Critical", "psu lost"));
        let second = fold_log(&first.digest, &entries);

        assert_eq!(second.new_entries.len(), 1);
        assert_eq!(second.new_entries[0].message, "psu lost");
        assert_eq!(second.digest.total, 4);
        assert_eq!(second.digest.warnings, 2);
        assert_eq!(
            second.digest.latest_warning.unwrap().time,
            "2025-03-01T10:03:00Z"
        );
    }

    #[test]
    fn test_no_new_entries_keeps_digest() {
        let first = fold_log(&LogDigest::default(), &log());
        let second = fold_log(&first.digest, &log());

        assert!(!second.has_new_entries());
        assert_eq!(second.digest, first.digest);
    }

    #[test]
    fn test_empty_log() {
        let update = fold_log(&LogDigest::default(), &[]);
        assert!(!update.has_new_entries());
        assert_eq!(update.digest, LogDigest::default());
    }

    #[test]
    fn test_empty_severity_is_not_warning() {
        assert!(!entry("t", "", "m").is_warning());
        assert!(!entry("t", "OK", "m").is_warning());
        assert!(entry("t", "Critical", "m").is_warning());
    }
}
