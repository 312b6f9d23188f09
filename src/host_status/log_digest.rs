// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! BMC event log digest.
//!
//! A `RedfishStatus` keeps only counters and the latest normal and warning
//! entries. Each sweep compares the entries the BMC returns against the latest
//! recorded entry; everything newer is announced as a notification event.

use super::LogEntry;
use crate::crd::{LogDigest, LogEntrySummary};

/// Result of folding a fresh log read into a digest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestUpdate {
    pub digest: LogDigest,
    /// Entries newer than the previously recorded latest entry, newest first.
    pub new_entries: Vec<LogEntry>,
}

impl DigestUpdate {
    #[must_use]
    pub fn has_new_entries(&self) -> bool {
        !self.new_entries.is_empty()
    }
}

/// Fold `entries` (newest first) into `previous`.
///
/// When nothing is newer than `previous.latest`, the previous digest is
/// returned unchanged.
#[must_use]
pub fn fold_log(previous: &LogDigest, entries: &[LogEntry]) -> DigestUpdate {
    let last_seen = previous.latest.as_ref().map(|l| l.time.as_str());

    let new_entries: Vec<LogEntry> = entries
        .iter()
        .take_while(|e| Some(e.created.as_str()) != last_seen)
        .cloned()
        .collect();

    if new_entries.is_empty() {
        return DigestUpdate {
            digest: previous.clone(),
            new_entries,
        };
    }

    let warnings: Vec<&LogEntry> = entries.iter().filter(|e| e.is_warning()).collect();
    let digest = LogDigest {
        total: saturating_i32(entries.len()),
        warnings: saturating_i32(warnings.len()),
        latest: new_entries.first().map(summarize),
        latest_warning: warnings.first().map(|e| summarize(e)),
    };

    DigestUpdate {
        digest,
        new_entries,
    }
}

fn summarize(entry: &LogEntry) -> LogEntrySummary {
    LogEntrySummary {
        time: entry.created.clone(),
        message: entry.summary(),
    }
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
#[path = "log_digest_tests.rs"]
mod log_digest_tests;
