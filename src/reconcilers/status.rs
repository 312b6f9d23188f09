// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers.
//!
//! `Subnet` conditions are a history, not a set: each transition is appended
//! with its own timestamp. The list is trimmed to the most recent
//! [`MAX_CONDITION_HISTORY`] entries.
//!
//! # Example
//!
//! ```rust,no_run
//! use topohub::reconcilers::status::{append_condition, create_condition};
//!
//! let mut conditions = Vec::new();
//! append_condition(
//!     &mut conditions,
//!     create_condition("DhcpServer", "True", "hostChange", "dhcp server is hosted by node worker-1"),
//! );
//! ```

use crate::crd::Condition;
use chrono::Utc;

/// Number of conditions kept on a resource.
pub const MAX_CONDITION_HISTORY: usize = 20;

/// Create a condition stamped with the current time.
///
/// # Example
///
/// ```rust,no_run
/// # use topohub::reconcilers::status::create_condition;
/// let condition = create_condition("DhcpServer", "False", "Failed", "interface eth9 not found");
/// assert_eq!(condition.r#type, "DhcpServer");
/// assert_eq!(condition.status, "False");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Append a condition, dropping the oldest entries beyond [`MAX_CONDITION_HISTORY`].
pub fn append_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.push(condition);
    if conditions.len() > MAX_CONDITION_HISTORY {
        let excess = conditions.len() - MAX_CONDITION_HISTORY;
        conditions.drain(..excess);
    }
}

/// Most recent condition of the given type.
#[must_use]
pub fn latest_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().rev().find(|c| c.r#type == condition_type)
}

/// Whether appending `candidate` would repeat the latest condition of its type.
///
/// Timestamps are ignored.
#[must_use]
pub fn repeats_latest(conditions: &[Condition], candidate: &Condition) -> bool {
    latest_condition(conditions, &candidate.r#type).is_some_and(|c| {
        c.status == candidate.status && c.reason == candidate.reason && c.message == candidate.message
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
