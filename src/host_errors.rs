// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Errors raised while talking to a host's management interface.
//!
//! An unreachable or unauthenticated host is not a pipeline error: the
//! synchronizer records it as unhealthy and moves on.

use crate::store::StoreError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum HostError {
    /// TCP connect or TLS handshake failed
    #[error("failed to connect to {address}: {reason}")]
    Connect {
        /// `host:port`
        address: String,
        /// Transport error
        reason: String,
    },

    /// Dial or authentication exceeded its bound
    #[error("timed out after {timeout_secs}s talking to {address}")]
    Timeout {
        /// `host:port`
        address: String,
        /// Bound in seconds
        timeout_secs: u64,
    },

    /// Credentials rejected or missing
    #[error("authentication to {address} failed: {reason}")]
    Auth {
        /// `host:port`
        address: String,
        /// Rejection detail
        reason: String,
    },

    /// Unexpected response from the host
    #[error("protocol error from {address}: {reason}")]
    Protocol {
        /// `host:port`
        address: String,
        /// What was unexpected
        reason: String,
    },

    /// Remote command exited non-zero
    #[error("command '{command}' on {address} exited with {status}")]
    Command {
        /// `host:port`
        address: String,
        /// Command line
        command: String,
        /// Exit status
        status: u32,
    },

    /// The protocol does not implement this capability
    #[error("{0} is not supported by this protocol")]
    Unsupported(&'static str),
}

impl HostError {
    /// Returns true for failures that may clear up on their own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// Classify a non-success HTTP status from a BMC.
#[must_use]
pub fn from_http_status(address: &str, status: StatusCode, path: &str) -> HostError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HostError::Auth {
            address: address.to_string(),
            reason: format!("{path} returned {status}"),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => HostError::Timeout {
            address: address.to_string(),
            timeout_secs: 0,
        },
        _ => HostError::Protocol {
            address: address.to_string(),
            reason: format!("{path} returned {status}"),
        },
    }
}

/// Errors from the host status synchronizer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The connection cache has no entry for the host
    #[error("no cached connection for host '{0}'")]
    NotCached(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl SyncError {
    /// Conflicts, timeouts, and rate limits from the store are retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
