// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry helpers for control-plane writes.
//!
//! Two policies are provided:
//!
//! - [`default_backoff`] for Kubernetes API calls that hit rate limits or server
//!   errors (429, 5xx, connection failures), bounded by elapsed time.
//! - [`conflict_backoff`] for status writes that lose an optimistic-concurrency
//!   race (409), bounded by attempt count.

use crate::store::StoreError;
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maximum total time to spend retrying (5 minutes)
const MAX_ELAPSED_TIME_SECS: u64 = 300;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// First wait after a status conflict
const CONFLICT_INITIAL_INTERVAL_SECS: u64 = 1;

/// Attempts made for a conflicting status write
const CONFLICT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff with optional jitter, bounded by elapsed time and/or attempts.
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Interval returned by the next call
    pub current_interval: Duration,
    /// Interval of the first retry
    pub initial_interval: Duration,
    /// Upper bound of a single interval
    pub max_interval: Duration,
    /// Upper bound of total time spent
    pub max_elapsed_time: Option<Duration>,
    /// Upper bound of intervals handed out
    pub max_attempts: Option<u32>,
    /// Growth factor between intervals
    pub multiplier: f64,
    /// Jitter as a fraction of the interval (0.1 = ±10%)
    pub randomization_factor: f64,
    attempts: u32,
    start_time: Instant,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        max_attempts: Option<u32>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            max_attempts,
            multiplier,
            randomization_factor,
            attempts: 0,
            start_time: Instant::now(),
        }
    }

    /// Next wait, or `None` once a bound is reached.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }
        if let Some(max_attempts) = self.max_attempts {
            if self.attempts >= max_attempts {
                return None;
            }
        }
        self.attempts += 1;

        let interval = self.current_interval;
        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(self.apply_jitter(interval))
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        // Uniform in [secs - delta, secs + delta]
        let jittered = secs - delta + rand::random::<f64>() * 2.0 * delta;

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff for transient Kubernetes API failures.
///
/// 100ms doubling to a 30s cap, ±10% jitter, for at most 5 minutes.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        None,
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Backoff for status writes rejected with a conflict.
///
/// Waits 1s, 2s, 4s, 8s, 16s, then gives up.
#[must_use]
pub fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_secs(CONFLICT_INITIAL_INTERVAL_SECS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        None,
        Some(CONFLICT_MAX_ATTEMPTS),
        BACKOFF_MULTIPLIER,
        0.0,
    )
}

/// Retry a Kubernetes API call on 429, 5xx, and connection errors.
///
/// # Errors
///
/// Returns the first non-retryable error, or an error once the backoff is exhausted.
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !is_retryable_error(&e) => {
                error!(operation = operation_name, error = %e, "Non-retryable Kubernetes API error");
                return Err(e.into());
            }
            Err(e) => match backoff.next_backoff() {
                Some(duration) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                }
                None => {
                    error!(operation = operation_name, attempt = attempt, error = %e, "Backoff exhausted, giving up");
                    return Err(anyhow::anyhow!(
                        "Backoff exhausted after {attempt} attempts: {e}"
                    ));
                }
            },
        }
    }
}

/// Retry a store write while it fails with [`StoreError::Conflict`].
///
/// Any other error is returned immediately.
///
/// # Errors
///
/// Returns the last error once [`conflict_backoff`] is exhausted.
pub async fn retry_on_conflict<T, F, Fut>(
    backoff: &mut ExponentialBackoff,
    mut operation: F,
    operation_name: &str,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    loop {
        match operation().await {
            Err(e @ StoreError::Conflict { .. }) => match backoff.next_backoff() {
                Some(duration) => {
                    warn!(operation = operation_name, retry_after = ?duration, "Conflict writing status, will retry");
                    tokio::time::sleep(duration).await;
                }
                None => {
                    error!(operation = operation_name, error = %e, "Abandoning status write after repeated conflicts");
                    return Err(e);
                }
            },
            other => return other,
        }
    }
}

/// Whether a Kubernetes error is transient (429, 5xx, or a transport failure).
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
