//! Exponential backoff retry for upstream calls.
//!
//! This module provides:
//! - [`RetryPolicy`]: attempt limits, delay schedule and the allow-list of retryable failures.
//! - [`compute_backoff`]: the pure delay schedule of a policy.
//! - [`with_retry`]: runs an async operation under a policy.
//!
//! Retrying never rewrites the error: once attempts are exhausted, or a failure
//! falls outside the allow-list, the caller sees the operation's own final error.

use crate::config::RetryConfig;
use crate::utils::error::{FaultKind, IngestError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a retry allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryMatcher {
    /// Matches errors classified as this kind.
    Kind(FaultKind),
    /// Matches every error whose kind is transient.
    Transient,
    /// Matches errors whose rendered message contains this substring.
    ///
    /// Messages embed slots and signatures, so needles should be phrases
    /// (`"node is behind"`), never bare status digits.
    Contains(String),
}

impl RetryMatcher {
    fn matches(&self, err: &IngestError) -> bool {
        match self {
            RetryMatcher::Kind(kind) => err.kind() == *kind,
            RetryMatcher::Transient => err.kind().is_transient(),
            RetryMatcher::Contains(needle) => err.to_string().contains(needle.as_str()),
        }
    }
}

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Failures eligible for retry. Empty means every failure is retried.
    pub retry_on: Vec<RetryMatcher>,
}

impl RetryPolicy {
    /// A policy that retries every failure.
    #[must_use]
    pub fn any_error(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
            retry_on: Vec::new(),
        }
    }

    /// A policy restricted to rate limits, timeouts, 5xx and dropped connections.
    ///
    /// Oversized payloads are excluded; callers split those requests instead.
    #[must_use]
    pub fn transient(cfg: &RetryConfig) -> Self {
        Self {
            retry_on: vec![RetryMatcher::Transient],
            ..Self::any_error(cfg)
        }
    }

    /// Whether `err` is on this policy's allow-list.
    #[must_use]
    pub fn should_retry(&self, err: &IngestError) -> bool {
        if err.kind() == FaultKind::PayloadTooLarge && !self.retry_on.is_empty() {
            return false;
        }
        self.retry_on.is_empty() || self.retry_on.iter().any(|m| m.matches(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Computes the delay to wait after the `attempt`-th failed call (1-indexed).
///
/// `delay = initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
#[must_use]
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let base = policy.initial_delay.as_millis() as f64 * policy.backoff_factor.powi(exp);
    let capped = base.min(policy.max_delay.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry loop
// ─────────────────────────────────────────────────────────────────────────────

/// Calls `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// Logs one warning per retry. No wait happens after the final attempt.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !policy.should_retry(&err) {
                    return Err(err);
                }

                let delay = compute_backoff(policy, attempt);
                tracing::warn!(
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Upstream call failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn cfg(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }

    // ── backoff ───────────────────────────────────────────────────────────────

    #[test]
    fn test_compute_backoff_schedule() {
        let policy = RetryPolicy::any_error(&cfg(5));
        let delays: Vec<u128> = (1..=4)
            .map(|a| compute_backoff(&policy, a).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_compute_backoff_capped() {
        let policy = RetryPolicy::any_error(&RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            backoff_factor: 10.0,
        });
        assert_eq!(compute_backoff(&policy, 4).as_millis(), 500);
    }

    // ── allow-list ────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_allow_list_retries_everything() {
        let policy = RetryPolicy::any_error(&cfg(3));
        assert!(policy.should_retry(&IngestError::DecodingError("bad".into())));
        assert!(policy.should_retry(&IngestError::RpcError("boom".into())));
    }

    #[test]
    fn test_transient_policy_rejects_permanent_errors() {
        let policy = RetryPolicy::transient(&cfg(3));
        assert!(policy.should_retry(&IngestError::HttpStatus {
            status: 503,
            context: "Service Unavailable".into(),
        }));
        assert!(policy.should_retry(&IngestError::ConnectionError("reset".into())));
        assert!(policy.should_retry(&IngestError::Timeout("getTransaction".into())));
        assert!(!policy.should_retry(&IngestError::DecodingError("bad".into())));
        assert!(!policy.should_retry(&IngestError::PayloadTooLarge("HTTP 413".into())));
    }

    #[test]
    fn test_transient_policy_ignores_digits_in_messages() {
        let policy = RetryPolicy::transient(&cfg(3));
        let permanent = IngestError::JsonRpc {
            code: -32602,
            message: "invalid param: signature 4295003 at slot 250042900".into(),
        };
        assert!(!policy.should_retry(&permanent));
        assert!(!policy.should_retry(&IngestError::RpcError("slot 504429 not found".into())));
    }

    #[test]
    fn test_substring_matcher() {
        let policy = RetryPolicy {
            retry_on: vec![RetryMatcher::Contains("node is behind".into())],
            ..RetryPolicy::any_error(&cfg(3))
        };
        assert!(policy.should_retry(&IngestError::RpcError("node is behind by 40 slots".into())));
        assert!(!policy.should_retry(&IngestError::RpcError("upstream returned 503 bytes".into())));
    }

    // ── retry loop ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timing_and_final_error() {
        let policy = RetryPolicy::any_error(&cfg(5));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let result: Result<()> = with_retry(&policy, || {
            let stamps = stamps.clone();
            async move {
                let mut stamps = stamps.lock().unwrap();
                stamps.push(Instant::now());
                Err(IngestError::RpcError(format!("attempt {}", stamps.len())))
            }
        })
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 5);
        let gaps: Vec<u128> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000, 8000]);

        match result {
            Err(IngestError::RpcError(msg)) => assert_eq!(msg, "attempt 5"),
            other => panic!("expected final RPC error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::transient(&cfg(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(IngestError::HttpStatus {
                        status: 429,
                        context: "Too Many Requests".into(),
                    })
                } else {
                    Ok(7u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::transient(&cfg(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = with_retry(&policy, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(IngestError::PayloadTooLarge("HTTP 413".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(IngestError::PayloadTooLarge(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
