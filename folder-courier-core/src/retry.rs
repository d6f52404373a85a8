//! Retry engine for transport calls.
//!
//! Wraps a zero-argument call and classifies each failure through
//! [`TransportError::class`]:
//! - rate limited: wait the server-specified delay plus padding, retry without
//!   spending retry budget (uncapped unless [`RetryPolicy::max_rate_limit_waits`] is set);
//! - transient: exponential backoff until [`RetryPolicy::max_retries`] invocations failed;
//! - anything else: returned at once.
//!
//! Every wait observes the run's [`CancelSignal`]. A call that is already in flight is
//! always awaited to completion.

use std::future::Future;

use tracing::{debug, error, warn};

use crate::cancel::CancelSignal;
use crate::config::RetryPolicy;
use crate::contract::{FailureClass, TransportError};

/// Per-call bookkeeping, discarded when the call ends.
#[derive(Debug, Default)]
struct RetryContext {
    /// Transient failures so far.
    attempt: u32,
    rate_limit_waits: u32,
    last_error: Option<TransportError>,
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    label: &str,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut ctx = RetryContext::default();
    let max_retries = policy.max_retries.max(1);

    loop {
        let err = match call().await {
            Ok(value) => {
                if ctx.attempt > 0 || ctx.rate_limit_waits > 0 {
                    debug!(
                        call = label,
                        attempts = ctx.attempt + 1,
                        rate_limit_waits = ctx.rate_limit_waits,
                        "[RETRY] Call succeeded after retrying"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let wait = match err.class() {
            FailureClass::RateLimited(retry_after) => {
                if let Some(cap) = policy.max_rate_limit_waits {
                    if ctx.rate_limit_waits >= cap {
                        error!(
                            call = label,
                            waits = ctx.rate_limit_waits,
                            "[RETRY] Rate-limit wait cap reached"
                        );
                        return Err(err);
                    }
                }
                ctx.rate_limit_waits += 1;
                let wait = policy.rate_limit_wait(retry_after);
                warn!(
                    call = label,
                    wait_secs = wait.as_secs_f64(),
                    "[RETRY] Rate limited. Waiting {:.0}s...",
                    wait.as_secs_f64()
                );
                wait
            }
            FailureClass::Transient => {
                ctx.attempt += 1;
                if ctx.attempt >= max_retries {
                    error!(
                        call = label,
                        attempts = ctx.attempt,
                        error = %err,
                        "[RETRY] Giving up after transient failures"
                    );
                    return Err(err);
                }
                let wait = policy.backoff(ctx.attempt);
                warn!(
                    call = label,
                    attempt = ctx.attempt,
                    max_retries,
                    error = %err,
                    "[RETRY] Network error (attempt {}/{}). Retrying in {:.0}s...",
                    ctx.attempt,
                    max_retries,
                    wait.as_secs_f64()
                );
                wait
            }
            FailureClass::Fatal => {
                error!(call = label, error = %err, "[RETRY] Non-retryable error");
                return Err(err);
            }
        };
        ctx.last_error = Some(err);

        if !cancel.sleep(wait).await {
            warn!(
                call = label,
                last_error = ?ctx.last_error,
                "[RETRY] Cancelled while waiting to retry"
            );
            return Err(TransportError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use std::cell::Cell;
    use std::time::Duration;
    use tokio::time::Instant;

    fn transient() -> TransportError {
        TransportError::Transient("timed out".into())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_transient_failures() {
        for k in 0..3u32 {
            let policy = RetryPolicy::default();
            let calls = Cell::new(0u32);
            let start = Instant::now();
            let result = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
                let n = calls.get();
                calls.set(n + 1);
                async move {
                    if n < k {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

            if k < policy.max_retries {
                assert_eq!(result, Ok(k));
                assert_eq!(calls.get(), k + 1);
                let expected: u64 = (0..k).map(|i| 2u64 * 2u64.pow(i)).sum();
                let elapsed = start.elapsed();
                assert!(elapsed >= Duration::from_secs(expected));
                assert!(elapsed < Duration::from_secs(expected) + Duration::from_millis(100));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_invokes_max_retries_times() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
            calls.set(calls.get() + 1);
            async { Err(TransportError::Transient("attempt failed".into())) }
        })
        .await;
        assert_eq!(calls.get(), policy.max_retries);
        assert_eq!(result, Err(TransportError::Transient("attempt failed".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_padding_and_keeps_budget() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let start = Instant::now();
        // One rate limit, then two transient failures, then success: the rate limit must
        // not eat into the three-invocation transient budget.
        let result = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
            let n = calls.get();
            calls.set(n + 1);
            async move {
                match n {
                    0 => Err(TransportError::RateLimited { retry_after_secs: 5 }),
                    1 | 2 => Err(transient()),
                    _ => Ok("sent"),
                }
            }
        })
        .await;
        assert_eq!(result, Ok("sent"));
        assert_eq!(calls.get(), 4);
        assert!(start.elapsed() >= Duration::from_secs(7 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_sleeps_at_least_seven_seconds() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let start = Instant::now();
        let seen_at = Cell::new(None);
        let _ = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
            let n = calls.get();
            calls.set(n + 1);
            if n == 1 {
                seen_at.set(Some(start.elapsed()));
            }
            async move {
                if n == 0 {
                    Err(TransportError::RateLimited { retry_after_secs: 5 })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(seen_at.get().unwrap() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
            calls.set(calls.get() + 1);
            async { Err(TransportError::PermissionDenied("no rights".into())) }
        })
        .await;
        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(TransportError::PermissionDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_cap_is_honoured_when_set() {
        let policy = RetryPolicy {
            max_rate_limit_waits: Some(2),
            ..RetryPolicy::default()
        };
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_with_backoff(&policy, &CancelSignal::never(), "test", || {
            calls.set(calls.get() + 1);
            async { Err(TransportError::RateLimited { retry_after_secs: 1 }) }
        })
        .await;
        assert_eq!(calls.get(), 3);
        assert_eq!(result, Err(TransportError::RateLimited { retry_after_secs: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let (handle, signal) = cancel_pair();
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_with_backoff(&policy, &signal, "test", || {
            calls.set(calls.get() + 1);
            handle.cancel();
            async { Err(transient()) }
        })
        .await;
        assert_eq!(calls.get(), 1);
        assert_eq!(result, Err(TransportError::Cancelled));
    }
}
