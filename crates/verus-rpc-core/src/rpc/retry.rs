//! Retry budget, exponential backoff, and the per-call attempt loop.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::RpcClientOptions;
use crate::error::{CoreError, ErrorKind, RpcError};

/// Lifecycle of one call. Only used for trace logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallState {
    Sending,
    AwaitingResponse,
    Succeeded,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: usize,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_options(options: &RpcClientOptions) -> Self {
        Self {
            max_attempts: options.max_attempts,
            initial_backoff: options.initial_backoff,
            max_backoff: options.max_backoff,
        }
    }

    /// A single attempt and no backoff.
    pub(crate) fn once(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.initial_backoff.min(self.max_backoff);
        }

        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }
}

/// Drive `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out. The closure receives the 1-based attempt
/// number and must issue a fresh request (with a fresh id) each time.
///
/// Cancellation is checked before every attempt and raced against both the
/// in-flight attempt and the backoff sleep. Once it fires no further attempt
/// is started.
pub(crate) async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    cancel: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T, CoreError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!(rpc.method = label, attempts = attempt, "rpc call cancelled");
            return Err(CoreError::Cancelled { attempts: attempt });
        }

        attempt += 1;
        trace!(rpc.method = label, attempt, state = ?CallState::Sending, "rpc call state");

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(rpc.method = label, attempt, "rpc call abandoned while awaiting response");
                    return Err(CoreError::Cancelled { attempts: attempt });
                }
                outcome = operation(attempt) => outcome,
            },
            None => operation(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                trace!(rpc.method = label, attempt, state = ?CallState::Succeeded, "rpc call state");
                if attempt > 1 {
                    debug!(rpc.method = label, attempt, "rpc call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        trace!(
            rpc.method = label,
            attempt,
            state = ?CallState::Failed(err.kind()),
            "rpc call state"
        );

        if !err.is_retryable() {
            debug!(rpc.method = label, attempt, error = %err, kind = %err.kind(), "rpc call failed");
            return Err(err.into());
        }

        if attempt >= policy.max_attempts {
            if policy.max_attempts > 1 {
                warn!(rpc.method = label, attempt, error = %err, "rpc call exhausted retries");
            } else {
                debug!(rpc.method = label, error = %err, "rpc call failed; retry disabled");
            }
            return Err(err.into());
        }

        let backoff = policy.backoff_delay(attempt);
        warn!(
            rpc.method = label,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            kind = %err.kind(),
            "rpc call failed; retrying"
        );

        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(rpc.method = label, attempts = attempt, "rpc call cancelled during backoff");
                    return Err(CoreError::Cancelled { attempts: attempt });
                }
                _ = sleep(backoff) => {}
            },
            None => sleep(backoff).await,
        }
    }
}

/// Marks the `AwaitingResponse` transition once a request is on the wire.
pub(crate) fn trace_awaiting(label: &str, id: u64) {
    trace!(rpc.method = label, rpc.id = id, state = ?CallState::AwaitingResponse, "rpc call state");
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(64), Duration::from_millis(1_000));
    }

    #[test]
    fn once_keeps_backoff_but_drops_attempts() {
        let single = policy(5).once();
        assert_eq!(single.max_attempts, 1);
        assert_eq!(single.initial_backoff, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_within_budget() {
        let calls = AtomicUsize::new(0);
        let value = run_with_retry(policy(5), "getinfo", None, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt <= 3 {
                    Err(RpcError::transport("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("must succeed on fourth attempt");
        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let err = run_with_retry(policy(3), "getinfo", None, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err::<(), _>(RpcError::transport("refused"))
                } else {
                    Err(RpcError::Timeout {
                        after: Duration::from_secs(1),
                    })
                }
            }
        })
        .await
        .expect_err("budget exhausted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, CoreError::Rpc(RpcError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_stop_after_one_attempt() {
        let calls = AtomicUsize::new(0);
        let err = run_with_retry(policy(5), "sendrawtransaction", None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(RpcError::Remote {
                    code: -25,
                    message: "Missing inputs".into(),
                })
            }
        })
        .await
        .expect_err("remote error");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.as_rpc().and_then(RpcError::code), Some(-25));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_respected() {
        let start = tokio::time::Instant::now();
        let _ = run_with_retry(policy(4), "getinfo", None, |_| async {
            Err::<(), _>(RpcError::transport("down"))
        })
        .await;
        // 100 + 200 + 400 between four attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_further_attempts() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let token = token.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                run_with_retry(policy(10), "getinfo", Some(&token), |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(RpcError::transport("down")) }
                })
                .await
            })
        };

        // First attempt fails immediately, then the loop sleeps 100ms.
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = task.await.expect("task must join").expect_err("cancelled");
        assert!(matches!(err, CoreError::Cancelled { attempts: 1 }));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_token_sends_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicUsize::new(0);
        let err = run_with_retry(policy(3), "getinfo", Some(&token), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RpcError>(()) }
        })
        .await
        .expect_err("cancelled");
        assert!(matches!(err, CoreError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
