//! Per-stage retry policy (spec §4.3.4).
//!
//! Generalizes the teacher's `util::retry_operation` (attempt loop with
//! a growing sleep between attempts) to an explicit, interruptible
//! bounded-attempts loop driven by a shared `CancelToken` rather than a
//! fixed global backoff.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::ErrorKind;

/// Invokes `op` up to `retry_attempts + 1` times. Checks `ctx` before
/// every attempt; sleeps `delay` (interruptibly) between attempts that
/// failed with a retryable kind; returns immediately on any other
/// failure or on success.
pub fn retry_stage<T>(
    ctx: &CancelToken,
    retry_attempts: usize,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, ErrorKind>,
) -> Result<T, ErrorKind> {
    let max_attempts = retry_attempts + 1;
    let mut last_err = ErrorKind::Fatal;
    for attempt in 0..max_attempts {
        if ctx.is_canceled() {
            return Err(ErrorKind::Canceled);
        }
        match op() {
            Ok(v) => return Ok(v),
            Err(ErrorKind::Canceled) => return Err(ErrorKind::Canceled),
            Err(kind) => {
                let is_last_attempt = attempt + 1 == max_attempts;
                if kind.is_retryable() && !is_last_attempt {
                    last_err = kind;
                    ctx.sleep(delay);
                    continue;
                }
                return Err(kind);
            }
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn succeeds_on_first_try() {
        let ctx = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let result = retry_stage(&ctx, 3, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ErrorKind>(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_retries_one_attempt_then_fails() {
        let ctx = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let result = retry_stage(&ctx, 0, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(ErrorKind::Transient)
        });
        assert_eq!(result, Err(ErrorKind::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_transient_up_to_budget_then_succeeds() {
        let ctx = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let result = retry_stage(&ctx, 50, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 50 { Err(ErrorKind::Transient) } else { Ok(()) }
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 51);
    }

    #[test]
    fn non_transient_short_circuits_without_retry() {
        let ctx = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let result = retry_stage(&ctx, 10, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(ErrorKind::NotAnImage)
        });
        assert_eq!(result, Err(ErrorKind::NotAnImage));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn canceled_before_first_attempt_short_circuits() {
        let ctx = CancelToken::new();
        ctx.cancel();
        let calls = AtomicUsize::new(0);
        let result: Result<i32, ErrorKind> = retry_stage(&ctx, 5, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        assert_eq!(result, Err(ErrorKind::Canceled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausting_retries_returns_last_error() {
        let ctx = CancelToken::new();
        let result: Result<i32, ErrorKind> =
            retry_stage(&ctx, 2, Duration::ZERO, || Err(ErrorKind::Io));
        assert_eq!(result, Err(ErrorKind::Io));
    }
}
