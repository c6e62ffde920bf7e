//! Run-wide cancellation handle — this crate's stand-in for spec's `ctx`.
//!
//! A single `CancelToken` is created per batch run and cloned into every
//! pipeline worker thread, the scheduler, and the `Compressor`
//! implementation. Cancelling it is a one-way operation: once canceled,
//! a token never un-cancels for the remainder of the run (spec §5).

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(false), Condvar::new())) }
    }

    /// Trip the token. Safe to call more than once, and from any thread.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut canceled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *canceled = true;
        cvar.notify_all();
    }

    pub fn is_canceled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `dur`, waking early if the token is canceled mid-sleep.
    /// This is the "interruptible sleep" spec §4.3.4/§5 require for the
    /// retry delay.
    pub fn sleep(&self, dur: Duration) {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return;
        }
        let (_guard, _timeout) =
            cvar.wait_timeout_while(guard, dur, |canceled| !*canceled).unwrap_or_else(|e| e.into_inner());
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn not_canceled_by_default() {
        let ct = CancelToken::new();
        assert!(!ct.is_canceled());
    }

    #[test]
    fn cancel_is_observed() {
        let ct = CancelToken::new();
        ct.cancel();
        assert!(ct.is_canceled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let ct = CancelToken::new();
        ct.cancel();
        ct.cancel();
        assert!(ct.is_canceled());
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let ct = CancelToken::new();
        let ct2 = ct.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            ct2.sleep(Duration::from_secs(3600));
        });
        std::thread::sleep(Duration::from_millis(20));
        ct.cancel();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sleep_runs_full_duration_when_not_canceled() {
        let ct = CancelToken::new();
        let start = Instant::now();
        ct.sleep(Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
