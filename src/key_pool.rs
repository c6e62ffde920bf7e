//! C1 — the rotating API-key pool (spec §4.1).
//!
//! A single `Mutex`-guarded `KeyPoolState` is shared by every pipeline
//! worker. `get` is short and non-blocking relative to I/O, matching
//! spec §4.3/§9's requirement that the lock never straddles a network
//! call — the caller takes the key value out under the lock and releases
//! it before making the remote request.

use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Result<Self, KeyPoolError> {
        let value = value.into();
        if value.is_empty() {
            return Err(KeyPoolError::InvalidArgument("api key must not be empty".to_string()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the full credential; keys are secrets.
        let s = &self.0;
        if s.len() > 8 {
            write!(f, "{}…", &s[..4])
        } else {
            write!(f, "****")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPoolError {
    InvalidArgument(String),
    ExhaustedPool,
}

impl fmt::Display for KeyPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPoolError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            KeyPoolError::ExhaustedPool => write!(f, "no live API keys remain"),
        }
    }
}

impl std::error::Error for KeyPoolError {}

/// Reason a key was retired via `retire()`. Permanent for the run (spec
/// §4.1). A transient-error-budget retirement goes through
/// `report_transient` instead, which removes the key directly rather
/// than dispatching on a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    BadCredential,
    QuotaExhausted,
}

struct Entry {
    key: ApiKey,
    error_count: u32,
}

struct KeyPoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

pub struct KeyPool {
    max_key_errors: u32,
    state: Mutex<KeyPoolState>,
}

impl KeyPool {
    /// `max_key_errors == 0` disables the local transient-error budget;
    /// only explicit `retire()` calls (bad credential / quota) remove a
    /// key in that mode.
    pub fn new(max_key_errors: u32) -> Self {
        Self { max_key_errors, state: Mutex::new(KeyPoolState { entries: Vec::new(), cursor: 0 }) }
    }

    pub fn with_keys(
        keys: impl IntoIterator<Item = ApiKey>,
        max_key_errors: u32,
    ) -> Self {
        let pool = Self::new(max_key_errors);
        pool.add(keys);
        pool
    }

    /// Adds keys, ignoring duplicates of keys already present.
    pub fn add(&self, keys: impl IntoIterator<Item = ApiKey>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if state.entries.iter().any(|e| e.key == key) {
                continue;
            }
            state.entries.push(Entry { key, error_count: 0 });
        }
    }

    /// Round-robin `get`: advances the cursor on every call, success or
    /// not, so quota usage is spread evenly across keys (spec §4.1).
    pub fn get(&self) -> Result<ApiKey, KeyPoolError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.entries.is_empty() {
            return Err(KeyPoolError::ExhaustedPool);
        }
        let len = state.entries.len();
        let idx = state.cursor % len;
        state.cursor = (state.cursor + 1) % len;
        Ok(state.entries[idx].key.clone())
    }

    /// Increments the key's transient error count; retires it once
    /// `max_key_errors` is reached.
    pub fn report_transient(&self, key: &ApiKey) {
        if self.max_key_errors == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut retire_idx = None;
        if let Some(pos) = state.entries.iter().position(|e| &e.key == key) {
            state.entries[pos].error_count += 1;
            if state.entries[pos].error_count >= self.max_key_errors {
                retire_idx = Some(pos);
            }
        }
        if let Some(idx) = retire_idx {
            Self::remove_at(&mut state, idx);
        }
    }

    /// Removes the key unconditionally. Idempotent: retiring an absent
    /// key is a no-op, not an error (spec §4.1, §8).
    pub fn retire(&self, key: &ApiKey, _reason: RetireReason) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = state.entries.iter().position(|e| &e.key == key) {
            Self::remove_at(&mut state, pos);
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Removes the entry at `idx` and keeps the round-robin cursor valid,
    /// per spec §4.1's "retiring the current cursor advances it safely".
    fn remove_at(state: &mut KeyPoolState, idx: usize) {
        state.entries.remove(idx);
        if state.entries.is_empty() {
            state.cursor = 0;
        } else if idx < state.cursor || (idx == state.cursor && state.cursor >= state.entries.len())
        {
            state.cursor %= state.entries.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ApiKey {
        ApiKey::new(s).unwrap()
    }

    #[test]
    fn rejects_empty_key() {
        assert!(ApiKey::new("").is_err());
    }

    #[test]
    fn add_ignores_duplicates() {
        let pool = KeyPool::new(0);
        pool.add([key("a"), key("a"), key("b")]);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn get_on_empty_pool_is_exhausted() {
        let pool = KeyPool::new(0);
        assert_eq!(pool.get(), Err(KeyPoolError::ExhaustedPool));
    }

    #[test]
    fn round_robin_fairness() {
        let pool = KeyPool::new(0);
        pool.add([key("a"), key("b"), key("c")]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            let k = pool.get().unwrap();
            *counts.entry(k.as_str().to_string()).or_insert(0) += 1;
        }
        assert_eq!(counts["a"], 3);
        assert_eq!(counts["b"], 3);
        assert_eq!(counts["c"], 3);
    }

    #[test]
    fn round_robin_fairness_uneven_calls() {
        let pool = KeyPool::new(0);
        pool.add([key("a"), key("b")]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..5 {
            let k = pool.get().unwrap();
            *counts.entry(k.as_str().to_string()).or_insert(0) += 1;
        }
        let a = counts.get("a").copied().unwrap_or(0);
        let b = counts.get("b").copied().unwrap_or(0);
        assert!((a == 3 && b == 2) || (a == 2 && b == 3));
    }

    #[test]
    fn retire_is_idempotent() {
        let pool = KeyPool::new(0);
        pool.add([key("a"), key("b")]);
        pool.retire(&key("a"), RetireReason::BadCredential);
        pool.retire(&key("a"), RetireReason::BadCredential);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.get().unwrap(), key("b"));
    }

    #[test]
    fn retire_drains_pool_to_exhausted() {
        let pool = KeyPool::new(0);
        pool.add([key("only")]);
        pool.retire(&key("only"), RetireReason::QuotaExhausted);
        assert_eq!(pool.get(), Err(KeyPoolError::ExhaustedPool));
        // never recovers within the run
        pool.add([key("only")]);
        assert_eq!(pool.get().unwrap(), key("only"));
    }

    #[test]
    fn report_transient_retires_after_max_errors() {
        let pool = KeyPool::new(2);
        pool.add([key("a"), key("b")]);
        pool.report_transient(&key("a"));
        assert_eq!(pool.size(), 2);
        pool.report_transient(&key("a"));
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.get().unwrap(), key("b"));
    }

    #[test]
    fn report_transient_disabled_when_budget_zero() {
        let pool = KeyPool::new(0);
        pool.add([key("a")]);
        for _ in 0..1000 {
            pool.report_transient(&key("a"));
        }
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn retire_current_cursor_advances_safely() {
        let pool = KeyPool::new(0);
        pool.add([key("a"), key("b"), key("c")]);
        assert_eq!(pool.get().unwrap(), key("a"));
        // cursor now points at "b"; retire it and make sure get() doesn't panic
        pool.retire(&key("b"), RetireReason::BadCredential);
        let next = pool.get().unwrap();
        assert!(next == key("a") || next == key("c"));
    }
}
