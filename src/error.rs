//! The closed error taxonomy the pipeline and key pool switch on.
//!
//! This is deliberately a plain enum rather than a `thiserror`-style
//! wrapper: every stage function returns `Result<T, ErrorKind>` and the
//! pipeline's retry/retirement policy dispatches on the variant alone.
//! Filesystem/config failures at the CLI boundary (`config.rs`,
//! `main.rs`) are reported and degraded gracefully rather than
//! propagated, so nothing there needs an error-context type either.

use std::fmt;
use std::path::PathBuf;

/// Classification of a stage failure. Drives retry and key-retirement
/// policy; see spec §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup, 5xx, or a 429 of unknown cause. Retried.
    Transient,
    /// 401/403 from the remote. The key is retired; the item is retried
    /// as if the failure were transient so a fresh key gets a shot.
    BadCredential,
    /// 429 with an explicit quota signal. Same disposition as
    /// `BadCredential`.
    QuotaExhausted,
    /// The input did not sniff as an image. Not retried; skipped.
    NotAnImage,
    /// Commit-stage size delta fell under `skip_if_diff_less_than`.
    TooSmallDiff,
    /// The run's cancellation token was observed before or during I/O.
    Canceled,
    /// Local filesystem error. Retried like `Transient`.
    Io,
    /// Programming error; aborts the whole run rather than the item.
    Fatal,
}

impl ErrorKind {
    /// Whether a stage invocation failing with this kind should be
    /// retried by the pipeline's retry policy (spec §4.3.4, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Io)
    }

    /// Whether this kind represents a key-pool-visible credential
    /// problem that should retire the key before the next attempt.
    pub fn retirement_reason(&self) -> Option<&'static str> {
        match self {
            ErrorKind::BadCredential => Some("bad_credential"),
            ErrorKind::QuotaExhausted => Some("quota_exhausted"),
            _ => None,
        }
    }

    /// Whether this kind terminates the item without retry but isn't an
    /// error worth counting against the error budget (it's a skip).
    pub fn is_skip(&self) -> bool {
        matches!(self, ErrorKind::NotAnImage | ErrorKind::TooSmallDiff)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient error",
            ErrorKind::BadCredential => "credential rejected",
            ErrorKind::QuotaExhausted => "quota exhausted",
            ErrorKind::NotAnImage => "not an image",
            ErrorKind::TooSmallDiff => "compression delta too small",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Io => "io error",
            ErrorKind::Fatal => "fatal error",
        };
        f.write_str(s)
    }
}

/// Why a job was skipped rather than completed or errored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage,
    DiffTooSmall { input_size: u64, output_size: u64, percent: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnImage => write!(f, "not an image"),
            SkipReason::DiffTooSmall { input_size, output_size, percent } => write!(
                f,
                "compressed size {} vs original {} ({:.2}% diff) below threshold",
                output_size, input_size, percent
            ),
        }
    }
}

/// One job's terminal disposition.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success { original_bytes: u64, compressed_bytes: u64, mime_out: String },
    Skipped { reason: SkipReason },
    Error { kind: ErrorKind, message: String },
}

/// `{ job, outcome }` — exactly one success/skip/error per completed job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: u64,
    pub path: PathBuf,
    pub total: u64,
    pub outcome: JobOutcome,
}

/// Run-level totals, updated only by the batch coordinator's drainer.
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
    pub total_original: u64,
    pub total_compressed: u64,
    pub total_saved_bytes: i64,
    pub success_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
}

impl Aggregates {
    pub fn record(&mut self, result: &JobResult) {
        match &result.outcome {
            JobOutcome::Success { original_bytes, compressed_bytes, .. } => {
                self.total_original += original_bytes;
                self.total_compressed += compressed_bytes;
                self.total_saved_bytes += *original_bytes as i64 - *compressed_bytes as i64;
                self.success_count += 1;
            }
            JobOutcome::Skipped { .. } => self.skipped_count += 1,
            JobOutcome::Error { .. } => self.error_count += 1,
        }
    }
}
