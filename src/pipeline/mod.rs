//! C3 — the bounded concurrent three-stage pipeline (spec §4.3).
//!
//! This is the hardest part of the crate and carries the most detail;
//! see spec §4.3 and `SPEC_FULL.md` §4.3 for the contract this module
//! must uphold. Grounded on the teacher's `transfer.rs`/
//! `transfer/workers/mod.rs` producer-then-worker-threads-then-drainer
//! shape (permit/token channels, per-job worker threads, single-writer
//! shared counters), generalized from "upload/download worker pools"
//! to "N generic stages per job, M concurrent job threads."

mod retry;
mod scheduler;

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;

pub use retry::retry_stage;

use crate::cancel::CancelToken;
use crate::error::ErrorKind;

/// `{ max_parallel: P, retry_attempts: R, max_errors_to_stop: E,
/// delay_between_retries: D }` — spec §4.3.2.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOpts {
    pub max_parallel: usize,
    pub retry_attempts: usize,
    pub max_errors_to_stop: usize,
    pub delay_between_retries: Duration,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            retry_attempts: 0,
            max_errors_to_stop: 0,
            delay_between_retries: Duration::from_millis(0),
        }
    }
}

/// Terminal signal for the whole run, delivered via the scheduler's
/// `JoinHandle` return value (spec §4.3.2's "completion_signal").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    TooManyErrors,
    Canceled,
    /// A stage reported `ErrorKind::Fatal`; the run was aborted rather
    /// than continuing to process remaining items.
    Fatal,
}

/// One item's result, still tagged with its original input so the
/// caller can report on it even when the item failed before producing
/// any stage output (spec §4.3.2's "stream<Result>").
#[derive(Debug, Clone)]
pub struct PipelineItemResult<T1, T4> {
    pub input: T1,
    pub value: Result<T4, ErrorKind>,
}

/// Runs `inputs` through `stage1 -> stage2 -> stage3` with bounded
/// parallelism, per-stage retry, and a global error budget (spec
/// §4.3.2-§4.3.6). Returns a result stream the caller drains and a
/// join handle carrying the terminal `PipelineOutcome`.
pub fn run<T1, T2, T3, T4, F1, F2, F3>(
    ctx: CancelToken,
    inputs: impl Iterator<Item = T1> + Send + 'static,
    stage1: F1,
    stage2: F2,
    stage3: F3,
    opts: PipelineOpts,
) -> (Receiver<PipelineItemResult<T1, T4>>, JoinHandle<PipelineOutcome>)
where
    T1: Clone + Send + 'static,
    T2: Clone + Send + 'static,
    T3: Clone + Send + 'static,
    T4: Send + 'static,
    F1: Fn(&CancelToken, T1) -> Result<T2, ErrorKind> + Send + Sync + 'static,
    F2: Fn(&CancelToken, T2) -> Result<T3, ErrorKind> + Send + Sync + 'static,
    F3: Fn(&CancelToken, T3) -> Result<T4, ErrorKind> + Send + Sync + 'static,
{
    scheduler::spawn(ctx, inputs, stage1, stage2, stage3, opts)
}
