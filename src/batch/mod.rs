//! C4 — the Batch Coordinator (spec §4.4).
//!
//! Wires a file-path source to the pipeline, drains results into the
//! aggregates and a results table, drives the progress view, and maps
//! the terminal `PipelineOutcome` to a process exit code. Grounded on
//! the teacher's `transfer::handle_ts` top-level orchestration shape:
//! build context, run workers, drain metrics/failures, print summary.

mod progress;
mod source;
mod stages;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::compressor::Compressor;
use crate::error::{Aggregates, JobOutcome, JobResult, SkipReason};
use crate::key_pool::{ApiKey, KeyPool};
use crate::pipeline::{self, PipelineOpts, PipelineOutcome};

pub use progress::{ProgressView, ResultsTable};

/// `{ id, path, total }` from spec §3, plus a side-channel the commit
/// stage uses to hand back skip detail that doesn't fit through the
/// generic `Result<T, ErrorKind>` the pipeline retries on.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub path: PathBuf,
    pub total: u64,
    skip_detail: Arc<Mutex<Option<SkipReason>>>,
}

impl Job {
    pub fn new(id: u64, path: PathBuf, total: u64) -> Self {
        Self { id, path, total, skip_detail: Arc::new(Mutex::new(None)) }
    }

    fn set_skip_detail(&self, reason: SkipReason) {
        *self.skip_detail.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
    }

    fn take_skip_detail(&self) -> Option<SkipReason> {
        self.skip_detail.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Opts table from spec §4.4, verbatim.
#[derive(Debug, Clone)]
pub struct BatchOpts {
    pub threads: usize,
    pub retry_attempts: usize,
    pub max_errors_to_stop: usize,
    pub max_key_errors: u32,
    pub delay_between_retries: Duration,
    pub extensions: Vec<String>,
    pub recursive: bool,
    pub skip_if_diff_less_than: f64,
    pub preserve_time: bool,
    pub keep_original_file: bool,
    pub quiet: bool,
    pub json: bool,
}

/// Exit codes per spec §6.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_JOB_ERROR: i32 = 1;
pub const EXIT_POOL_OR_BUDGET: i32 = 2;
pub const EXIT_CANCELED: i32 = 130;

pub fn execute(
    ctx: CancelToken,
    paths: Vec<PathBuf>,
    keys: Vec<ApiKey>,
    compressor: Arc<dyn Compressor>,
    opts: BatchOpts,
) -> i32 {
    if keys.is_empty() {
        eprintln!("tinifier: no API keys configured (NoKeys)");
        return EXIT_POOL_OR_BUDGET;
    }
    let key_pool = Arc::new(KeyPool::with_keys(keys, opts.max_key_errors));

    let files = source::walk(&paths, &opts.extensions, opts.recursive);
    let total = files.len() as u64;
    if total == 0 {
        tracing::info!("tinifier: no input files matched, nothing to do");
        return EXIT_SUCCESS;
    }

    let progress = ProgressView::new(total, opts.quiet);
    let mut table = ResultsTable::new();

    let jobs = files.into_iter().enumerate().map(move |(i, path)| Job::new(i as u64 + 1, path, total));

    let upload_ctx = Arc::new(stages::UploadCtx { key_pool: Arc::clone(&key_pool), compressor: Arc::clone(&compressor) });
    let download_ctx = Arc::new(stages::DownloadCtx { key_pool: Arc::clone(&key_pool), compressor });
    let commit_ctx = Arc::new(stages::CommitCtx {
        skip_if_diff_less_than: opts.skip_if_diff_less_than,
        preserve_time: opts.preserve_time,
        keep_original_file: opts.keep_original_file,
    });

    let pipeline_opts = PipelineOpts {
        max_parallel: opts.threads.max(1),
        retry_attempts: opts.retry_attempts,
        max_errors_to_stop: opts.max_errors_to_stop,
        delay_between_retries: opts.delay_between_retries,
    };

    let (rx, handle) = pipeline::run(
        ctx,
        jobs,
        move |ctx, job| stages::upload_stage(&upload_ctx, ctx, job),
        move |ctx, uploaded| stages::download_stage(&download_ctx, ctx, uploaded),
        move |ctx, downloaded| stages::commit_stage(&commit_ctx, ctx, downloaded),
        pipeline_opts,
    );

    let mut aggregates = Aggregates::default();
    for item in rx {
        let result = to_job_result(item);
        aggregates.record(&result);
        progress.inc(1);
        table.append(&result);
    }

    let outcome = handle.join().unwrap_or(PipelineOutcome::Fatal);
    progress.finish();
    if opts.json {
        print_json_summary(&aggregates, &outcome);
    } else if !opts.quiet {
        table.render();
        print_summary(&aggregates, &outcome);
    }
    tracing::info!(
        success = aggregates.success_count,
        errors = aggregates.error_count,
        skipped = aggregates.skipped_count,
        saved_bytes = aggregates.total_saved_bytes,
        outcome = ?outcome,
        "batch run complete"
    );

    exit_code(&aggregates, &outcome)
}

fn to_job_result(item: pipeline::PipelineItemResult<Job, stages::CommitSuccess>) -> JobResult {
    let job = item.input;
    let outcome = match item.value {
        Ok(success) => JobOutcome::Success {
            original_bytes: success.original_bytes,
            compressed_bytes: success.compressed_bytes,
            mime_out: success.mime_out,
        },
        Err(kind) if kind.is_skip() => {
            let reason = job.take_skip_detail().unwrap_or(SkipReason::NotAnImage);
            JobOutcome::Skipped { reason }
        }
        Err(kind) => JobOutcome::Error { message: kind.to_string(), kind },
    };
    JobResult { job_id: job.id, path: job.path, total: job.total, outcome }
}

fn print_summary(aggregates: &Aggregates, outcome: &PipelineOutcome) {
    println!(
        "done: {} ok, {} skipped, {} errors — saved {} bytes ({:?})",
        aggregates.success_count, aggregates.skipped_count, aggregates.error_count, aggregates.total_saved_bytes, outcome
    );
}

fn print_json_summary(aggregates: &Aggregates, outcome: &PipelineOutcome) {
    let outcome_str = match outcome {
        PipelineOutcome::Completed => "completed",
        PipelineOutcome::Canceled => "canceled",
        PipelineOutcome::TooManyErrors => "too_many_errors",
        PipelineOutcome::Fatal => "fatal",
    };
    let line = serde_json::json!({
        "success_count": aggregates.success_count,
        "error_count": aggregates.error_count,
        "skipped_count": aggregates.skipped_count,
        "total_original_bytes": aggregates.total_original,
        "total_compressed_bytes": aggregates.total_compressed,
        "total_saved_bytes": aggregates.total_saved_bytes,
        "outcome": outcome_str,
    });
    println!("{}", line);
}

fn exit_code(aggregates: &Aggregates, outcome: &PipelineOutcome) -> i32 {
    match outcome {
        PipelineOutcome::Canceled => EXIT_CANCELED,
        PipelineOutcome::TooManyErrors | PipelineOutcome::Fatal => EXIT_POOL_OR_BUDGET,
        PipelineOutcome::Completed => {
            if aggregates.error_count > 0 {
                EXIT_JOB_ERROR
            } else {
                EXIT_SUCCESS
            }
        }
    }
}
