//! Admission, per-job worker threads, and error-budget bookkeeping
//! (spec §4.3.3, §4.3.6). Grounded on the teacher's producer/worker/
//! drainer shape: a permit-gated admission loop spawns one thread per
//! job, each job thread reports back on a shared channel, and a single
//! thread (here: the same controller thread) owns `err_count` so it is
//! never written from more than one place at a time (spec §5).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};

use super::retry::retry_stage;
use super::{PipelineItemResult, PipelineOpts, PipelineOutcome};
use crate::cancel::CancelToken;
use crate::error::ErrorKind;

/// Internal message a job thread reports back to the controller.
struct JobDone<T1, T4> {
    input: T1,
    value: Result<T4, ErrorKind>,
}

pub(super) fn spawn<T1, T2, T3, T4, F1, F2, F3>(
    ctx: CancelToken,
    mut inputs: impl Iterator<Item = T1> + Send + 'static,
    stage1: F1,
    stage2: F2,
    stage3: F3,
    opts: PipelineOpts,
) -> (crossbeam_channel::Receiver<PipelineItemResult<T1, T4>>, JoinHandle<PipelineOutcome>)
where
    T1: Clone + Send + 'static,
    T2: Clone + Send + 'static,
    T3: Clone + Send + 'static,
    T4: Send + 'static,
    F1: Fn(&CancelToken, T1) -> Result<T2, ErrorKind> + Send + Sync + 'static,
    F2: Fn(&CancelToken, T2) -> Result<T3, ErrorKind> + Send + Sync + 'static,
    F3: Fn(&CancelToken, T3) -> Result<T4, ErrorKind> + Send + Sync + 'static,
{
    let (out_tx, out_rx) = bounded::<PipelineItemResult<T1, T4>>(1);
    let stage1 = Arc::new(stage1);
    let stage2 = Arc::new(stage2);
    let stage3 = Arc::new(stage3);
    let max_parallel = opts.max_parallel.max(1);
    let retry_attempts = opts.retry_attempts;
    let delay = opts.delay_between_retries;

    let handle = std::thread::spawn(move || {
        let (done_tx, done_rx) = unbounded::<JobDone<T1, T4>>();
        let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();
        let mut in_flight = 0usize;
        let mut admitting = true;
        let mut err_count: u64 = 0;
        let mut triggered: Option<PipelineOutcome> = None;

        loop {
            while admitting && in_flight < max_parallel {
                if ctx.is_canceled() {
                    admitting = false;
                    break;
                }
                let Some(input) = inputs.next() else {
                    admitting = false;
                    break;
                };
                in_flight += 1;
                let job_ctx = ctx.clone();
                let job_input = input.clone();
                let done_tx = done_tx.clone();
                let stage1 = Arc::clone(&stage1);
                let stage2 = Arc::clone(&stage2);
                let stage3 = Arc::clone(&stage3);
                worker_handles.push(std::thread::spawn(move || {
                    let value = run_job(&job_ctx, input, retry_attempts, delay, &*stage1, &*stage2, &*stage3);
                    let _ = done_tx.send(JobDone { input: job_input, value });
                }));
            }

            if in_flight == 0 {
                break;
            }

            let Ok(done) = done_rx.recv() else { break };
            in_flight -= 1;
            dispatch_result(
                done,
                &ctx,
                &out_tx,
                opts.max_errors_to_stop,
                &mut err_count,
                &mut admitting,
                &mut triggered,
            );
        }

        for h in worker_handles {
            let _ = h.join();
        }
        drop(out_tx);

        triggered.unwrap_or_else(|| {
            if ctx.is_canceled() { PipelineOutcome::Canceled } else { PipelineOutcome::Completed }
        })
    });

    (out_rx, handle)
}

/// Runs the three stages in strict order for one job, applying the
/// retry policy to each (spec §4.3.6's state machine:
/// `NEW -> UPLOADING -> DOWNLOADING -> COMMITTING -> DONE`, with `FAIL`
/// short-circuiting the remaining stages). Every stage's own retry loop
/// only re-invokes that stage, replaying its input from a clone rather
/// than re-running the earlier stage.
fn run_job<T1, T2, T3, T4>(
    ctx: &CancelToken,
    input: T1,
    retry_attempts: usize,
    delay: Duration,
    stage1: &(impl Fn(&CancelToken, T1) -> Result<T2, ErrorKind> + ?Sized),
    stage2: &(impl Fn(&CancelToken, T2) -> Result<T3, ErrorKind> + ?Sized),
    stage3: &(impl Fn(&CancelToken, T3) -> Result<T4, ErrorKind> + ?Sized),
) -> Result<T4, ErrorKind>
where
    T1: Clone,
    T2: Clone,
    T3: Clone,
{
    let out1 = retry_stage(ctx, retry_attempts, delay, || stage1(ctx, input.clone()))?;
    let out2 = retry_stage(ctx, retry_attempts, delay, || stage2(ctx, out1.clone()))?;
    retry_stage(ctx, retry_attempts, delay, || stage3(ctx, out2.clone()))
}

#[allow(clippy::too_many_arguments)]
fn dispatch_result<T1, T4>(
    done: JobDone<T1, T4>,
    ctx: &CancelToken,
    out_tx: &crossbeam_channel::Sender<PipelineItemResult<T1, T4>>,
    max_errors_to_stop: usize,
    err_count: &mut u64,
    admitting: &mut bool,
    triggered: &mut Option<PipelineOutcome>,
) {
    match &done.value {
        Err(ErrorKind::Canceled) => {
            // Spec §4.3.6: no result is emitted for a job canceled before
            // completion.
        }
        Err(ErrorKind::Fatal) => {
            let _ = out_tx.send(PipelineItemResult { input: done.input, value: done.value });
            if triggered.is_none() {
                *triggered = Some(PipelineOutcome::Fatal);
                *admitting = false;
                ctx.cancel();
            }
        }
        Err(kind) if kind.is_skip() => {
            // Skips (e.g. not-an-image, diff-too-small) are not errors for
            // budget purposes (spec §8: success+error+skipped+canceled ==
            // jobs_admitted).
            if triggered.is_some() || ctx.is_canceled() {
                return;
            }
            let _ = out_tx.send(PipelineItemResult { input: done.input, value: done.value });
        }
        Err(_) => {
            if triggered.is_some() {
                return;
            }
            *err_count += 1;
            let budget_exceeded = max_errors_to_stop > 0 && *err_count >= max_errors_to_stop as u64;
            if budget_exceeded {
                // The item that tips the budget over is itself not
                // surfaced (spec §8 scenario 3); only the cancellation
                // fires.
                *triggered = Some(PipelineOutcome::TooManyErrors);
                *admitting = false;
                ctx.cancel();
                return;
            }
            if ctx.is_canceled() {
                // Externally canceled mid-flight; discard per spec §4.3.2
                // guarantee 4.
                return;
            }
            let _ = out_tx.send(PipelineItemResult { input: done.input, value: done.value });
        }
        Ok(_) => {
            if triggered.is_some() || ctx.is_canceled() {
                return;
            }
            let _ = out_tx.send(PipelineItemResult { input: done.input, value: done.value });
        }
    }
}
