//! The three concrete stages the Batch Coordinator hands to the
//! pipeline (spec §4.3.5). Each stage is a plain function taking a
//! small `*Ctx` struct, matching the teacher's `WorkerCommonCtx`
//! pattern in `transfer/workers/mod.rs` rather than threading a long
//! argument list.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::compressor::{sniff_image_mime, Compressor};
use crate::error::{ErrorKind, SkipReason};
use crate::key_pool::{ApiKey, KeyPool, RetireReason};

use super::Job;

const SNIFF_BYTES: usize = 32;

pub struct UploadCtx {
    pub key_pool: Arc<KeyPool>,
    pub compressor: Arc<dyn Compressor>,
}

pub struct DownloadCtx {
    pub key_pool: Arc<KeyPool>,
    pub compressor: Arc<dyn Compressor>,
}

pub struct CommitCtx {
    pub skip_if_diff_less_than: f64,
    pub preserve_time: bool,
    pub keep_original_file: bool,
}

#[derive(Debug, Clone)]
pub struct UploadedJob {
    pub job: Job,
    pub remote_ref: String,
    pub input_size: u64,
    pub input_mime: String,
}

#[derive(Debug, Clone)]
pub struct DownloadedJob {
    pub job: Job,
    pub input_size: u64,
    pub temp_path: PathBuf,
    pub output_size: u64,
    pub output_mime: String,
    /// Shared ownership of the temp file's cleanup, taken out the
    /// moment the download stage creates it. Every clone made for a
    /// commit-stage retry attempt holds the same `Arc`, so the file is
    /// only ever deleted once — when the last clone (including the one
    /// `run_job` holds across retries) is dropped, whatever the job's
    /// outcome. See spec §8's "every temp_path is absent after the job
    /// terminates, regardless of outcome."
    temp_guard: Arc<TempFileGuard>,
}

#[derive(Debug, Clone)]
pub struct CommitSuccess {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub mime_out: String,
}

/// Takes a key from the pool, reports a transient failure or retires it
/// per the policy spec §4.3.5 states for both the upload and download
/// stage, and maps the underlying `ErrorKind` to the one the caller's
/// attempt should return (always `Transient` for credential/quota
/// problems, so the next attempt picks a different key).
///
/// Only `ErrorKind::Transient` counts against the key's error budget —
/// spec §7 gives `IO` a Key action of **none**, since a local
/// filesystem failure says nothing about the remote credential. Gating
/// on `is_retryable()` instead would also charge `Io` to the key.
fn classify_and_retire(pool: &KeyPool, key: &ApiKey, kind: ErrorKind) -> ErrorKind {
    match kind.retirement_reason() {
        Some("bad_credential") => {
            pool.retire(key, RetireReason::BadCredential);
            ErrorKind::Transient
        }
        Some("quota_exhausted") => {
            pool.retire(key, RetireReason::QuotaExhausted);
            ErrorKind::Transient
        }
        _ => {
            if kind == ErrorKind::Transient {
                pool.report_transient(key);
            }
            kind
        }
    }
}

pub fn upload_stage(ctx: &UploadCtx, cancel: &CancelToken, job: Job) -> Result<UploadedJob, ErrorKind> {
    if cancel.is_canceled() {
        return Err(ErrorKind::Canceled);
    }
    let mut file = File::open(&job.path).map_err(|_| ErrorKind::Io)?;
    let mut head = vec![0u8; SNIFF_BYTES];
    let n = file.read(&mut head).map_err(|_| ErrorKind::Io)?;
    head.truncate(n);
    if sniff_image_mime(&head).is_none() {
        job.set_skip_detail(SkipReason::NotAnImage);
        return Err(ErrorKind::NotAnImage);
    }

    let mut data = head;
    file.read_to_end(&mut data).map_err(|_| ErrorKind::Io)?;
    let input_size = data.len() as u64;

    let key = ctx.key_pool.get().map_err(|_| ErrorKind::Fatal)?;
    if cancel.is_canceled() {
        return Err(ErrorKind::Canceled);
    }
    match ctx.compressor.upload(cancel, &key, &data) {
        Ok(outcome) => Ok(UploadedJob {
            job,
            remote_ref: outcome.remote_ref,
            input_size,
            input_mime: outcome.input_mime,
        }),
        Err(kind) => Err(classify_and_retire(&ctx.key_pool, &key, kind)),
    }
}

pub fn download_stage(
    ctx: &DownloadCtx,
    cancel: &CancelToken,
    uploaded: UploadedJob,
) -> Result<DownloadedJob, ErrorKind> {
    if cancel.is_canceled() {
        return Err(ErrorKind::Canceled);
    }
    let temp_path = sibling_temp_path(&uploaded.job.path);
    let key = ctx.key_pool.get().map_err(|_| ErrorKind::Fatal)?;

    let mut temp_file = std::fs::File::create(&temp_path).map_err(|_| ErrorKind::Io)?;
    match ctx.compressor.download(cancel, &key, &uploaded.remote_ref, &mut temp_file) {
        Ok(outcome) => Ok(DownloadedJob {
            job: uploaded.job,
            input_size: uploaded.input_size,
            temp_guard: Arc::new(TempFileGuard::new(temp_path.clone())),
            temp_path,
            output_size: outcome.output_size,
            output_mime: outcome.output_mime,
        }),
        Err(kind) => {
            let _ = std::fs::remove_file(&temp_path);
            Err(classify_and_retire(&ctx.key_pool, &key, kind))
        }
    }
}

pub fn commit_stage(
    ctx: &CommitCtx,
    cancel: &CancelToken,
    downloaded: DownloadedJob,
) -> Result<CommitSuccess, ErrorKind> {
    // `downloaded.temp_guard` (shared with every retry clone and with
    // `run_job`'s own copy of this value) owns the temp file's cleanup;
    // it is not recreated here, so an `Io` retry never sees its temp
    // file deleted out from under the next attempt.
    if cancel.is_canceled() {
        return Err(ErrorKind::Canceled);
    }

    // spec's skip check is symmetric: an output that grew relative to
    // the input is just as much a "diff too small to matter" as one
    // that barely shrank, so this is an absolute, not signed, percent.
    let percent_diff = if downloaded.input_size == 0 {
        0.0
    } else {
        (downloaded.input_size as f64 - downloaded.output_size as f64).abs() / downloaded.input_size as f64 * 100.0
    };

    if percent_diff < ctx.skip_if_diff_less_than {
        downloaded.job.set_skip_detail(SkipReason::DiffTooSmall {
            input_size: downloaded.input_size,
            output_size: downloaded.output_size,
            percent: percent_diff,
        });
        return Err(ErrorKind::TooSmallDiff);
    }

    let original_path = &downloaded.job.path;
    let orig_backup = with_suffix(original_path, ".orig");
    // A prior attempt may already have performed the rename below before
    // failing later with a retryable `Io`; re-reading metadata from
    // `original_path` in that case would see nothing there. Source from
    // wherever the original content currently lives so a retry is safe.
    let metadata_source = if ctx.keep_original_file && orig_backup.exists() { &orig_backup } else { original_path };
    let permissions = std::fs::metadata(metadata_source).map(|m| m.permissions()).ok();
    let mtime = if ctx.preserve_time {
        std::fs::metadata(metadata_source).and_then(|m| m.modified()).ok()
    } else {
        None
    };

    if ctx.keep_original_file && !orig_backup.exists() {
        std::fs::rename(original_path, &orig_backup).map_err(|_| ErrorKind::Io)?;
    }

    std::fs::copy(&downloaded.temp_path, original_path).map_err(|_| ErrorKind::Io)?;
    if let Some(perms) = permissions {
        let _ = std::fs::set_permissions(original_path, perms);
    }
    if let Some(mtime) = mtime {
        if let Ok(f) = std::fs::File::open(original_path) {
            let _ = f.set_modified(mtime);
        }
    }

    Ok(CommitSuccess {
        original_bytes: downloaded.input_size,
        compressed_bytes: downloaded.output_size,
        mime_out: downloaded.output_mime,
    })
}

fn sibling_temp_path(input: &std::path::Path) -> PathBuf {
    let unique = format!(
        "{}.{}.tmp",
        input.file_name().and_then(|n| n.to_str()).unwrap_or("tinifier"),
        std::process::id()
    );
    input.with_file_name(unique)
}

fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Deletes the download stage's temp file exactly once, however the job
/// terminates — success, skip, exhausted-retry error, or cancellation —
/// matching spec §8's "every temp_path is absent after the job
/// terminates" invariant. Held behind an `Arc` in `DownloadedJob` so it
/// survives every commit-stage retry clone and is only dropped with the
/// last one. Grounded on the teacher's `ConnTokenGuard` RAII-on-drop
/// pattern (`transfer/workers/upload.rs`).
#[derive(Debug)]
struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
