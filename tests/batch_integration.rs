//! End-to-end scenarios from spec §8, driven through `batch::execute`
//! against `MockCompressor` rather than the network. Grounded on the
//! teacher's `tests/handle_ts_e2e.rs`/`tests/retry_integration.rs`
//! style: real temp-directory filesystem state, a fake remote
//! collaborator, assertions on the on-disk result plus the run's exit
//! code.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tinifier::batch::{self, BatchOpts};
use tinifier::cancel::CancelToken;
use tinifier::compressor::mock::{MockCompressor, Script};
use tinifier::compressor::Compressor;
use tinifier::error::ErrorKind;
use tinifier::key_pool::ApiKey;

fn write_png(path: &Path, total_len: usize) {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.resize(total_len, 0xAB);
    std::fs::write(path, bytes).unwrap();
}

fn base_opts() -> BatchOpts {
    BatchOpts {
        threads: 2,
        retry_attempts: 0,
        max_errors_to_stop: 0,
        max_key_errors: 0,
        delay_between_retries: Duration::from_millis(0),
        extensions: vec!["png".to_string()],
        recursive: false,
        skip_if_diff_less_than: 0.0,
        preserve_time: false,
        keep_original_file: false,
        quiet: true,
        json: false,
    }
}

fn one_key() -> Vec<ApiKey> {
    vec![ApiKey::new("k1").unwrap()]
}

#[test]
fn happy_path_compresses_and_overwrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    write_png(&file, 1000);

    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(Script::Succeed, vec![1u8; 200]));
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], one_key(), compressor, base_opts());

    assert_eq!(code, batch::EXIT_SUCCESS);
    let out = std::fs::read(&file).unwrap();
    assert_eq!(out.len(), 200);
}

#[test]
fn retries_a_transient_failure_up_to_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    write_png(&file, 500);

    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(
        Script::FailThenSucceed { fail_times: 1, kind: ErrorKind::Transient },
        vec![1u8; 100],
    ));
    let mut opts = base_opts();
    opts.retry_attempts = 1;
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], one_key(), compressor, opts);

    assert_eq!(code, batch::EXIT_SUCCESS);
    assert_eq!(std::fs::read(&file).unwrap().len(), 100);
}

#[test]
fn bad_credential_retires_the_key_and_the_job_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    write_png(&file, 500);

    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(
        Script::FailOnceOnKey { key: "bad".to_string(), kind: ErrorKind::BadCredential },
        vec![1u8; 50],
    ));
    let keys = vec![ApiKey::new("bad").unwrap(), ApiKey::new("good").unwrap()];
    let mut opts = base_opts();
    opts.retry_attempts = 1;
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], keys, compressor, opts);

    assert_eq!(code, batch::EXIT_SUCCESS);
}

#[test]
fn diff_below_threshold_is_a_skip_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    write_png(&file, 300);
    let original = std::fs::read(&file).unwrap();

    // Download bytes are the same size as the input: 0% saved.
    let compressor: Arc<dyn Compressor> =
        Arc::new(MockCompressor::new(Script::Succeed, vec![0xCDu8; 300]));
    let mut opts = base_opts();
    opts.skip_if_diff_less_than = 50.0;
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], one_key(), compressor, opts);

    assert_eq!(code, batch::EXIT_SUCCESS);
    // The original file is untouched on a skip.
    assert_eq!(std::fs::read(&file).unwrap(), original);
}

#[test]
fn error_budget_aborts_the_run_and_the_tipping_item_is_not_reported() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..4 {
        write_png(&dir.path().join(format!("{i}.png")), 200);
    }

    let compressor: Arc<dyn Compressor> =
        Arc::new(MockCompressor::new(Script::AlwaysFail(ErrorKind::Io), vec![1u8; 50]));
    let mut opts = base_opts();
    opts.max_errors_to_stop = 2;
    opts.threads = 1; // serialize completion order so the budget math is deterministic
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], one_key(), compressor, opts);

    assert_eq!(code, batch::EXIT_POOL_OR_BUDGET);
}

#[test]
fn pre_canceled_token_processes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 200);

    let ctx = CancelToken::new();
    ctx.cancel();
    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(Script::Succeed, vec![1u8; 50]));
    let code = batch::execute(ctx, vec![dir.path().to_path_buf()], one_key(), compressor, base_opts());

    assert_eq!(code, batch::EXIT_CANCELED);
}

#[test]
fn no_keys_configured_is_a_fatal_startup_condition() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 200);

    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(Script::Succeed, vec![1u8; 50]));
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], Vec::new(), compressor, base_opts());

    assert_eq!(code, batch::EXIT_POOL_OR_BUDGET);
}

#[test]
fn non_image_input_is_skipped_without_touching_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    std::fs::write(&file, b"not an image, just text").unwrap();

    let compressor: Arc<dyn Compressor> = Arc::new(MockCompressor::new(Script::Succeed, vec![1u8; 50]));
    let code = batch::execute(CancelToken::new(), vec![dir.path().to_path_buf()], one_key(), compressor, base_opts());

    assert_eq!(code, batch::EXIT_SUCCESS);
    assert_eq!(std::fs::read(&file).unwrap(), b"not an image, just text");
}
