use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tinifier::batch::{self, BatchOpts};
use tinifier::cancel::CancelToken;
use tinifier::cli::Cli;
use tinifier::compressor::TinyPngCompressor;
use tinifier::config::{self, Config};
use tinifier::key_pool::ApiKey;
use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config_file.as_deref());
    init_tracing_if_requested(cli.verbose);

    let ctx = CancelToken::new();
    let ctrlc_ctx = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_ctx.cancel()) {
        eprintln!("warning: could not install Ctrl-C handler: {}", e);
    }

    let keys = resolve_keys(&cli, &config);
    let opts = resolve_opts(&cli, &config);
    let compressor = Arc::new(TinyPngCompressor::new());

    let code = batch::execute(ctx, cli.paths, keys, compressor, opts);

    // `Ctrl-C` during the run already drove the pipeline to `Canceled`
    // and `batch::execute` mapped that to exit code 130; nothing further
    // to reconcile here.
    std::process::exit(code);
}

fn resolve_keys(cli: &Cli, config: &Config) -> Vec<ApiKey> {
    let raw: Vec<String> = if !cli.api_key.is_empty() { cli.api_key.clone() } else { config.api_keys.clone() };
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter_map(|s| match ApiKey::new(s) {
            Ok(k) => Some(k),
            Err(e) => {
                eprintln!("warning: skipping invalid API key: {}", e);
                None
            }
        })
        .collect()
}

fn resolve_opts(cli: &Cli, config: &Config) -> BatchOpts {
    BatchOpts {
        threads: cli.threads.unwrap_or(config.threads),
        retry_attempts: cli.retry_attempts.unwrap_or(config.retry_attempts),
        max_errors_to_stop: cli.max_errors.unwrap_or(config.max_errors),
        max_key_errors: config.max_key_errors,
        delay_between_retries: std::time::Duration::from_millis(
            cli.delay_between_retries.unwrap_or(config.delay_between_retries_ms),
        ),
        extensions: if !cli.ext.is_empty() { cli.ext.clone() } else { config.ext.clone() },
        recursive: cli.recursive || config.recursive,
        skip_if_diff_less_than: cli.skip_if_diff_less_than.unwrap_or(config.skip_if_diff_less_than),
        preserve_time: cli.preserve_time || config.preserve_time,
        keep_original_file: cli.keep_original_file || config.keep_original_file,
        quiet: cli.quiet,
        json: cli.json,
    }
}

/// Tracing confined to the file, never the console, so it never fights
/// the progress bar/table for the terminal (teacher precedent:
/// `main.rs::init_tracing_if_requested`).
fn init_tracing_if_requested(verbose: bool) {
    let logs_dir = config::logs_dir();
    let _ = std::fs::create_dir_all(&logs_dir);
    let log_path: PathBuf = logs_dir.join("debug.log");
    let level = if verbose { "debug" } else { "warn" };

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (writer, guard) = non_blocking(file);
            let _ = Box::leak(Box::new(guard));
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_filter(EnvFilter::new(level));
            tracing_subscriber::registry().with(file_layer).init();
        }
        Err(e) => {
            eprintln!("warning: could not open debug log at {}: {}", log_path.display(), e);
        }
    }
}
