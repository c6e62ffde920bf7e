//! CLI surface (spec §6, SPEC_FULL.md §11), implemented with `clap`
//! derive the way the teacher's `hp` CLI does, but single-purpose:
//! tinifier has no subcommands, only flags and a list of paths.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Load defaults from this config file instead of
    /// `$HOME/.tinifier/config.json`.
    #[clap(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// TinyPNG-compatible API key. May be repeated; falls back to
    /// `TINYPNG_API_KEY` (comma-separated) when omitted.
    #[clap(long = "api-key", value_name = "KEY", env = "TINYPNG_API_KEY", value_delimiter = ',')]
    pub api_key: Vec<String>,

    /// File extensions to match, comma-separated (default from config).
    #[clap(long, value_name = "EXT", value_delimiter = ',')]
    pub ext: Vec<String>,

    /// Maximum number of jobs running concurrently.
    #[clap(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Abort the run once this many item errors have been observed.
    /// `0` disables the budget.
    #[clap(long, value_name = "N")]
    pub max_errors: Option<usize>,

    /// Retry attempts per stage beyond the first try.
    #[clap(long, value_name = "N")]
    pub retry_attempts: Option<usize>,

    /// Delay between retry attempts, in milliseconds.
    #[clap(long, value_name = "MS")]
    pub delay_between_retries: Option<u64>,

    /// Recurse into subdirectories of the given paths.
    #[clap(long)]
    pub recursive: bool,

    /// Treat a compression result as a skip if it saves less than this
    /// percentage of the original size.
    #[clap(long, value_name = "PERCENT")]
    pub skip_if_diff_less_than: Option<f64>,

    /// Preserve the original file's mtime on the compressed output.
    #[clap(long)]
    pub preserve_time: bool,

    /// Keep a `.orig` backup of the original file before overwriting it.
    #[clap(long)]
    pub keep_original_file: bool,

    /// Raise file log level from `warn` to `debug`.
    #[clap(long)]
    pub verbose: bool,

    /// Suppress the progress bar, results table, and summary line.
    #[clap(long)]
    pub quiet: bool,

    /// Emit a machine-readable JSON summary line instead of the table.
    #[clap(long)]
    pub json: bool,

    /// Files or directories to compress.
    #[clap(required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,
}
