//! Progress bar and results table renderers (spec §6 "Progress and
//! table renderers", called only from the drainer thread). Grounded on
//! the teacher's `util::init_progress_and_mp` style (`indicatif`) and
//! `server::show_table` style (`cli_table`).

use cli_table::{format::Justify, print_stdout, Cell, CellStruct, Style, Table};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{JobOutcome, JobResult};

pub struct ProgressView {
    bar: Option<ProgressBar>,
}

impl ProgressView {
    pub fn new(total: u64, quiet: bool) -> Self {
        if quiet {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .expect("valid progress template")
            .progress_chars("=>-"),
        );
        Self { bar: Some(bar) }
    }

    pub fn inc(&self, n: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(n);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub struct ResultsTable {
    rows: Vec<Vec<CellStruct>>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn append(&mut self, result: &JobResult) {
        let path = result.path.display().to_string();
        let (status, detail) = match &result.outcome {
            JobOutcome::Success { original_bytes, compressed_bytes, .. } => {
                let saved = *original_bytes as i64 - *compressed_bytes as i64;
                ("ok".to_string(), format!("{} -> {} ({} saved)", original_bytes, compressed_bytes, saved))
            }
            JobOutcome::Skipped { reason } => ("skipped".to_string(), reason.to_string()),
            JobOutcome::Error { kind, message } => ("error".to_string(), format!("{}: {}", kind, message)),
        };
        self.rows.push(vec![
            result.job_id.cell().justify(Justify::Right),
            path.cell(),
            status.cell(),
            detail.cell(),
        ]);
    }

    pub fn render(&self) {
        if self.rows.is_empty() {
            return;
        }
        let title = vec![
            "Job".cell().bold(true),
            "Path".cell().bold(true),
            "Status".cell().bold(true),
            "Detail".cell().bold(true),
        ];
        if let Err(e) = print_stdout(self.rows.clone().table().title(title)) {
            eprintln!("warning: could not render results table: {}", e);
        }
    }
}

impl Default for ResultsTable {
    fn default() -> Self {
        Self::new()
    }
}
