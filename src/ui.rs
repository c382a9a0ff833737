//! Terminal output: a batch progress bar and the colored end-of-run summary.
//!
//! [`BatchProgress`] is a [`ProcessingLogger`], so the coordinator drives it
//! the same way it drives the file and tracing loggers.

use async_trait::async_trait;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::Result;
use crate::logging::ProcessingLogger;
use crate::report::BatchSummary;
use crate::rotation::Resource;
use crate::state_machine::{ManifestStatus, Record};

pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    dim: Style,
}

impl BatchProgress {
    /// Start a bar sized to the number of records in the batch.
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self::with_bar(pb)
    }

    /// A bar that draws nothing.
    pub fn hidden(total: usize) -> Self {
        let pb = ProgressBar::hidden();
        pb.set_length(total as u64);
        Self::with_bar(pb)
    }

    fn with_bar(pb: ProgressBar) -> Self {
        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.pb.length()
    }

    /// Print the per-key allocation counts. Keys are shown redacted.
    pub fn print_key_usage(&self, usage: &[(Resource, u64)]) {
        if usage.is_empty() {
            return;
        }
        println!("{}", self.dim.apply_to("─── Key usage ───"));
        for (key, count) in usage {
            println!("  {key}  {count}");
        }
    }
}

#[async_trait]
impl ProcessingLogger for BatchProgress {
    async fn record_completed(&self, record: &Record) -> Result<()> {
        if record.status == ManifestStatus::Failed {
            self.pb.println(format!(
                "  {} {} (row {}): {}",
                self.red.apply_to("✗"),
                record.job_id,
                record.row_index,
                record.error_summary()
            ));
        }
        self.pb.set_message(record.job_id.clone());
        self.pb.inc(1);
        Ok(())
    }

    async fn batch_completed(&self, summary: &BatchSummary) -> Result<()> {
        self.pb.finish_and_clear();
        let style = if summary.all_succeeded() {
            &self.green
        } else {
            &self.red
        };
        println!(
            "{} {} processed, {} failed, {} total",
            style.apply_to(if summary.all_succeeded() { "✓" } else { "✗" }),
            summary.succeeded,
            summary.failed,
            summary.total
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_advances_per_record() {
        let progress = BatchProgress::hidden(2);
        assert_eq!(progress.length(), Some(2));
        let mut record = Record::new("a", 0, vec![]);
        record.finalize();
        progress.record_completed(&record).await.unwrap();
        progress.record_completed(&record).await.unwrap();
        assert_eq!(progress.position(), 2);
        progress
            .batch_completed(&BatchSummary::default())
            .await
            .unwrap();
    }
}
