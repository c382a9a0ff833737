//! Tracing setup plus the processing and error logs written per batch.
//!
//! [`ProcessingLogger`] and [`ErrorLog`] are the seams the coordinator reports
//! through. A failing logger never fails a record: the coordinator logs the
//! error and moves on.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{DocflowError, Result};
use crate::report::BatchSummary;
use crate::stages::store::sanitize_id;
use crate::state_machine::{Record, RecordOutcome};

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbose: bool) -> std::result::Result<(), InitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("docflow=debug,info")
            } else {
                EnvFilter::try_new("docflow=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()?;
    Ok(())
}

/// Receives every finished record and the batch summary.
#[async_trait]
pub trait ProcessingLogger: Send + Sync {
    async fn record_completed(&self, record: &Record) -> Result<()>;

    async fn batch_completed(&self, summary: &BatchSummary) -> Result<()>;
}

/// Persists the error list of a failed record.
#[async_trait]
pub trait ErrorLog: Send + Sync {
    /// Returns where the log was written, or `None` for a record without errors.
    async fn write(&self, record: &Record) -> Result<Option<String>>;
}

/// Emits one structured event per record and one per batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

#[async_trait]
impl ProcessingLogger for TracingLogger {
    async fn record_completed(&self, record: &Record) -> Result<()> {
        match record.outcome() {
            RecordOutcome::Done if !record.has_errors() => info!(
                job_id = %record.job_id,
                row = record.row_index,
                status = record.status.as_str(),
                "record processed"
            ),
            outcome => warn!(
                job_id = %record.job_id,
                row = record.row_index,
                ?outcome,
                errors = %record.error_summary(),
                "record failed"
            ),
        }
        Ok(())
    }

    async fn batch_completed(&self, summary: &BatchSummary) -> Result<()> {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch complete"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryFile<'a> {
    session_id: &'a str,
    written_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    summary: &'a BatchSummary,
}

/// Writes one pretty JSON file per record and a batch summary file into
/// `log_dir`.
#[derive(Debug, Clone)]
pub struct FileLogger {
    log_dir: PathBuf,
    session_id: String,
}

impl FileLogger {
    pub fn new(log_dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            session_id: session_id.into(),
        }
    }

    async fn write_file(&self, name: &str, body: &[u8]) -> Result<PathBuf> {
        write_into(&self.log_dir, name, body).await
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S%3f").to_string()
}

async fn write_into(dir: &Path, name: &str, body: &[u8]) -> Result<PathBuf> {
    let storage_err = |path: &Path, source| DocflowError::Storage {
        locator: path.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| storage_err(dir, e))?;
    let path = dir.join(name);
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| storage_err(&path, e))?;
    Ok(path)
}

#[async_trait]
impl ProcessingLogger for FileLogger {
    async fn record_completed(&self, record: &Record) -> Result<()> {
        let stage = sanitize_id(record.stage().name()).to_lowercase();
        let name = format!(
            "{stage}_{}_{}.log",
            sanitize_id(&record.job_id),
            timestamp()
        );
        let body = serde_json::to_vec_pretty(record)?;
        self.write_file(&name, &body).await?;
        Ok(())
    }

    async fn batch_completed(&self, summary: &BatchSummary) -> Result<()> {
        let file = SummaryFile {
            session_id: &self.session_id,
            written_at: Utc::now(),
            summary,
        };
        let body = serde_json::to_vec_pretty(&file)?;
        let path = self
            .write_file(&format!("batch_summary_{}.json", timestamp()), &body)
            .await?;
        info!(path = %path.display(), "batch summary written");
        Ok(())
    }
}

/// Writes `error_<id>.txt` for every record that has errors.
#[derive(Debug, Clone)]
pub struct LocalErrorLog {
    dir: PathBuf,
}

impl LocalErrorLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn render_error_log(record: &Record) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Error Log for File: {}", record.job_id);
    let _ = writeln!(out, "Processing Start: {}", record.started_at.to_rfc3339());
    if let Some(execution_id) = &record.execution_id {
        let _ = writeln!(out, "Execution ID: {execution_id}");
    }
    out.push('\n');
    for error in record.errors() {
        let _ = writeln!(out, "Stage: {}", error.stage);
        let _ = writeln!(out, "Error: {}", error.message);
        let _ = writeln!(out, "Timestamp: {}", error.timestamp.to_rfc3339());
        out.push('\n');
    }
    out
}

#[async_trait]
impl ErrorLog for LocalErrorLog {
    async fn write(&self, record: &Record) -> Result<Option<String>> {
        if !record.has_errors() {
            return Ok(None);
        }
        let name = format!("error_{}.txt", sanitize_id(&record.job_id));
        let path = write_into(&self.dir, &name, render_error_log(record).as_bytes()).await?;
        Ok(Some(path.display().to_string()))
    }
}
