//! Batch coordination: bounded fan-out of records and the completion barrier.
//!
//! Every record runs the whole stage sequence inside its own task. At most
//! `max_concurrency` tasks are in flight; dispatch waits for a free permit.
//! Finished records are collected by row index in a [`CompletionBarrier`], so
//! the returned batch keeps manifest order whatever order tasks finish in.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DocflowError, Result};
use crate::logging::{ErrorLog, ProcessingLogger};
use crate::report::{BatchSummary, CompletionReporter};
use crate::rotation::ResourceRotator;
use crate::stages::{StageExecutor, StageInputs, StagePlan, StageResult};
use crate::state_machine::{Record, Stage, Transition};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

const NO_RESOURCE: &str = "no resource available";
const CANCELLED_BEFORE_DISPATCH: &str = "batch cancelled before dispatch";

/// Records read from one manifest, plus where the results are written back.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub manifest_path: PathBuf,
    pub write_back_path: PathBuf,
    pub records: Vec<Record>,
}

impl BatchJob {
    pub fn new(manifest_path: impl Into<PathBuf>, records: Vec<Record>) -> Self {
        let manifest_path = manifest_path.into();
        Self {
            write_back_path: manifest_path.clone(),
            manifest_path,
            records,
        }
    }

    pub fn with_write_back(mut self, path: impl Into<PathBuf>) -> Self {
        self.write_back_path = path.into();
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Counts record completions against the batch size.
///
/// Each row index may arrive exactly once. The batch is only complete when
/// every slot is filled.
#[derive(Debug)]
pub struct CompletionBarrier {
    slots: Vec<Option<Record>>,
    completed: usize,
}

impl CompletionBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(expected).collect(),
            completed: 0,
        }
    }

    pub fn arrive(&mut self, index: usize, record: Record) -> Result<()> {
        let total = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(DocflowError::UnknownCompletion { index, total })?;
        if slot.is_some() {
            return Err(DocflowError::DuplicateCompletion { index });
        }
        *slot = Some(record);
        self.completed += 1;
        Ok(())
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.slots.len()
    }

    /// The records in row order, or an error if any slot is still empty.
    pub fn into_records(self) -> Result<Vec<Record>> {
        if !self.is_complete() {
            return Err(DocflowError::BatchIncomplete {
                expected: self.slots.len(),
                completed: self.completed,
            });
        }
        Ok(self.slots.into_iter().flatten().collect())
    }
}

/// Shared, read-only state handed to every worker task.
struct Pipeline {
    rotator: Arc<ResourceRotator>,
    plan: Arc<StagePlan>,
    session_id: Arc<str>,
}

impl Pipeline {
    /// Run one record through every stage until it is done or halts.
    async fn process(&self, mut record: Record) -> Record {
        let execution_id = uuid::Uuid::new_v4().to_string();
        record.begin(execution_id);
        info!(job_id = %record.job_id, session_id = %self.session_id, "record started");

        let acquired = match self.rotator.acquire().await {
            Some(credential) => {
                debug!(job_id = %record.job_id, key = %credential, "credential allocated");
                record.assign_credential(credential);
                StageResult::success(Stage::ResourceAcquisition, None)
            }
            None => StageResult::failure(Stage::ResourceAcquisition, NO_RESOURCE),
        };
        let mut transition = self.apply(&mut record, acquired);

        while let Transition::Next(stage) = transition {
            if stage == Stage::Persistence {
                record.finished_at = Some(Utc::now());
            }
            let result = match self.plan.executor(stage) {
                Some(executor) => self.run_stage(executor.as_ref(), &record).await,
                None => StageResult::failure(stage, format!("no executor for stage {stage}")),
            };
            transition = self.apply(&mut record, result);
        }
        record
    }

    async fn run_stage(&self, executor: &dyn StageExecutor, record: &Record) -> StageResult {
        let stage = executor.stage();
        let credential = record.credential().cloned();
        let inputs = StageInputs {
            session_id: &self.session_id,
            credential: credential.as_ref(),
        };
        info!(job_id = %record.job_id, %stage, "stage started");
        AssertUnwindSafe(executor.execute(record, inputs))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| StageResult::failure(stage, "stage panicked"))
    }

    fn apply(&self, record: &mut Record, result: StageResult) -> Transition {
        let stage = result.stage;
        if result.is_success() {
            info!(job_id = %record.job_id, %stage, "stage finished");
        } else {
            warn!(
                job_id = %record.job_id,
                %stage,
                errors = %result.errors.join("; "),
                "stage failed"
            );
        }
        record.apply(result)
    }
}

/// Runs a [`BatchJob`] through the stage plan with bounded concurrency.
pub struct BatchCoordinator {
    rotator: Arc<ResourceRotator>,
    plan: Arc<StagePlan>,
    loggers: Vec<Arc<dyn ProcessingLogger>>,
    error_log: Option<Arc<dyn ErrorLog>>,
    max_concurrency: usize,
    cancel: CancellationToken,
    session_id: Arc<str>,
}

impl BatchCoordinator {
    pub fn new(rotator: Arc<ResourceRotator>, plan: Arc<StagePlan>) -> Self {
        Self {
            rotator,
            plan,
            loggers: Vec::new(),
            error_log: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cancel: CancellationToken::new(),
            session_id: uuid::Uuid::new_v4().to_string().into(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ProcessingLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = Some(error_log);
        self
    }

    /// Values below one are raised to one.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        let session_id: String = session_id.into();
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process every record and return the batch in manifest order.
    ///
    /// Only a broken completion count is an error; stage failures live on the
    /// records themselves.
    pub async fn run(&self, mut batch: BatchJob) -> Result<BatchJob> {
        let records = std::mem::take(&mut batch.records);
        let total = records.len();
        info!(
            session_id = %self.session_id,
            records = total,
            max_concurrency = self.max_concurrency,
            "batch started"
        );

        let pipeline = Arc::new(Pipeline {
            rotator: self.rotator.clone(),
            plan: self.plan.clone(),
            session_id: self.session_id.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut barrier = CompletionBarrier::new(total);
        let mut tasks = JoinSet::new();

        for (index, mut record) in records.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                record.cancel(CANCELLED_BEFORE_DISPATCH);
                self.complete(&mut barrier, index, record).await?;
                continue;
            };

            let pipeline = pipeline.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, pipeline.process(record).await)
            });

            while let Some(joined) = tasks.try_join_next() {
                self.collect(&mut barrier, joined).await?;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.collect(&mut barrier, joined).await?;
        }

        batch.records = barrier.into_records()?;
        let summary = CompletionReporter::summarize(&batch.records);
        self.report_batch(&summary).await;
        Ok(batch)
    }

    async fn collect(
        &self,
        barrier: &mut CompletionBarrier,
        joined: std::result::Result<(usize, Record), tokio::task::JoinError>,
    ) -> Result<()> {
        match joined {
            Ok((index, record)) => self.complete(barrier, index, record).await,
            Err(e) => {
                // The record is lost; the barrier count reports it.
                error!(
                    error = %e,
                    completed = barrier.completed(),
                    expected = barrier.expected(),
                    "record task failed"
                );
                Ok(())
            }
        }
    }

    /// Finalize a record, notify the sinks, then count it.
    async fn complete(
        &self,
        barrier: &mut CompletionBarrier,
        index: usize,
        mut record: Record,
    ) -> Result<()> {
        record.finalize();

        if record.has_errors() {
            if let Some(error_log) = &self.error_log {
                match error_log.write(&record).await {
                    Ok(Some(location)) => {
                        debug!(job_id = %record.job_id, %location, "error log written");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(job_id = %record.job_id, error = %e, "error log failed"),
                }
            }
        }

        for logger in &self.loggers {
            if let Err(e) = logger.record_completed(&record).await {
                warn!(job_id = %record.job_id, error = %e, "processing logger failed");
            }
        }

        barrier.arrive(index, record)
    }

    async fn report_batch(&self, summary: &BatchSummary) {
        info!(
            session_id = %self.session_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch finished"
        );
        for logger in &self.loggers {
            if let Err(e) = logger.batch_completed(summary).await {
                warn!(error = %e, "processing logger failed on batch summary");
            }
        }
    }
}
