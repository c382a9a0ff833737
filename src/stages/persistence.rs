use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::store::{DocumentStore, sanitize_id};
use super::{StageExecutor, StageInputs, StageResult};
use crate::error::{DocflowError, Result};
use crate::state_machine::{Artifact, Record, Stage};

/// Writes `processed_<id>.json` with the record's final output.
///
/// The coordinator stamps `finished_at` before this stage runs, so the
/// persisted timestamp is the record's end time.
pub struct PersistenceStage {
    store: Arc<dyn DocumentStore>,
}

impl PersistenceStage {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn persist(&self, record: &Record) -> Result<Artifact> {
        let artifacts = record.artifacts();
        let structured = artifacts
            .structured()
            .ok_or(DocflowError::MissingInput("structured payload"))?;

        let document = json!({
            "fileId": record.job_id,
            "bookName": record.book_name,
            "extractedText": artifacts.extracted_text(),
            "translations": artifacts.translations(),
            "structured": structured,
            "processingTimestamp": record.finished_at,
            "allStagesSuccess": record.all_stages_succeeded(),
        });
        let body = serde_json::to_vec_pretty(&document)?;

        let name = format!("processed_{}.json", sanitize_id(&record.job_id));
        let location = self.store.put(&name, &body).await?;
        Ok(Artifact::Persisted { location })
    }
}

#[async_trait]
impl StageExecutor for PersistenceStage {
    fn stage(&self) -> Stage {
        Stage::Persistence
    }

    async fn execute(&self, record: &Record, _inputs: StageInputs<'_>) -> StageResult {
        StageResult::from_result(Stage::Persistence, self.persist(record).await)
    }
}
