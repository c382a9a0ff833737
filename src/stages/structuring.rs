use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{StageExecutor, StageInputs, StageResult};
use crate::error::DocflowError;
use crate::state_machine::{Artifact, Record, Stage};

/// Assembles the extracted text and translations into one JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuringStage;

#[async_trait]
impl StageExecutor for StructuringStage {
    fn stage(&self) -> Stage {
        Stage::Structuring
    }

    async fn execute(&self, record: &Record, inputs: StageInputs<'_>) -> StageResult {
        let artifacts = record.artifacts();
        let Some(text) = artifacts.extracted_text() else {
            return StageResult::failure(
                Stage::Structuring,
                DocflowError::MissingInput("extracted text").to_string(),
            );
        };
        let translations = artifacts.translations().cloned().unwrap_or_default();

        let payload = json!({
            "originalFileId": record.job_id,
            "bookName": record.book_name,
            "extractedText": text,
            "translations": translations,
            "processingMetadata": {
                "executionId": record.execution_id,
                "sessionId": inputs.session_id,
                "startTime": record.started_at,
                "timestamp": Utc::now(),
                "success": record.all_stages_succeeded(),
            },
        });
        StageResult::success(Stage::Structuring, Some(Artifact::Structured { payload }))
    }
}
