use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::store::{DocumentStore, sanitize_id};
use super::{StageExecutor, StageInputs, StageResult};
use crate::error::{DocflowError, Result};
use crate::gemini::{ContentGenerator, GenerateContentRequest, generate_text};
use crate::state_machine::{Artifact, Record, Stage};

/// OCR: fetch the source document, send it to the model with the OCR prompt
/// and export the text as `ocr_<id>.txt`.
pub struct ExtractionStage<G> {
    generator: Arc<G>,
    store: Arc<dyn DocumentStore>,
    prompt: String,
}

impl<G: ContentGenerator> ExtractionStage<G> {
    pub fn new(
        generator: Arc<G>,
        store: Arc<dyn DocumentStore>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            store,
            prompt: prompt.into(),
        }
    }

    async fn extract(&self, record: &Record, inputs: StageInputs<'_>) -> Result<Artifact> {
        let credential = inputs
            .credential
            .ok_or(DocflowError::MissingInput("credential"))?;

        let document = self.store.fetch(&record.source).await?;
        debug!(
            job_id = %record.job_id,
            mime_type = %document.mime_type,
            bytes = document.bytes.len(),
            "fetched source document"
        );

        let prompt = self.prompt.as_str();
        let request = if document.mime_type == "text/plain" {
            GenerateContentRequest::text(prompt, &String::from_utf8_lossy(&document.bytes))
        } else {
            GenerateContentRequest::with_document(prompt, &document.mime_type, &document.bytes)
        };
        let text = generate_text(self.generator.as_ref(), credential.expose(), &request).await?;

        let name = format!("ocr_{}.txt", sanitize_id(&record.job_id));
        let export = self.store.put(&name, text.as_bytes()).await?;

        Ok(Artifact::ExtractedText {
            text,
            export: Some(export),
        })
    }
}

#[async_trait]
impl<G: ContentGenerator + 'static> StageExecutor for ExtractionStage<G> {
    fn stage(&self) -> Stage {
        Stage::Extraction
    }

    async fn execute(&self, record: &Record, inputs: StageInputs<'_>) -> StageResult {
        StageResult::from_result(Stage::Extraction, self.extract(record, inputs).await)
    }
}
