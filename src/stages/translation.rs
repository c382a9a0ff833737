use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::store::{DocumentStore, sanitize_id};
use super::{Prompts, StageExecutor, StageInputs, StageResult};
use crate::error::{DocflowError, Result};
use crate::gemini::{ContentGenerator, GenerateContentRequest, generate_text};
use crate::rotation::Resource;
use crate::state_machine::{Artifact, Record, Stage};

/// Translates the extracted text into every target language.
///
/// Languages are attempted one after another and a failure does not stop the
/// loop. Any failed language fails the stage, but the translations that did
/// succeed are still handed back in the artifact.
pub struct TranslationStage<G> {
    generator: Arc<G>,
    store: Arc<dyn DocumentStore>,
    prompts: Arc<Prompts>,
}

impl<G: ContentGenerator> TranslationStage<G> {
    pub fn new(generator: Arc<G>, store: Arc<dyn DocumentStore>, prompts: Arc<Prompts>) -> Self {
        Self {
            generator,
            store,
            prompts,
        }
    }

    async fn translate_one(
        &self,
        record: &Record,
        credential: &Resource,
        text: &str,
        language: &str,
    ) -> Result<(String, String)> {
        let request = GenerateContentRequest::text(&self.prompts.translation_for(language), text);
        let translated =
            generate_text(self.generator.as_ref(), credential.expose(), &request).await?;
        let name = format!(
            "translated_{}_{}.txt",
            sanitize_id(&record.job_id),
            sanitize_id(language)
        );
        let export = self.store.put(&name, translated.as_bytes()).await?;
        Ok((translated, export))
    }
}

#[async_trait]
impl<G: ContentGenerator + 'static> StageExecutor for TranslationStage<G> {
    fn stage(&self) -> Stage {
        Stage::Translation
    }

    async fn execute(&self, record: &Record, inputs: StageInputs<'_>) -> StageResult {
        let Some(credential) = inputs.credential else {
            return StageResult::failure(
                Stage::Translation,
                DocflowError::MissingInput("credential").to_string(),
            );
        };
        let Some(text) = record.artifacts().extracted_text() else {
            return StageResult::failure(
                Stage::Translation,
                DocflowError::MissingInput("extracted text").to_string(),
            );
        };

        let mut texts = BTreeMap::new();
        let mut exports = BTreeMap::new();
        let mut errors = Vec::new();

        for language in &record.target_languages {
            match self.translate_one(record, credential, text, language).await {
                Ok((translated, export)) => {
                    debug!(job_id = %record.job_id, %language, "translated");
                    texts.insert(language.clone(), translated);
                    exports.insert(language.clone(), export);
                }
                Err(e) => {
                    warn!(job_id = %record.job_id, %language, error = %e, "translation failed");
                    errors.push(format!("Failed to translate to {language}: {e}"));
                }
            }
        }

        let artifact = Artifact::Translations { texts, exports };
        if errors.is_empty() {
            StageResult::success(Stage::Translation, Some(artifact))
        } else {
            StageResult::partial(Stage::Translation, artifact, errors)
        }
    }
}
