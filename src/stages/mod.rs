//! Stage executor contract and the fixed stage plan.
//!
//! Every working stage after key rotation is a [`StageExecutor`]. An executor
//! reads the record, does its work and answers with a [`StageResult`]; it never
//! returns an error type, so the coordinator can fold every outcome into the
//! record the same way.

pub mod extraction;
pub mod persistence;
pub mod store;
pub mod structuring;
pub mod translation;

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DocflowError, Result};
use crate::rotation::Resource;
use crate::state_machine::{Artifact, Record, Stage};

pub use extraction::ExtractionStage;
pub use persistence::PersistenceStage;
pub use store::{Document, DocumentStore, LocalStore};
pub use structuring::StructuringStage;
pub use translation::TranslationStage;

/// Outcome of one stage execution. Success means no errors.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    pub artifact: Option<Artifact>,
    pub errors: Vec<String>,
}

impl StageResult {
    pub fn success(stage: Stage, artifact: Option<Artifact>) -> Self {
        Self {
            stage,
            artifact,
            errors: Vec::new(),
        }
    }

    pub fn failure(stage: Stage, error: impl Into<String>) -> Self {
        Self {
            stage,
            artifact: None,
            errors: vec![error.into()],
        }
    }

    /// Some output was produced but the stage still failed.
    pub fn partial(stage: Stage, artifact: Artifact, errors: Vec<String>) -> Self {
        Self {
            stage,
            artifact: Some(artifact),
            errors,
        }
    }

    pub fn from_result<E: Display>(stage: Stage, result: std::result::Result<Artifact, E>) -> Self {
        match result {
            Ok(artifact) => Self::success(stage, Some(artifact)),
            Err(e) => Self::failure(stage, e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read-only inputs shared by every stage of one record.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub session_id: &'a str,
    pub credential: Option<&'a Resource>,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// The stage this executor implements.
    fn stage(&self) -> Stage;

    async fn execute(&self, record: &Record, inputs: StageInputs<'_>) -> StageResult;
}

/// The four working stages after key rotation, checked to be in order.
pub struct StagePlan {
    executors: [Arc<dyn StageExecutor>; 4],
}

impl StagePlan {
    const ORDER: [Stage; 4] = [
        Stage::Extraction,
        Stage::Translation,
        Stage::Structuring,
        Stage::Persistence,
    ];

    pub fn new(
        extraction: Arc<dyn StageExecutor>,
        translation: Arc<dyn StageExecutor>,
        structuring: Arc<dyn StageExecutor>,
        persistence: Arc<dyn StageExecutor>,
    ) -> Result<Self> {
        let executors = [extraction, translation, structuring, persistence];
        for (executor, expected) in executors.iter().zip(Self::ORDER) {
            if executor.stage() != expected {
                return Err(DocflowError::Config(format!(
                    "stage plan slot {expected} was given an executor for {}",
                    executor.stage()
                )));
            }
        }
        Ok(Self { executors })
    }

    pub fn executor(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        Self::ORDER
            .iter()
            .position(|s| *s == stage)
            .map(|i| &self.executors[i])
    }
}

pub const DEFAULT_OCR_PROMPT: &str = "Extract all text from this document. Preserve headings, \
paragraphs, lists and tables as Markdown. Return only the extracted text.";

pub const DEFAULT_TRANSLATION_PROMPT: &str = "Translate the following text to {language}. \
Provide only the translated text without any additional comments or explanations.";

/// Prompts read once per batch.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub ocr: String,
    pub translation: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            ocr: DEFAULT_OCR_PROMPT.to_string(),
            translation: DEFAULT_TRANSLATION_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// Load prompt files, keeping the built-in prompt for any path not given.
    pub async fn load(ocr: Option<&Path>, translation: Option<&Path>) -> Result<Self> {
        let mut prompts = Self::default();
        if let Some(path) = ocr {
            prompts.ocr = read_prompt(path).await?;
        }
        if let Some(path) = translation {
            prompts.translation = read_prompt(path).await?;
        }
        Ok(prompts)
    }

    /// Translation prompt for one language.
    pub fn translation_for(&self, language: &str) -> String {
        if self.translation.contains("{language}") {
            self.translation.replace("{language}", language)
        } else {
            format!("{}\nTarget language: {language}", self.translation.trim_end())
        }
    }
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|source| DocflowError::Storage {
            locator: path.display().to_string(),
            source,
        })
}
