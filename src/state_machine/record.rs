use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{Stage, StateMachine, Transition};
use crate::rotation::Resource;
use crate::stages::StageResult;

/// Final manifest status written back for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Pending,
    Processed,
    Failed,
}

impl ManifestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::Pending => "pending",
            ManifestStatus::Processed => "processed",
            ManifestStatus::Failed => "failed",
        }
    }
}

/// One entry of the append-only error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Appended every time a stage result is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: Stage,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Stage-produced output. Each stage owns one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    ExtractedText {
        text: String,
        export: Option<String>,
    },
    Translations {
        texts: BTreeMap<String, String>,
        exports: BTreeMap<String, String>,
    },
    Structured {
        payload: serde_json::Value,
    },
    Persisted {
        location: String,
    },
}

/// Side-map of artifacts keyed by the stage that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts(BTreeMap<Stage, Artifact>);

impl Artifacts {
    pub fn get(&self, stage: Stage) -> Option<&Artifact> {
        self.0.get(&stage)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extracted_text(&self) -> Option<&str> {
        match self.get(Stage::Extraction)? {
            Artifact::ExtractedText { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn translations(&self) -> Option<&BTreeMap<String, String>> {
        match self.get(Stage::Translation)? {
            Artifact::Translations { texts, .. } => Some(texts),
            _ => None,
        }
    }

    pub fn structured(&self) -> Option<&serde_json::Value> {
        match self.get(Stage::Structuring)? {
            Artifact::Structured { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn persisted_location(&self) -> Option<&str> {
        match self.get(Stage::Persistence)? {
            Artifact::Persisted { location } => Some(location),
            _ => None,
        }
    }

    fn insert(&mut self, stage: Stage, artifact: Artifact) {
        self.0.insert(stage, artifact);
    }
}

/// Where a record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    InProgress(Stage),
    Done,
    FailedAt(Stage),
}

/// One document job moving through the pipeline.
///
/// The stage, the error list and the success flag are private so that they
/// only change through [`Record::apply`]: once an error is recorded the flag is
/// false for good and the stage never moves again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub job_id: String,
    pub row_index: usize,
    pub source: String,
    pub book_name: Option<String>,
    pub target_languages: Vec<String>,
    pub original_status: Option<String>,
    pub status: ManifestStatus,
    pub execution_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    stage: Stage,
    halted: bool,
    all_stages_succeeded: bool,
    errors: Vec<StageError>,
    artifacts: Artifacts,
    stage_log: Vec<StageLogEntry>,
    #[serde(skip)]
    credential: Option<Resource>,
}

impl Record {
    pub fn new(job_id: impl Into<String>, row_index: usize, target_languages: Vec<String>) -> Self {
        let job_id = job_id.into();
        Self {
            source: job_id.clone(),
            job_id,
            row_index,
            book_name: None,
            target_languages,
            original_status: None,
            status: ManifestStatus::Pending,
            execution_id: None,
            started_at: Utc::now(),
            finished_at: None,
            stage: Stage::Initialized,
            halted: false,
            all_stages_succeeded: true,
            errors: Vec::new(),
            artifacts: Artifacts::default(),
            stage_log: Vec::new(),
            credential: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_book_name(mut self, book_name: Option<String>) -> Self {
        self.book_name = book_name;
        self
    }

    pub fn with_original_status(mut self, status: Option<String>) -> Self {
        self.original_status = status;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn all_stages_succeeded(&self) -> bool {
        self.all_stages_succeeded
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn stage_log(&self) -> &[StageLogEntry] {
        &self.stage_log
    }

    pub fn credential(&self) -> Option<&Resource> {
        self.credential.as_ref()
    }

    pub fn outcome(&self) -> RecordOutcome {
        if self.halted {
            RecordOutcome::FailedAt(self.stage)
        } else if self.stage == Stage::Done {
            RecordOutcome::Done
        } else {
            RecordOutcome::InProgress(self.stage)
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome(), RecordOutcome::InProgress(_))
    }

    /// Leave `Initialized` and enter key rotation.
    pub fn begin(&mut self, execution_id: impl Into<String>) -> Transition {
        if self.stage != Stage::Initialized || self.halted {
            return self.current_transition();
        }
        self.execution_id = Some(execution_id.into());
        self.log_transition(Stage::Initialized, true);
        let transition = StateMachine::next(Stage::Initialized, true);
        if let Transition::Next(next) = transition {
            self.stage = next;
        }
        transition
    }

    /// Hold the credential allocated during key rotation.
    pub fn assign_credential(&mut self, credential: Resource) {
        self.credential = Some(credential);
    }

    /// Fold one stage result into the record and move the state machine.
    ///
    /// A result for a stage other than the current one is itself recorded as
    /// an error at the current stage; a terminal record ignores further results.
    pub fn apply(&mut self, result: StageResult) -> Transition {
        if self.is_terminal() {
            return self.current_transition();
        }

        let stage = self.stage;
        if result.stage != stage {
            self.push_error(
                stage,
                format!("result for stage {} applied at stage {stage}", result.stage),
            );
        } else {
            if let Some(artifact) = result.artifact {
                self.artifacts.insert(stage, artifact);
            }
            for message in result.errors {
                self.push_error(stage, message);
            }
        }

        let succeeded = self.all_stages_succeeded;
        self.log_transition(stage, succeeded);

        let transition = StateMachine::next(stage, succeeded);
        match transition {
            Transition::Next(next) => self.stage = next,
            Transition::Halt(_) => self.halted = true,
            Transition::Complete => self.stage = Stage::Done,
        }
        transition
    }

    /// Stop a record that was never dispatched.
    pub fn cancel(&mut self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        let stage = self.stage;
        self.push_error(stage, reason.to_string());
        self.log_transition(stage, false);
        self.halted = true;
    }

    fn log_transition(&mut self, stage: Stage, success: bool) {
        self.stage_log.push(StageLogEntry {
            stage,
            success,
            timestamp: Utc::now(),
        });
    }

    /// Set the manifest status and stamp the end time if none was set.
    pub fn finalize(&mut self) {
        self.status = if self.all_stages_succeeded && !self.has_errors() {
            ManifestStatus::Processed
        } else {
            ManifestStatus::Failed
        };
        self.finished_at.get_or_insert_with(Utc::now);
    }

    /// `"stage: message"` pairs joined by `"; "`; empty when there are no errors.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.stage, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn push_error(&mut self, stage: Stage, message: String) {
        self.errors.push(StageError {
            stage,
            message,
            timestamp: Utc::now(),
        });
        self.all_stages_succeeded = false;
    }

    fn current_transition(&self) -> Transition {
        match self.outcome() {
            RecordOutcome::Done => Transition::Complete,
            RecordOutcome::FailedAt(stage) => Transition::Halt(stage),
            RecordOutcome::InProgress(stage) => Transition::Next(stage),
        }
    }
}
