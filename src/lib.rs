//! Batch document processing: every manifest row runs through key rotation,
//! extraction, translation, structuring and persistence, with bounded
//! concurrency and a round-robin pool of API keys.

pub mod config;
pub mod error;
pub mod gemini;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod report;
pub mod rotation;
pub mod stages;
pub mod state_machine;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{DocflowError, ManifestError, Result};
pub use orchestrator::{BatchCoordinator, BatchJob, CompletionBarrier};
pub use report::{BatchSummary, CompletionReporter, RecordFailure};
pub use rotation::{Resource, ResourceRotator, ResourceSource};
pub use stages::{StageExecutor, StageInputs, StagePlan, StageResult};
pub use state_machine::{Record, Stage};
