mod record;
mod stage;

pub use record::{
    Artifact, Artifacts, ManifestStatus, Record, RecordOutcome, StageError, StageLogEntry,
};
pub use stage::{Stage, StateMachine, Transition};
