use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stages, in strict forward order.
///
/// Each record flows through:
/// INITIALIZED → KEY ROTATION → EXTRACTION → TRANSLATION → STRUCTURING → PERSISTENCE → DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Initialized,
    ResourceAcquisition,
    Extraction,
    Translation,
    Structuring,
    Persistence,
    Done,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Initialized,
        Stage::ResourceAcquisition,
        Stage::Extraction,
        Stage::Translation,
        Stage::Structuring,
        Stage::Persistence,
        Stage::Done,
    ];

    /// The stage that follows this one on the success path. `Done` has none.
    pub fn successor(self) -> Option<Stage> {
        match self {
            Stage::Initialized => Some(Stage::ResourceAcquisition),
            Stage::ResourceAcquisition => Some(Stage::Extraction),
            Stage::Extraction => Some(Stage::Translation),
            Stage::Translation => Some(Stage::Structuring),
            Stage::Structuring => Some(Stage::Persistence),
            Stage::Persistence => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Stages that do work (everything but the two bookends).
    pub fn is_working(self) -> bool {
        !matches!(self, Stage::Initialized | Stage::Done)
    }

    /// Name used in error lists, log files and the manifest's error column.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Initialized => "Initialized",
            Stage::ResourceAcquisition => "Key Rotation",
            Stage::Extraction => "Extraction",
            Stage::Translation => "Translation",
            Stage::Structuring => "Structuring",
            Stage::Persistence => "Persistence",
            Stage::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of evaluating a stage outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Advance to the next working stage.
    Next(Stage),
    /// The stage failed; the record stops here.
    Halt(Stage),
    /// The last stage succeeded; the record is done.
    Complete,
}

/// Single "next stage or stop" rule for the pipeline.
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition out of `current` given whether it succeeded.
    ///
    /// - Success advances to [`Stage::successor`]; reaching `Done` is `Complete`.
    /// - Failure halts at `current`. Stages are never retried or re-entered.
    /// - `Done` is terminal and always returns `Complete`.
    pub fn next(current: Stage, succeeded: bool) -> Transition {
        match (current, succeeded) {
            (Stage::Done, _) => Transition::Complete,
            (stage, false) => Transition::Halt(stage),
            (stage, true) => match stage.successor() {
                Some(Stage::Done) | None => Transition::Complete,
                Some(next) => Transition::Next(next),
            },
        }
    }
}
