use serde::{Deserialize, Serialize};

use crate::state_machine::{Record, RecordOutcome, Stage};

/// One failed record in a batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub row_index: usize,
    pub job_id: String,
    pub failed_stage: Stage,
    pub message: String,
}

/// Totals for a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Builds a [`BatchSummary`] from finished records. Pure: the same records
/// always give the same summary.
pub struct CompletionReporter;

impl CompletionReporter {
    pub fn summarize(records: &[Record]) -> BatchSummary {
        let mut summary = BatchSummary {
            total: records.len(),
            ..BatchSummary::default()
        };

        for record in records {
            let succeeded = record.outcome() == RecordOutcome::Done && !record.has_errors();
            if succeeded {
                summary.succeeded += 1;
                continue;
            }
            summary.failed += 1;
            let failed_stage = match record.outcome() {
                RecordOutcome::FailedAt(stage) | RecordOutcome::InProgress(stage) => stage,
                RecordOutcome::Done => record
                    .errors()
                    .first()
                    .map(|e| e.stage)
                    .unwrap_or(Stage::Done),
            };
            summary.failures.push(RecordFailure {
                row_index: record.row_index,
                job_id: record.job_id.clone(),
                failed_stage,
                message: record.error_summary(),
            });
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageResult;

    fn done(id: &str, row: usize) -> Record {
        let mut record = Record::new(id, row, vec![]);
        record.begin("exec");
        for stage in [
            Stage::ResourceAcquisition,
            Stage::Extraction,
            Stage::Translation,
            Stage::Structuring,
            Stage::Persistence,
        ] {
            record.apply(StageResult::success(stage, None));
        }
        record
    }

    fn failed_at(id: &str, row: usize, stage: Stage) -> Record {
        let mut record = Record::new(id, row, vec![]);
        record.begin("exec");
        for s in [Stage::ResourceAcquisition, Stage::Extraction, Stage::Translation]
            .into_iter()
            .take_while(|s| *s != stage)
        {
            record.apply(StageResult::success(s, None));
        }
        record.apply(StageResult::failure(stage, "it broke"));
        record
    }

    #[test]
    fn counts_and_failures() {
        let records = vec![
            done("a", 0),
            failed_at("b", 1, Stage::Extraction),
            done("c", 2),
            failed_at("d", 3, Stage::ResourceAcquisition),
        ];
        let summary = CompletionReporter::summarize(&records);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert!(!summary.all_succeeded());
        assert_eq!(
            summary.failures,
            vec![
                RecordFailure {
                    row_index: 1,
                    job_id: "b".into(),
                    failed_stage: Stage::Extraction,
                    message: "Extraction: it broke".into(),
                },
                RecordFailure {
                    row_index: 3,
                    job_id: "d".into(),
                    failed_stage: Stage::ResourceAcquisition,
                    message: "Key Rotation: it broke".into(),
                },
            ]
        );
    }

    #[test]
    fn summarize_is_idempotent() {
        let records = vec![done("a", 0), failed_at("b", 1, Stage::Translation)];
        assert_eq!(
            CompletionReporter::summarize(&records),
            CompletionReporter::summarize(&records)
        );
    }

    #[test]
    fn empty_batch() {
        let summary = CompletionReporter::summarize(&[]);
        assert_eq!(summary, BatchSummary::default());
        assert!(summary.all_succeeded());
    }

    #[test]
    fn serializes_camel_case() {
        let summary = CompletionReporter::summarize(&[failed_at("x", 5, Stage::Extraction)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failures"][0]["rowIndex"], 5);
        assert_eq!(json["failures"][0]["failedStage"], "Extraction");
    }
}
