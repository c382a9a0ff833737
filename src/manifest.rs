//! CSV manifest: one row per document job.
//!
//! Input columns are `fileId` and `targetLangs` (required) plus optional
//! `source`, `bookName` and `status`. The whole manifest is validated before
//! any record is built, so a bad row rejects the batch up front.

use std::path::Path;

use serde::Deserialize;

use crate::error::{DocflowError, ManifestError, Result};
use crate::state_machine::Record;

pub const OUTPUT_HEADER: [&str; 6] = [
    "fileId",
    "source",
    "targetLangs",
    "bookName",
    "status",
    "errorMessage",
];

/// Written in `targetLangs` for a record with no translation.
const NO_LANGUAGES: &str = "none";

#[derive(Debug, Deserialize)]
struct ManifestRow {
    #[serde(rename = "fileId")]
    file_id: Option<String>,
    #[serde(rename = "targetLangs")]
    target_langs: Option<String>,
    source: Option<String>,
    #[serde(rename = "bookName")]
    book_name: Option<String>,
    status: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a `targetLangs` cell. `none` means no languages; blank is an error.
pub fn parse_languages(cell: &str) -> Option<Vec<String>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if cell.eq_ignore_ascii_case(NO_LANGUAGES) {
        return Some(Vec::new());
    }
    let languages: Vec<String> = cell
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if languages.is_empty() {
        None
    } else {
        Some(languages)
    }
}

/// Parse and validate manifest bytes into records in row order.
pub fn parse_manifest(bytes: &[u8]) -> std::result::Result<Vec<Record>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let mut records = Vec::new();
    for (row, parsed) in reader.deserialize::<ManifestRow>().enumerate() {
        let parsed = parsed?;
        let file_id = non_blank(parsed.file_id).ok_or(ManifestError::MissingField {
            row,
            column: "fileId",
        })?;
        let target_languages = parsed
            .target_langs
            .as_deref()
            .and_then(parse_languages)
            .ok_or(ManifestError::MissingField {
                row,
                column: "targetLangs",
            })?;

        let mut record = Record::new(file_id, row, target_languages)
            .with_book_name(non_blank(parsed.book_name))
            .with_original_status(non_blank(parsed.status));
        if let Some(source) = non_blank(parsed.source) {
            record = record.with_source(source);
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(ManifestError::Empty);
    }
    Ok(records)
}

/// Read and validate a manifest file.
pub async fn read_manifest(path: &Path) -> std::result::Result<Vec<Record>, ManifestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ManifestError::NotFound(path.display().to_string()))?;
    parse_manifest(&bytes)
}

/// Render the write-back manifest: one row per record, in the given order.
pub fn render_manifest(records: &[Record]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(OUTPUT_HEADER)?;

    for record in records {
        let languages = if record.target_languages.is_empty() {
            NO_LANGUAGES.to_string()
        } else {
            record.target_languages.join(",")
        };
        writer.write_record([
            record.job_id.as_str(),
            record.source.as_str(),
            languages.as_str(),
            record.book_name.as_deref().unwrap_or(""),
            record.status.as_str(),
            record.error_summary().as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| DocflowError::Io(e.into_error()))
}

/// Write the manifest with final statuses and error summaries.
pub async fn write_manifest(path: &Path, records: &[Record]) -> Result<()> {
    let body = render_manifest(records)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|source| DocflowError::Storage {
            locator: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageResult;
    use crate::state_machine::Stage;

    #[test]
    fn parses_rows_in_order() {
        let csv = "fileId,source,targetLangs,bookName,status\n\
                   a1,scans/a1.pdf,\"fr, de\",Atlas,pending\n\
                   b2,,NONE,,\n";
        let records = parse_manifest(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].job_id, "a1");
        assert_eq!(records[0].source, "scans/a1.pdf");
        assert_eq!(records[0].target_languages, vec!["fr", "de"]);
        assert_eq!(records[0].book_name.as_deref(), Some("Atlas"));
        assert_eq!(records[0].original_status.as_deref(), Some("pending"));

        assert_eq!(records[1].row_index, 1);
        assert_eq!(records[1].source, "b2");
        assert!(records[1].target_languages.is_empty());
        assert_eq!(records[1].book_name, None);
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let records = parse_manifest(b"fileId,targetLangs\nx,es\n").unwrap();
        assert_eq!(records[0].source, "x");
        assert_eq!(records[0].target_languages, vec!["es"]);
    }

    #[test]
    fn reports_first_row_missing_languages() {
        let csv = "fileId,targetLangs\na,fr\nb,\nc,\n";
        let err = parse_manifest(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                row: 1,
                column: "targetLangs"
            }
        ));
    }

    #[test]
    fn missing_file_id_rejects_batch() {
        let csv = "fileId,targetLangs\na,fr\nb,de\n  ,it\n";
        let err = parse_manifest(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                row: 2,
                column: "fileId"
            }
        ));
    }

    #[test]
    fn missing_required_column_is_reported_on_first_row() {
        let err = parse_manifest(b"fileId,bookName\na,Atlas\n").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                row: 0,
                column: "targetLangs"
            }
        ));
    }

    #[test]
    fn header_only_manifest_is_empty() {
        let err = parse_manifest(b"fileId,targetLangs\n").unwrap_err();
        assert!(matches!(err, ManifestError::Empty));
    }

    #[test]
    fn language_cells() {
        assert_eq!(parse_languages("none"), Some(vec![]));
        assert_eq!(parse_languages(" fr ,, de "), Some(vec!["fr".into(), "de".into()]));
        assert_eq!(parse_languages(" , "), None);
        assert_eq!(parse_languages(""), None);
    }

    #[tokio::test]
    async fn missing_manifest_file() {
        let err = read_manifest(Path::new("/nonexistent/manifest.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[tokio::test]
    async fn write_back_has_status_and_errors() {
        let mut ok = Record::new("a", 0, vec!["fr".into(), "de".into()])
            .with_book_name(Some("Atlas".into()));
        ok.begin("e");
        for stage in [
            Stage::ResourceAcquisition,
            Stage::Extraction,
            Stage::Translation,
            Stage::Structuring,
            Stage::Persistence,
        ] {
            ok.apply(StageResult::success(stage, None));
        }
        ok.finalize();

        let mut failed = Record::new("b", 1, vec![]);
        failed.begin("e");
        failed.apply(StageResult::failure(
            Stage::ResourceAcquisition,
            "no resource available",
        ));
        failed.finalize();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/manifest.csv");
        write_manifest(&path, &[ok, failed]).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "fileId,source,targetLangs,bookName,status,errorMessage");
        assert_eq!(lines[1], "a,a,\"fr,de\",Atlas,processed,");
        assert_eq!(
            lines[2],
            "b,b,none,,failed,Key Rotation: no resource available"
        );

        // The written manifest reads back as valid input.
        let reread = parse_manifest(written.as_bytes()).unwrap();
        assert_eq!(reread[0].target_languages, vec!["fr", "de"]);
        assert_eq!(reread[1].original_status.as_deref(), Some("failed"));
    }
}
