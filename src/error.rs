use thiserror::Error;

pub use crate::gemini::GeminiError;

#[derive(Debug, Error)]
pub enum DocflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Storage error ({locator}): {source}")]
    Storage {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing stage input: {0}")]
    MissingInput(&'static str),

    #[error("Key source error: {0}")]
    KeySource(String),

    #[error("Batch incomplete: expected {expected} record completions, got {completed}")]
    BatchIncomplete { expected: usize, completed: usize },

    #[error("Record at row {index} completed more than once")]
    DuplicateCompletion { index: usize },

    #[error("Completion for unknown row {index} in a batch of {total}")]
    UnknownCompletion { index: usize, total: usize },

    #[error("Gemini API error: {0}")]
    Gemini(#[from] GeminiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Manifest problems. Any of these rejects the whole batch before dispatch.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("manifest is empty or could not be read")]
    Empty,

    #[error("row {row}: required column missing or empty: {column}")]
    MissingField { row: usize, column: &'static str },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] csv::Error),
}

pub type Result<T, E = DocflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_display() {
        let err = ManifestError::MissingField {
            row: 3,
            column: "targetLangs",
        };
        assert_eq!(
            err.to_string(),
            "row 3: required column missing or empty: targetLangs"
        );
    }

    #[test]
    fn manifest_error_wraps_into_docflow_error() {
        let err: DocflowError = ManifestError::Empty.into();
        assert_eq!(
            err.to_string(),
            "Manifest error: manifest is empty or could not be read"
        );
    }

    #[test]
    fn batch_incomplete_display() {
        let err = DocflowError::BatchIncomplete {
            expected: 5,
            completed: 4,
        };
        assert_eq!(
            err.to_string(),
            "Batch incomplete: expected 5 record completions, got 4"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DocflowError>();
    }
}
