use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{DocflowError, Result};

/// A fetched source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Where source documents come from and stage exports go.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Document>;

    /// Store `contents` under `name` and return the stored location.
    async fn put(&self, name: &str, contents: &[u8]) -> Result<String>;
}

/// Filesystem store: reads from `input_dir`, writes exports to `output_dir`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl LocalStore {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.input_dir.join(path)
        }
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn fetch(&self, locator: &str) -> Result<Document> {
        let path = self.resolve(locator);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| DocflowError::Storage {
                locator: path.display().to_string(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| locator.to_string());
        Ok(Document {
            mime_type: mime_type_for(&path).to_string(),
            name,
            bytes,
        })
    }

    async fn put(&self, name: &str, contents: &[u8]) -> Result<String> {
        let storage_err = |path: &Path, source| DocflowError::Storage {
            locator: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| storage_err(&self.output_dir, e))?;
        let path = self.output_dir.join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| storage_err(&path, e))?;
        Ok(path.display().to_string())
    }
}

/// MIME type from the file extension; unknown types are sent as raw bytes.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Job id made safe for file names: anything not ASCII alphanumeric becomes `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
