//! Configuration loaded from `docflow.toml`.
//!
//! [`DocflowConfig`] holds every tunable of a batch run. Fields missing from
//! the file fall back to defaults. `DOCFLOW_API_KEYS` and
//! `DOCFLOW_MAX_CONCURRENCY` take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DocflowError, Result};
use crate::gemini::DEFAULT_BASE_URL;
use crate::orchestrator::DEFAULT_MAX_CONCURRENCY;

pub const DEFAULT_CONFIG_FILE: &str = "docflow.toml";
pub const ENV_API_KEYS: &str = "DOCFLOW_API_KEYS";
pub const ENV_MAX_CONCURRENCY: &str = "DOCFLOW_MAX_CONCURRENCY";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocflowConfig {
    /// Upper bound on records processed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// CSV file with an `api_key` column.
    #[serde(default = "default_keys_csv_path")]
    pub keys_csv_path: PathBuf,

    /// Explicit key list. When set, the CSV file is not read.
    #[serde(default)]
    pub api_keys: Option<Vec<String>>,

    /// Source locators are resolved under this directory.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_error_log_dir")]
    pub error_log_dir: PathBuf,

    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub ocr_prompt_path: Option<PathBuf>,

    #[serde(default)]
    pub translation_prompt_path: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_keys_csv_path() -> PathBuf {
    PathBuf::from("./test_data/gemini_keys.csv")
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./test_data/input")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./test_data/output")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_error_log_dir() -> PathBuf {
    PathBuf::from("./test_data/output/error_logs")
}

fn default_gemini_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for DocflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            keys_csv_path: default_keys_csv_path(),
            api_keys: None,
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            log_dir: default_log_dir(),
            error_log_dir: default_error_log_dir(),
            gemini_base_url: default_gemini_base_url(),
            gemini_model: default_gemini_model(),
            request_timeout_secs: default_request_timeout_secs(),
            ocr_prompt_path: None,
            translation_prompt_path: None,
        }
    }
}

impl DocflowConfig {
    /// Load from `path`, or from `docflow.toml` in the working directory.
    ///
    /// An explicit path must exist; the default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| DocflowError::Storage {
            locator: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(keys) = lookup(ENV_API_KEYS)
            && !keys.trim().is_empty()
        {
            self.api_keys = Some(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }

        if let Some(value) = lookup(ENV_MAX_CONCURRENCY)
            && !value.trim().is_empty()
        {
            self.max_concurrency = value.trim().parse().map_err(|_| {
                DocflowError::Config(format!("{ENV_MAX_CONCURRENCY} is not a number: {value}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(DocflowError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(DocflowError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_config_values() {
        let config = DocflowConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.keys_csv_path, PathBuf::from("./test_data/gemini_keys.csv"));
        assert_eq!(config.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert!(config.api_keys.is_none());
        assert!(config.ocr_prompt_path.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_concurrency = 4
            output_dir = "/tmp/docflow-out"
            api_keys = ["k1", "k2"]
        "#;
        let config: DocflowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/docflow-out"));
        assert_eq!(config.api_keys, Some(vec!["k1".into(), "k2".into()]));
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = DocflowConfig::default();
        config
            .apply_env(env(&[
                (ENV_API_KEYS, " a , ,b "),
                (ENV_MAX_CONCURRENCY, "3"),
            ]))
            .unwrap();
        assert_eq!(config.api_keys, Some(vec!["a".into(), "b".into()]));
        assert_eq!(config.max_concurrency, 3);
    }

    #[test]
    fn bad_concurrency_env_is_an_error() {
        let mut config = DocflowConfig::default();
        let err = config
            .apply_env(env(&[(ENV_MAX_CONCURRENCY, "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = DocflowConfig {
            max_concurrency: 0,
            ..DocflowConfig::default()
        };
        assert!(matches!(config.validate(), Err(DocflowError::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = DocflowConfig::load(Some(Path::new("/nonexistent/docflow.toml"))).unwrap_err();
        assert!(matches!(err, DocflowError::Storage { .. }));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docflow.toml");
        std::fs::write(&path, "gemini_model = \"gemini-2.0-flash\"\n").unwrap();
        let config = DocflowConfig::from_file(&path).unwrap();
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
        assert_eq!(config.max_concurrency, 10);
    }
}
