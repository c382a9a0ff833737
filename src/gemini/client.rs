use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use super::error::GeminiError;
use super::types::{GenerateContentRequest, GenerateContentResponse};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Anything that can answer a `generateContent` request with a given API key.
///
/// The key is supplied per call because every record carries the credential
/// it was allocated by the rotator.
pub trait ContentGenerator: Send + Sync {
    fn generate(
        &self,
        api_key: &str,
        req: &GenerateContentRequest,
    ) -> impl Future<Output = Result<GenerateContentResponse, GeminiError>> + Send;

    /// Model identifier, used in error messages.
    fn model(&self) -> &str;
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// `base_url` is normally [`DEFAULT_BASE_URL`]; tests point it at a mock.
    pub fn with_base_url(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeminiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl ContentGenerator for GeminiClient {
    async fn generate(
        &self,
        api_key: &str,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(GeminiError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GeminiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<GenerateContentResponse>().await?;
        Ok(body)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Run a request and return the first candidate's text, treating a blank
/// answer as an error.
pub async fn generate_text(
    generator: &impl ContentGenerator,
    api_key: &str,
    req: &GenerateContentRequest,
) -> Result<String, GeminiError> {
    let response = generator.generate(api_key, req).await?;
    response.first_text().ok_or_else(|| GeminiError::EmptyResponse {
        model: generator.model().to_string(),
    })
}
