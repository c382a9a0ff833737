//! Error types for the Gemini client.
//!
//! [`GeminiError`] covers rate limiting, non-success HTTP statuses, transport
//! failures and responses that carry no usable text.

use thiserror::Error;

/// Errors that can occur while calling the generative-content API.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// The server answered HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success status, with the response body as message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response parsed but contained no candidate text.
    #[error("empty response from model {model}")]
    EmptyResponse { model: String },

    /// Transport-level failure (DNS, refused connection, timeout, bad JSON body).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = GeminiError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn api_error_display() {
        let err = GeminiError::ApiError {
            status: 403,
            message: "API key not valid".into(),
        };
        assert_eq!(err.to_string(), "API error (status 403): API key not valid");
    }

    #[test]
    fn empty_response_display() {
        let err = GeminiError::EmptyResponse {
            model: "gemini-1.5-flash".into(),
        };
        assert_eq!(err.to_string(), "empty response from model gemini-1.5-flash");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GeminiError>();
    }
}
