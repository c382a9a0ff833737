pub mod client;
pub mod error;
pub mod types;

pub use client::{ContentGenerator, DEFAULT_BASE_URL, GeminiClient, generate_text};
pub use error::GeminiError;
pub use types::{GenerateContentRequest, GenerateContentResponse};
