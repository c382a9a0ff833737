//! Request and response bodies for the `models/{model}:generateContent` endpoint.
//!
//! Only the parts the pipeline uses are modelled: text parts, inline binary
//! parts (base64) for document extraction, and the first candidate's text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Body of a `generateContent` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// A single-turn request with a text prompt followed by `body` as plain text.
    pub fn text(prompt: &str, body: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text(prompt), Part::text(body)],
            }],
        }
    }

    /// A single-turn request with a text prompt and one inline document.
    pub fn with_document(prompt: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text(prompt), Part::inline(mime_type, bytes)],
            }],
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part. The API distinguishes variants by which key is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline(mime_type: &str, bytes: &[u8]) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.to_string(),
                data: STANDARD.encode(bytes),
            },
        }
    }
}

/// Base64 payload plus its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Response of a `generateContent` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, if any non-blank text exists.
    pub fn first_text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token accounting reported by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}
