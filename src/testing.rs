//! Test doubles shared by the unit tests.

use std::sync::Mutex;

use crate::gemini::types::{Candidate, Content, Part};
use crate::gemini::{ContentGenerator, GeminiError, GenerateContentRequest, GenerateContentResponse};

type Responder = dyn Fn(&GenerateContentRequest) -> Result<String, GeminiError> + Send + Sync;

/// A generator that answers from a closure and records every call.
pub struct MockGenerator {
    respond: Box<Responder>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockGenerator {
    pub fn new(
        respond: impl Fn(&GenerateContentRequest) -> Result<String, GeminiError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// `(api_key, first prompt part)` per call, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

/// First text part of a request, which is always the prompt.
pub fn prompt_of(req: &GenerateContentRequest) -> String {
    req.contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .find_map(|p| match p {
            Part::Text { text } => Some(text.clone()),
            Part::InlineData { .. } => None,
        })
        .unwrap_or_default()
}

impl ContentGenerator for MockGenerator {
    async fn generate(
        &self,
        api_key: &str,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        self.calls
            .lock()
            .unwrap()
            .push((api_key.to_string(), prompt_of(req)));
        let text = (self.respond)(req)?;
        Ok(GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Some("model".into()),
                    parts: vec![Part::text(text)],
                },
                finish_reason: Some("STOP".into()),
            }],
            usage_metadata: None,
        })
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
