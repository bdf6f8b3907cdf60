//! Fakes shared by the unit tests.

use crate::error::GenerationError;
use crate::extractor::{ExtractedText, PageText};
use crate::llm::GenerativeModel;
use crate::sanitizer::Sanitizer;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub fn sanitizer() -> Arc<Sanitizer> {
    Arc::new(Sanitizer::new().expect("sanitizer patterns compile"))
}

pub fn book(pages: &[&str]) -> ExtractedText {
    ExtractedText::from_pages(
        pages
            .iter()
            .enumerate()
            .map(|(index, text)| PageText {
                number: index as u32 + 1,
                text: text.to_string(),
            })
            .collect(),
    )
    .expect("test book has text")
}

/// Replays canned responses in order and records every prompt it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<Value, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<Value, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn slow(delay: Duration, responses: Vec<Result<Value, GenerationError>>) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(responses)
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, prompt: &str, _temperature: f64) -> Result<Value, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Transient("script exhausted".to_string())))
    }
}
