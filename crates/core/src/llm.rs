use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A text generator constrained to answer with one JSON document.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<Value, GenerationError>;
}

/// Ollama `/api/generate` in non-streaming JSON mode.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaModel {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint, model)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl GenerativeModel for OllamaModel {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<Value, GenerationError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
                "options": { "temperature": temperature },
            }))
            .send()
            .await
            .map_err(|error| GenerationError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            let message = format!("ollama returned {status}: {details}");
            return Err(
                if status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::NOT_FOUND
                {
                    GenerationError::Transient(message)
                } else {
                    GenerationError::Malformed(message)
                },
            );
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| GenerationError::Malformed(error.to_string()))?;
        let text = body
            .pointer("/response")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerationError::Malformed("ollama response lacks text".to_string()))?;

        debug!(model = %self.model, chars = text.len(), "model responded");
        parse_model_json(text)
    }
}

/// What a model is asked to do. Each role can be served by a different model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    /// Turns raw table-of-contents and index pages into JSON structure.
    DocumentParser,
    /// Writes cited answers from retrieved passages.
    AnswerGenerator,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DocumentParser => "document_parser",
            Self::AnswerGenerator => "answer_generator",
        })
    }
}

/// Maps each [`ModelRole`] to a model, with an optional fallback tried on transient failures.
#[derive(Clone)]
pub struct ModelRouter {
    parser: Arc<dyn GenerativeModel>,
    generator: Arc<dyn GenerativeModel>,
    fallback: Option<Arc<dyn GenerativeModel>>,
}

impl ModelRouter {
    pub fn new(parser: Arc<dyn GenerativeModel>, generator: Arc<dyn GenerativeModel>) -> Self {
        Self {
            parser,
            generator,
            fallback: None,
        }
    }

    /// One model serving both roles.
    pub fn single(model: Arc<dyn GenerativeModel>) -> Self {
        Self::new(model.clone(), model)
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn GenerativeModel>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn model_for(&self, role: ModelRole) -> Arc<dyn GenerativeModel> {
        let primary = match role {
            ModelRole::DocumentParser => self.parser.clone(),
            ModelRole::AnswerGenerator => self.generator.clone(),
        };
        match &self.fallback {
            Some(fallback) => Arc::new(RoutedModel {
                role,
                primary,
                fallback: fallback.clone(),
            }),
            None => primary,
        }
    }
}

struct RoutedModel {
    role: ModelRole,
    primary: Arc<dyn GenerativeModel>,
    fallback: Arc<dyn GenerativeModel>,
}

#[async_trait]
impl GenerativeModel for RoutedModel {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<Value, GenerationError> {
        match self.primary.generate(prompt, temperature).await {
            Err(GenerationError::Transient(reason)) => {
                warn!(role = %self.role, reason = %reason, "primary model unavailable, using fallback");
                self.fallback.generate(prompt, temperature).await
            }
            other => other,
        }
    }
}

/// Accepts bare JSON, JSON inside a code fence, or JSON surrounded by prose.
pub fn parse_model_json(raw: &str) -> Result<Value, GenerationError> {
    let trimmed = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    if let (Some(open), Some(close)) = (open, close) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(GenerationError::Malformed(format!(
        "expected a JSON document, got: {preview}"
    )))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
