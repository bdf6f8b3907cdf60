//! Citation-grounded answer generation over retrieved passages.

use crate::config::RagConfig;
use crate::error::{AnswerError, GenerationError};
use crate::llm::GenerativeModel;
use crate::models::{ChunkId, Claim, GroundedAnswer, RetrievedChunk};
use crate::sanitizer::{SanitizeContext, Sanitizer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BLOCK_SEPARATOR: &str = "\n\n";

/// Sanitized passages that fit the context budget, keyed for citation checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedContext {
    pub text: String,
    pub pages: HashMap<ChunkId, u32>,
}

impl PreparedContext {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    answer_summary: String,
    #[serde(default)]
    claims: Vec<RawClaim>,
    confidence_score: f64,
}

#[derive(Debug, Deserialize)]
struct RawClaim {
    text: String,
    source_chunk_id: String,
    page_number: u32,
}

pub struct Answerer {
    model: Arc<dyn GenerativeModel>,
    sanitizer: Arc<Sanitizer>,
    timeout: Duration,
}

impl Answerer {
    pub fn new(model: Arc<dyn GenerativeModel>, sanitizer: Arc<Sanitizer>, timeout: Duration) -> Self {
        Self {
            model,
            sanitizer,
            timeout,
        }
    }

    /// Packs candidates in rank order until `max_len` bytes; the first one is cut to fit if needed.
    pub fn build_context(&self, candidates: &[RetrievedChunk], max_len: usize) -> PreparedContext {
        let mut context = PreparedContext::default();

        for candidate in candidates {
            let sanitized = self.sanitizer.sanitize(&candidate.text, SanitizeContext::General);
            sanitized.log("context");
            if sanitized.cleaned.is_empty() {
                continue;
            }

            let header = format!(
                "[source_chunk_id={} page={}]\n",
                candidate.chunk_id, candidate.page_number
            );
            let separator = if context.text.is_empty() { "" } else { BLOCK_SEPARATOR };
            let room = max_len.saturating_sub(context.text.len() + separator.len() + header.len());

            let body = if sanitized.cleaned.len() <= room {
                sanitized.cleaned.as_str()
            } else if context.is_empty() && room > 0 {
                truncate_at_char(&sanitized.cleaned, room)
            } else {
                break;
            };

            context.text.push_str(separator);
            context.text.push_str(&header);
            context.text.push_str(body);
            context
                .pages
                .insert(candidate.chunk_id.clone(), candidate.page_number);
        }

        context
    }

    pub async fn answer(
        &self,
        question: &str,
        candidates: &[RetrievedChunk],
        config: &RagConfig,
    ) -> Result<GroundedAnswer, AnswerError> {
        let question = self.sanitizer.sanitize(question, SanitizeContext::General);
        question.log("question");

        let context = self.build_context(candidates, config.max_context_length);
        if context.is_empty() {
            return Err(AnswerError::EmptyContext);
        }
        debug!(
            passages = context.pages.len(),
            context_len = context.text.len(),
            "context assembled"
        );

        let prompt = answer_prompt(&question.cleaned, &context.text);
        let value = tokio::time::timeout(self.timeout, self.model.generate(&prompt, config.temperature))
            .await
            .map_err(|_| AnswerError::Timeout)??;

        let answer = ground(value, &context)?;
        info!(
            claims = answer.claims.len(),
            confidence = answer.confidence,
            "answer generated"
        );
        Ok(answer)
    }
}

/// Validates model output and binds each claim to a passage that was actually shown.
pub fn ground(value: Value, context: &PreparedContext) -> Result<GroundedAnswer, AnswerError> {
    let raw: RawAnswer = serde_json::from_value(value)
        .map_err(|error| GenerationError::Malformed(format!("answer shape: {error}")))?;

    if !raw.confidence_score.is_finite() || !(0.0..=1.0).contains(&raw.confidence_score) {
        return Err(GenerationError::Malformed(format!(
            "confidence_score {} outside [0, 1]",
            raw.confidence_score
        ))
        .into());
    }
    if raw.claims.is_empty() {
        return Err(AnswerError::Ungrounded);
    }

    let mut claims = Vec::with_capacity(raw.claims.len());
    for (position, claim) in raw.claims.into_iter().enumerate() {
        let unresolved = || AnswerError::UnresolvedCitation {
            claim: position,
            source_ref: claim.source_chunk_id.clone(),
        };
        let source: ChunkId = claim.source_chunk_id.trim().parse().map_err(|_| unresolved())?;
        match context.pages.get(&source) {
            Some(page) if *page == claim.page_number => {}
            _ => return Err(unresolved()),
        }
        claims.push(Claim {
            text: claim.text,
            source,
            page_number: claim.page_number,
        });
    }

    Ok(GroundedAnswer {
        summary: raw.answer_summary,
        claims,
        confidence: raw.confidence_score,
    })
}

fn truncate_at_char(text: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the passages below. Each passage starts with its \
         source_chunk_id and page.\n\
         Respond with one JSON object:\n\
         {{\"answer_summary\": string, \"claims\": [{{\"text\": string, \"source_chunk_id\": string, \
         \"page_number\": integer}}], \"confidence_score\": number between 0 and 1}}\n\
         Every claim must cite the passage that supports it. If the passages do not answer the \
         question, return no claims and a confidence_score of 0.\n\n\
         Passages:\n{context}\n\nQuestion: {question}\n"
    )
}
