//! Hot-reloadable retrieval/generation settings and static pipeline settings.
//!
//! [`ConfigStore`] is built once at process start and handed to both pipelines as
//! `Arc<ConfigStore>`. Readers take a cheap snapshot; writers validate the merged
//! value under the same lock, so a rejected update never becomes visible.

use crate::error::ValidationError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;
use tracing::info;

pub const MAX_RETRIEVAL_TOP_K: usize = 100;
pub const MIN_CONTEXT_LENGTH: usize = 100;
pub const MAX_CONTEXT_LENGTH: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub retrieval_top_k: usize,
    pub min_chunks: usize,
    pub confidence_threshold: f64,
    pub relevance_threshold: f64,
    pub max_context_length: usize,
    pub temperature: f64,
    pub enable_fallback: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 10,
            min_chunks: 2,
            confidence_threshold: 0.7,
            relevance_threshold: 0.5,
            max_context_length: 4_000,
            temperature: 0.1,
            enable_fallback: true,
        }
    }
}

impl RagConfig {
    /// Checks every field range and the `min_chunks <= retrieval_top_k` invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_RETRIEVAL_TOP_K).contains(&self.retrieval_top_k) {
            return Err(ValidationError::new(
                "retrieval_top_k",
                format!("must be between 1 and {MAX_RETRIEVAL_TOP_K}"),
            ));
        }
        if self.min_chunks < 1 {
            return Err(ValidationError::new("min_chunks", "must be at least 1"));
        }
        check_unit_interval("confidence_threshold", self.confidence_threshold)?;
        check_unit_interval("relevance_threshold", self.relevance_threshold)?;
        if !(MIN_CONTEXT_LENGTH..=MAX_CONTEXT_LENGTH).contains(&self.max_context_length) {
            return Err(ValidationError::new(
                "max_context_length",
                format!("must be between {MIN_CONTEXT_LENGTH} and {MAX_CONTEXT_LENGTH}"),
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::new(
                "temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if self.min_chunks > self.retrieval_top_k {
            return Err(ValidationError::new(
                "min_chunks",
                format!(
                    "{} cannot be greater than retrieval_top_k {}",
                    self.min_chunks, self.retrieval_top_k
                ),
            ));
        }
        Ok(())
    }

    pub fn merged(&self, update: &RagConfigUpdate) -> Self {
        Self {
            retrieval_top_k: update.retrieval_top_k.unwrap_or(self.retrieval_top_k),
            min_chunks: update.min_chunks.unwrap_or(self.min_chunks),
            confidence_threshold: update
                .confidence_threshold
                .unwrap_or(self.confidence_threshold),
            relevance_threshold: update
                .relevance_threshold
                .unwrap_or(self.relevance_threshold),
            max_context_length: update.max_context_length.unwrap_or(self.max_context_length),
            temperature: update.temperature.unwrap_or(self.temperature),
            enable_fallback: update.enable_fallback.unwrap_or(self.enable_fallback),
        }
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(field, "must be between 0.0 and 1.0"))
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagConfigUpdate {
    pub retrieval_top_k: Option<usize>,
    pub min_chunks: Option<usize>,
    pub confidence_threshold: Option<f64>,
    pub relevance_threshold: Option<f64>,
    pub max_context_length: Option<usize>,
    pub temperature: Option<f64>,
    pub enable_fallback: Option<bool>,
}

impl RagConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<RagConfig>,
}

impl ConfigStore {
    pub fn new(initial: RagConfig) -> Result<Self, ValidationError> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(initial),
        })
    }

    pub fn get(&self) -> RagConfig {
        *self.current.read()
    }

    pub fn set(&self, update: &RagConfigUpdate) -> Result<RagConfig, ValidationError> {
        let mut current = self.current.write();
        let candidate = current.merged(update);
        candidate.validate()?;
        *current = candidate;
        info!(config = ?candidate, "rag configuration updated");
        Ok(candidate)
    }

    pub fn reset(&self) -> RagConfig {
        let defaults = RagConfig::default();
        *self.current.write() = defaults;
        info!("rag configuration reset to defaults");
        defaults
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

/// Backoff for failed ingestion attempts: `base * multiplier^(attempt - 1)`, capped.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    pub multiplier: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Process-wide settings fixed at start-up.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub chunking: ChunkingConfig,
    pub retry: RetryPolicy,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub lease_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retrieval_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub generation_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub structure_timeout: Duration,
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            lease_duration: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
            structure_timeout: Duration::from_secs(60),
            workers: 4,
        }
    }
}
