//! Quality gates. A failed gate is a designed outcome, not an error.

use crate::config::RagConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Retrieval,
    Generation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateReason {
    TooFewCandidates { found: usize, required: usize },
    RetrievalTimeout,
    LowConfidence { confidence: f64, threshold: f64 },
    /// The model failed or its output could not be grounded.
    GenerationFailed,
    GenerationTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub gate: Gate,
    pub reason: GateReason,
}

impl GateFailure {
    pub fn retrieval(reason: GateReason) -> Self {
        Self {
            gate: Gate::Retrieval,
            reason,
        }
    }

    pub fn generation(reason: GateReason) -> Self {
        Self {
            gate: Gate::Generation,
            reason,
        }
    }
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            GateReason::TooFewCandidates { found, required } => {
                write!(f, "retrieval found {found} relevant passages, {required} required")
            }
            GateReason::RetrievalTimeout => f.write_str("retrieval timed out"),
            GateReason::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "answer confidence {confidence:.2} below {threshold:.2}"),
            GateReason::GenerationFailed => f.write_str("answer generation failed"),
            GateReason::GenerationTimeout => f.write_str("answer generation timed out"),
        }
    }
}

pub struct GateEvaluator;

impl GateEvaluator {
    pub fn retrieval(config: &RagConfig, candidates: usize) -> Result<(), GateFailure> {
        if candidates >= config.min_chunks {
            Ok(())
        } else {
            Err(GateFailure::retrieval(GateReason::TooFewCandidates {
                found: candidates,
                required: config.min_chunks,
            }))
        }
    }

    pub fn generation(config: &RagConfig, confidence: f64) -> Result<(), GateFailure> {
        if confidence >= config.confidence_threshold {
            Ok(())
        } else {
            Err(GateFailure::generation(GateReason::LowConfidence {
                confidence,
                threshold: config.confidence_threshold,
            }))
        }
    }
}
