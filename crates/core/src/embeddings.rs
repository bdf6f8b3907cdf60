use crate::models::Chunk;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("nothing to embed")]
    EmptyInput,

    #[error("expected {expected} dimensions, got {actual}")]
    Dimensions { expected: usize, actual: usize },
}

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic character-trigram hashing embedder (FNV-1a into fixed buckets).
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lowered = text.trim().to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        if chars.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0f32; self.dimensions.max(1)];
        let mut hash_window = |window: &[char]| {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        };

        if chars.len() < 3 {
            hash_window(&chars[..]);
        } else {
            chars.windows(3).for_each(&mut hash_window);
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingReport {
    pub embedded: usize,
    pub skipped: usize,
}

/// Attaches vectors in place. A chunk whose embedding fails stays lexical-only.
pub fn embed_chunks(embedder: &dyn Embedder, chunks: &mut [Chunk]) -> EmbeddingReport {
    let mut report = EmbeddingReport::default();
    let expected = embedder.dimensions();

    for chunk in chunks.iter_mut() {
        let outcome = embedder.embed(&chunk.text).and_then(|vector| {
            if vector.len() == expected {
                Ok(vector)
            } else {
                Err(EmbeddingError::Dimensions {
                    expected,
                    actual: vector.len(),
                })
            }
        });

        match outcome {
            Ok(vector) => {
                chunk.embedding = Some(vector);
                report.embedded += 1;
            }
            Err(error) => {
                warn!(chunk_id = %chunk.id(), error = %error, "chunk left without embedding");
                chunk.embedding = None;
                report.skipped += 1;
            }
        }
    }

    report
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let (mut dot, mut left_norm, mut right_norm) = (0f64, 0f64, 0f64);
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm.sqrt() * right_norm.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u32, text: &str) -> Chunk {
        Chunk {
            document_id: "doc-1".to_string(),
            order_index: index,
            page_number: 1,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            embedding: None,
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").expect("embeds");
        let second = embedder.embed("Hydraulic pressure and flow").expect("embeds");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("ab").expect("short input embeds").len(), 32);
        assert_eq!(embedder.embed("   "), Err(EmbeddingError::EmptyInput));
    }

    #[test]
    fn similar_text_scores_higher_than_unrelated_text() {
        let embedder = CharacterNgramEmbedder::default();
        let query = embedder.embed("hydraulic pressure").expect("embeds");
        let near = embedder.embed("pressure in hydraulic systems").expect("embeds");
        let far = embedder.embed("medieval poetry anthology").expect("embeds");
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    struct Wrong;

    impl Embedder for Wrong {
        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("bad") {
                Ok(vec![1.0; 3])
            } else {
                Ok(vec![1.0; 8])
            }
        }
    }

    #[test]
    fn failed_embeddings_leave_chunks_lexical_only() {
        let mut chunks = vec![chunk(0, "good"), chunk(1, "bad"), chunk(2, " ")];
        let report = embed_chunks(&CharacterNgramEmbedder { dimensions: 8 }, &mut chunks);
        assert_eq!(report, EmbeddingReport { embedded: 2, skipped: 1 });
        assert!(chunks[2].embedding.is_none());

        let report = embed_chunks(&Wrong, &mut chunks);
        assert_eq!(report.skipped, 1);
        assert!(chunks[1].embedding.is_none());
        assert!(chunks[0].embedding.is_some());
    }
}
