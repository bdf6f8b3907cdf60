//! Hybrid retrieval: lexical and vector search fused by weighted reciprocal rank.

use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::{ChunkHit, ChunkId, RetrievedChunk, SearchFilter};
use crate::stores::memory::tokenize;
use crate::traits::{KeywordIndex, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const RRF_K: f64 = 60.0;

/// Question words that carry no topic and never count towards term coverage.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does", "for", "from", "had", "has",
    "have", "how", "i", "in", "is", "it", "its", "of", "on", "or", "that", "the", "their", "this", "to", "was",
    "were", "what", "when", "where", "which", "who", "whom", "why", "will", "with",
];

/// Per-list weights. A chunk that is fully relevant and first in every list scores `lexical + vector`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub k: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
            k: RRF_K,
        }
    }
}

pub struct HybridRetriever {
    keyword: Arc<dyn KeywordIndex>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    weights: FusionWeights,
    timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        keyword: Arc<dyn KeywordIndex>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        timeout: Duration,
    ) -> Self {
        Self {
            keyword,
            vectors,
            embedder,
            weights: FusionWeights::default(),
            timeout,
        }
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Fused candidates scoring at least `relevance_threshold`, best first, at most `top_k`.
    pub async fn retrieve(
        &self,
        question: &str,
        filter: &SearchFilter,
        top_k: usize,
        relevance_threshold: f64,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let searches = async {
            let lexical = self.keyword.search_keyword(question, top_k, filter);
            let vector = async {
                match self.embedder.embed(question) {
                    Ok(query_vector) => self.vectors.search_vector(&query_vector, top_k, filter).await,
                    Err(error) => {
                        debug!(error = %error, "question not embeddable, lexical search only");
                        Ok(Vec::new())
                    }
                }
            };
            tokio::join!(lexical, vector)
        };

        let (lexical, vector) = tokio::time::timeout(self.timeout, searches)
            .await
            .map_err(|_| RetrievalError::Timeout)?;

        let (lexical, vector) = match (lexical, vector) {
            (Ok(lexical), Ok(vector)) => (lexical, vector),
            (Ok(lexical), Err(error)) => {
                warn!(error = %error, "vector search failed, using lexical results only");
                (lexical, Vec::new())
            }
            (Err(error), Ok(vector)) => {
                warn!(error = %error, "lexical search failed, using vector results only");
                (Vec::new(), vector)
            }
            (Err(error), Err(_)) => return Err(error.into()),
        };

        let terms = query_terms(question);
        let lexical: Vec<ChunkHit> = lexical
            .into_iter()
            .map(|mut hit| {
                hit.score = term_coverage(&terms, &hit.text);
                hit
            })
            .collect();
        let vector: Vec<ChunkHit> = vector
            .into_iter()
            .map(|mut hit| {
                hit.score = unit_interval(hit.score);
                hit
            })
            .collect();

        let fused = fuse(&lexical, &vector, self.weights);
        let total = fused.len();
        let mut kept: Vec<RetrievedChunk> = fused
            .into_iter()
            .filter(|candidate| candidate.score >= relevance_threshold)
            .collect();
        kept.truncate(top_k);

        debug!(
            lexical = lexical.len(),
            vector = vector.len(),
            fused = total,
            kept = kept.len(),
            relevance_threshold,
            "hybrid retrieval finished"
        );
        Ok(kept)
    }
}

/// Weighted RRF scaled by relevance: `w * s * (k + 1) / (k + rank)` summed over the lists a
/// chunk appears in, where `s` is the hit's own score clamped to `[0, 1]`.
/// Repeats of a chunk inside one list only count at their best rank.
pub fn fuse(lexical: &[ChunkHit], vector: &[ChunkHit], weights: FusionWeights) -> Vec<RetrievedChunk> {
    let mut fused: HashMap<ChunkId, RetrievedChunk> = HashMap::new();

    for (rank, hit) in unique_ranks(lexical) {
        let entry = fused.entry(hit.chunk_id.clone()).or_insert_with(|| empty(hit));
        entry.lexical_rank = Some(rank);
        entry.score += rank_score(weights.lexical, weights.k, rank) * unit_interval(hit.score);
    }
    for (rank, hit) in unique_ranks(vector) {
        let entry = fused.entry(hit.chunk_id.clone()).or_insert_with(|| empty(hit));
        entry.vector_rank = Some(rank);
        entry.score += rank_score(weights.vector, weights.k, rank) * unit_interval(hit.score);
    }

    let mut ordered: Vec<RetrievedChunk> = fused.into_values().collect();
    ordered.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    ordered
}

fn unique_ranks(hits: &[ChunkHit]) -> impl Iterator<Item = (usize, &ChunkHit)> {
    let mut seen = std::collections::HashSet::new();
    hits.iter()
        .filter(move |hit| seen.insert(hit.chunk_id.clone()))
        .enumerate()
        .map(|(position, hit)| (position + 1, hit))
}

fn rank_score(weight: f64, k: f64, rank: usize) -> f64 {
    weight * (k + 1.0) / (k + rank as f64)
}

fn unit_interval(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Distinct lowercase terms of a question, stopwords removed unless nothing else is left.
pub fn query_terms(question: &str) -> Vec<String> {
    let mut all = tokenize(question);
    all.sort();
    all.dedup();
    let content: Vec<String> = all
        .iter()
        .filter(|term| !STOPWORDS.contains(&term.as_str()))
        .cloned()
        .collect();
    if content.is_empty() {
        all
    } else {
        content
    }
}

/// Share of `terms` found in `text`. Inflected forms ("pull"/"pulls") count as found.
pub fn term_coverage(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens = tokenize(text);
    let found = terms
        .iter()
        .filter(|term| tokens.iter().any(|token| same_stem(term, token)))
        .count();
    found as f64 / terms.len() as f64
}

fn same_stem(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    let (shorter, longer) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    let short_chars = shorter.chars().count();
    short_chars >= 3 && longer.starts_with(shorter) && longer.chars().count() - short_chars <= 2
}

fn empty(hit: &ChunkHit) -> RetrievedChunk {
    RetrievedChunk {
        chunk_id: hit.chunk_id.clone(),
        page_number: hit.page_number,
        text: hit.text.clone(),
        score: 0.0,
        lexical_rank: None,
        vector_rank: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, EmbeddingError};
    use crate::error::StoreError;
    use crate::models::{Chunk, SearchMode};
    use crate::stores::{MemoryKeywordIndex, MemoryVectorIndex};
    use crate::traits::VectorRecord;
    use async_trait::async_trait;

    fn hit(document_id: &str, index: u32) -> ChunkHit {
        ChunkHit {
            chunk_id: ChunkId::new(document_id, index),
            page_number: index + 1,
            text: format!("chunk {index}"),
            score: 1.0,
        }
    }

    #[test]
    fn top_of_both_lists_scores_one() {
        let fused = fuse(&[hit("d", 0), hit("d", 1)], &[hit("d", 0)], FusionWeights::default());
        assert_eq!(fused[0].chunk_id, ChunkId::new("d", 0));
        assert!((fused[0].score - 1.0).abs() < 1e-12);
        assert_eq!(fused[0].modes(), vec![SearchMode::Lexical, SearchMode::Vector]);

        let second = &fused[1];
        assert_eq!(second.lexical_rank, Some(2));
        assert_eq!(second.vector_rank, None);
        assert!((second.score - 0.5 * 61.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn weak_relevance_scales_a_first_place_down() {
        let mut weak = hit("d", 0);
        weak.score = 0.2;
        let mut overflowing = hit("d", 1);
        overflowing.score = 7.0;
        let fused = fuse(&[weak], &[overflowing], FusionWeights::default());
        assert_eq!(fused[0].chunk_id, ChunkId::new("d", 1));
        assert!((fused[0].score - 0.5).abs() < 1e-12);
        assert!((fused[1].score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn coverage_counts_content_terms_and_inflections() {
        let terms = query_terms("How does photosynthesis use light?");
        assert_eq!(terms, vec!["light", "photosynthesis", "use"]);
        assert_eq!(term_coverage(&terms, "Photosynthesis uses light to make sugar."), 1.0);
        assert!((term_coverage(&terms, "Light bends in water.") - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(term_coverage(&terms, "Roots absorb water."), 0.0);
        assert_eq!(query_terms("Who is it?"), vec!["is", "it", "who"]);
    }

    #[test]
    fn duplicates_within_a_list_count_once() {
        let fused = fuse(&[hit("d", 3), hit("d", 3), hit("d", 4)], &[], FusionWeights::default());
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[1].lexical_rank, Some(2));
    }

    #[test]
    fn agreement_outranks_a_single_first_place() {
        let fused = fuse(
            &[hit("d", 9), hit("d", 1)],
            &[hit("d", 2), hit("d", 1)],
            FusionWeights::default(),
        );
        assert_eq!(fused[0].chunk_id, ChunkId::new("d", 1));
    }

    fn chunk(document_id: &str, index: u32, text: &str) -> Chunk {
        Chunk {
            document_id: document_id.to_string(),
            order_index: index,
            page_number: index + 1,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            embedding: None,
        }
    }

    async fn seeded() -> (Arc<MemoryKeywordIndex>, Arc<MemoryVectorIndex>) {
        let embedder = CharacterNgramEmbedder::default();
        let keyword = Arc::new(MemoryKeywordIndex::default());
        let vectors = Arc::new(MemoryVectorIndex::default());
        for (document_id, texts) in [
            ("geo", vec!["volcanic basalt forms from lava", "sandstone forms from sand"]),
            ("bio", vec!["basalt islands host unusual birds"]),
        ] {
            let mut chunks: Vec<Chunk> = texts
                .iter()
                .enumerate()
                .map(|(index, text)| chunk(document_id, index as u32, text))
                .collect();
            for chunk in &mut chunks {
                chunk.embedding = embedder.embed(&chunk.text).ok();
            }
            keyword.replace_chunks(document_id, &chunks).await.expect("keyword");
            let records: Vec<VectorRecord> = chunks.iter().filter_map(VectorRecord::from_chunk).collect();
            vectors.replace_vectors(document_id, &records).await.expect("vectors");
        }
        (keyword, vectors)
    }

    #[tokio::test]
    async fn retrieval_respects_filter_threshold_and_top_k() {
        let (keyword, vectors) = seeded().await;
        let retriever = HybridRetriever::new(
            keyword,
            vectors,
            Arc::new(CharacterNgramEmbedder::default()),
            Duration::from_secs(5),
        );

        let scoped = retriever
            .retrieve("basalt lava", &SearchFilter::document("geo"), 10, 0.0)
            .await
            .expect("retrieve");
        assert!(!scoped.is_empty());
        assert!(scoped.iter().all(|candidate| candidate.chunk_id.document_id == "geo"));
        assert_eq!(scoped[0].chunk_id, ChunkId::new("geo", 0));

        let strict = retriever
            .retrieve("basalt lava", &SearchFilter::default(), 10, 0.99)
            .await
            .expect("retrieve");
        assert!(strict.iter().all(|candidate| candidate.score >= 0.99));

        let capped = retriever
            .retrieve("basalt", &SearchFilter::default(), 1, 0.0)
            .await
            .expect("retrieve");
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn lexical_only_weights_ignore_vector_hits() {
        let (keyword, vectors) = seeded().await;
        let retriever = HybridRetriever::new(
            keyword,
            vectors,
            Arc::new(CharacterNgramEmbedder::default()),
            Duration::from_secs(5),
        )
        .with_weights(FusionWeights {
            lexical: 1.0,
            vector: 0.0,
            k: RRF_K,
        });

        let hits = retriever
            .retrieve("sandstone", &SearchFilter::default(), 5, 0.01)
            .await
            .expect("retrieve");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, ChunkId::new("geo", 1));
        assert!((hits[0].score - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn off_topic_question_clears_no_threshold() {
        let (keyword, vectors) = seeded().await;
        let retriever = HybridRetriever::new(
            keyword,
            vectors,
            Arc::new(CharacterNgramEmbedder::default()),
            Duration::from_secs(5),
        );
        let hits = retriever
            .retrieve("Who painted the Sistine Chapel ceiling?", &SearchFilter::default(), 5, 0.5)
            .await
            .expect("retrieve");
        assert!(hits.is_empty(), "unexpected candidates: {hits:?}");
    }

    struct StalledVectors;

    #[async_trait]
    impl VectorIndex for StalledVectors {
        async fn replace_vectors(&self, _document_id: &str, _records: &[VectorRecord]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search_vector(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<ChunkHit>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let (keyword, _) = seeded().await;
        let retriever = HybridRetriever::new(
            keyword,
            Arc::new(StalledVectors),
            Arc::new(CharacterNgramEmbedder::default()),
            Duration::from_millis(20),
        );
        let result = retriever
            .retrieve("basalt", &SearchFilter::default(), 5, 0.0)
            .await;
        assert!(matches!(result, Err(RetrievalError::Timeout)));
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::EmptyInput)
        }
    }

    #[tokio::test]
    async fn unembeddable_question_falls_back_to_lexical() {
        let (keyword, vectors) = seeded().await;
        let retriever = HybridRetriever::new(keyword, vectors, Arc::new(BrokenEmbedder), Duration::from_secs(5));
        let hits = retriever
            .retrieve("sandstone", &SearchFilter::default(), 5, 0.0)
            .await
            .expect("retrieve");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].modes(), vec![SearchMode::Lexical]);
    }
}
