//! Query pipeline: retrieve, gate, answer, gate again.
//!
//! Each request reads one configuration snapshot up front, so a concurrent
//! `set_config` never changes thresholds halfway through a request. Dropping the
//! returned future abandons any in-flight retrieval or generation.

use crate::answer::Answerer;
use crate::config::{ConfigStore, RagConfig, MAX_RETRIEVAL_TOP_K};
use crate::error::{AnswerError, QueryError, RetrievalError, ValidationError};
use crate::gate::{GateEvaluator, GateFailure, GateReason};
use crate::models::{Fallback, QueryRequest, QueryResponse, SearchFilter};
use crate::retrieval::HybridRetriever;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const FALLBACK_MESSAGE: &str =
    "The indexed books do not contain enough reliable information to answer this question.";

pub struct QueryOrchestrator {
    config: Arc<ConfigStore>,
    retriever: HybridRetriever,
    answerer: Answerer,
}

impl QueryOrchestrator {
    pub fn new(config: Arc<ConfigStore>, retriever: HybridRetriever, answerer: Answerer) -> Self {
        Self {
            config,
            retriever,
            answerer,
        }
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let config = self.config.get();
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ValidationError::new("question", "must not be empty").into());
        }
        let top_k = request.top_k.unwrap_or(config.retrieval_top_k);
        if !(1..=MAX_RETRIEVAL_TOP_K).contains(&top_k) {
            return Err(ValidationError::new(
                "top_k",
                format!("must be between 1 and {MAX_RETRIEVAL_TOP_K}"),
            )
            .into());
        }
        let filter = match request.document_id.as_deref().map(str::trim) {
            Some("") => return Err(ValidationError::new("document_id", "must not be empty").into()),
            Some(document_id) => SearchFilter::document(document_id),
            None => SearchFilter::default(),
        };

        let candidates = match self
            .retriever
            .retrieve(question, &filter, top_k, config.relevance_threshold)
            .await
        {
            Ok(candidates) => candidates,
            Err(RetrievalError::Timeout) => {
                return gate_failed(&config, GateFailure::retrieval(GateReason::RetrievalTimeout));
            }
            Err(RetrievalError::Store(store)) => {
                error!(error = %store, "retrieval backends failed");
                return Err(QueryError::Processing);
            }
        };

        if let Err(failure) = GateEvaluator::retrieval(&config, candidates.len()) {
            return gate_failed(&config, failure);
        }

        let answer = match self.answerer.answer(question, &candidates, &config).await {
            Ok(answer) => answer,
            Err(AnswerError::Timeout) => {
                return gate_failed(&config, GateFailure::generation(GateReason::GenerationTimeout));
            }
            Err(failure) => {
                warn!(error = %failure, "answer rejected");
                return gate_failed(&config, GateFailure::generation(GateReason::GenerationFailed));
            }
        };

        if let Err(failure) = GateEvaluator::generation(&config, answer.confidence) {
            return gate_failed(&config, failure);
        }

        info!(
            candidates = candidates.len(),
            claims = answer.claims.len(),
            confidence = answer.confidence,
            "query answered"
        );
        Ok(QueryResponse::Answer(answer))
    }
}

fn gate_failed(config: &RagConfig, failure: GateFailure) -> Result<QueryResponse, QueryError> {
    info!(gate = ?failure.gate, reason = %failure, fallback = config.enable_fallback, "quality gate failed");
    if config.enable_fallback {
        Ok(QueryResponse::Fallback(Fallback {
            reason: failure,
            message: FALLBACK_MESSAGE.to_string(),
        }))
    } else {
        Err(QueryError::InsufficientContext(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfigUpdate;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::{GenerationError, StoreError};
    use crate::gate::Gate;
    use crate::models::{Chunk, ChunkHit};
    use crate::stores::{MemoryKeywordIndex, MemoryVectorIndex};
    use crate::testing::{sanitizer, ScriptedModel};
    use crate::traits::{KeywordIndex, VectorIndex, VectorRecord};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn seed(keyword: &MemoryKeywordIndex, vectors: &MemoryVectorIndex, document_id: &str, texts: &[&str]) {
        let embedder = CharacterNgramEmbedder::default();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                document_id: document_id.to_string(),
                order_index: index as u32,
                page_number: index as u32 + 1,
                text: text.to_string(),
                start_offset: 0,
                end_offset: text.len(),
                embedding: embedder.embed(text).ok(),
            })
            .collect();
        keyword.replace_chunks(document_id, &chunks).await.expect("keyword");
        let records: Vec<VectorRecord> = chunks.iter().filter_map(VectorRecord::from_chunk).collect();
        vectors.replace_vectors(document_id, &records).await.expect("vectors");
    }

    async fn orchestrator(responses: Vec<Result<Value, GenerationError>>) -> (QueryOrchestrator, Arc<ScriptedModel>, Arc<ConfigStore>) {
        let keyword = Arc::new(MemoryKeywordIndex::default());
        let vectors = Arc::new(MemoryVectorIndex::default());
        seed(
            &keyword,
            &vectors,
            "plants",
            &[
                "Photosynthesis uses light to make chemical energy inside chloroplasts.",
                "Chlorophyll lets photosynthesis use red and blue light.",
                "Roots absorb water and minerals from the soil.",
            ],
        )
        .await;
        seed(&keyword, &vectors, "tides", &["Tides follow the pull of the moon."]).await;

        let model = Arc::new(ScriptedModel::new(responses));
        let config = Arc::new(ConfigStore::default());
        let orchestrator = QueryOrchestrator::new(
            config.clone(),
            HybridRetriever::new(
                keyword,
                vectors,
                Arc::new(CharacterNgramEmbedder::default()),
                Duration::from_secs(5),
            ),
            Answerer::new(model.clone(), sanitizer(), Duration::from_secs(5)),
        );
        (orchestrator, model, config)
    }

    fn answer(confidence: f64) -> Value {
        json!({
            "answer_summary": "Photosynthesis turns light into chemical energy.",
            "claims": [{
                "text": "Chloroplasts convert light into chemical energy.",
                "source_chunk_id": "plants#0",
                "page_number": 1
            }],
            "confidence_score": confidence
        })
    }

    #[tokio::test]
    async fn confident_grounded_answer_is_returned() {
        let (orchestrator, model, _) = orchestrator(vec![Ok(answer(0.9))]).await;
        let response = orchestrator
            .query(&QueryRequest::new("How does photosynthesis use light?"))
            .await
            .expect("query");
        let QueryResponse::Answer(answer) = response else {
            panic!("expected an answer, got {response:?}");
        };
        assert_eq!(answer.claims.len(), 1);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn too_few_candidates_never_reach_the_model() {
        let (orchestrator, model, _) = orchestrator(vec![Ok(answer(0.9))]).await;
        let response = orchestrator
            .query(&QueryRequest::new("What pulls the tides?").for_document("tides"))
            .await
            .expect("query");
        let QueryResponse::Fallback(fallback) = response else {
            panic!("expected fallback, got {response:?}");
        };
        assert_eq!(fallback.reason.gate, Gate::Retrieval);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_fallback_surfaces_insufficient_context() {
        let (orchestrator, model, config) = orchestrator(vec![]).await;
        config
            .set(&RagConfigUpdate {
                enable_fallback: Some(false),
                ..Default::default()
            })
            .expect("valid update");
        let result = orchestrator
            .query(&QueryRequest::new("What pulls the tides?").for_document("tides"))
            .await;
        assert!(matches!(result, Err(QueryError::InsufficientContext(_))));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn unrelated_question_is_refused_before_generation() {
        let (orchestrator, model, config) = orchestrator(vec![Ok(answer(0.9))]).await;
        let question = "Who painted the Sistine Chapel ceiling?";

        let response = orchestrator
            .query(&QueryRequest::new(question))
            .await
            .expect("query");
        let QueryResponse::Fallback(fallback) = response else {
            panic!("expected fallback, got {response:?}");
        };
        assert_eq!(fallback.reason.gate, Gate::Retrieval);

        config
            .set(&RagConfigUpdate {
                enable_fallback: Some(false),
                ..Default::default()
            })
            .expect("valid update");
        let result = orchestrator.query(&QueryRequest::new(question)).await;
        assert!(matches!(result, Err(QueryError::InsufficientContext(_))));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn low_confidence_falls_back_without_leaking_claims() {
        let (orchestrator, _, _) = orchestrator(vec![Ok(answer(0.3))]).await;
        let response = orchestrator
            .query(&QueryRequest::new("How does photosynthesis use light?"))
            .await
            .expect("query");
        let QueryResponse::Fallback(ref fallback) = response else {
            panic!("expected fallback, got {response:?}");
        };
        assert_eq!(fallback.reason.gate, Gate::Generation);
        let serialized = serde_json::to_string(&response).expect("serialize");
        assert!(!serialized.contains("Chloroplasts convert"));
    }

    #[tokio::test]
    async fn unresolvable_citation_is_a_generation_failure() {
        let bad = json!({
            "answer_summary": "s",
            "claims": [{"text": "t", "source_chunk_id": "tides#0", "page_number": 1}],
            "confidence_score": 0.95
        });
        let (orchestrator, _, _) = orchestrator(vec![Ok(bad)]).await;
        let response = orchestrator
            .query(&QueryRequest::new("How does photosynthesis use light?").for_document("plants"))
            .await
            .expect("query");
        let QueryResponse::Fallback(fallback) = response else {
            panic!("expected fallback, got {response:?}");
        };
        assert_eq!(fallback.reason.reason, GateReason::GenerationFailed);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_before_retrieval() {
        let (orchestrator, model, _) = orchestrator(vec![]).await;
        for request in [
            QueryRequest::new("   "),
            QueryRequest::new("photosynthesis").with_top_k(0),
            QueryRequest::new("photosynthesis").with_top_k(MAX_RETRIEVAL_TOP_K + 1),
            QueryRequest::new("photosynthesis").for_document(" "),
        ] {
            assert!(matches!(
                orchestrator.query(&request).await,
                Err(QueryError::Validation(_))
            ));
        }
        assert_eq!(model.calls(), 0);
    }

    struct Unavailable {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl KeywordIndex for Unavailable {
        async fn replace_chunks(&self, _document_id: &str, _chunks: &[Chunk]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search_keyword(
            &self,
            _query: &str,
            _top_k: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<ChunkHit>, StoreError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Err(StoreError::NotReady("index offline".to_string()))
        }
    }

    #[async_trait]
    impl VectorIndex for Unavailable {
        async fn replace_vectors(&self, _document_id: &str, _records: &[VectorRecord]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search_vector(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<ChunkHit>, StoreError> {
            Err(StoreError::NotReady("collection offline".to_string()))
        }
    }

    fn broken(delay: Option<Duration>, timeout: Duration) -> (QueryOrchestrator, Arc<ScriptedModel>) {
        let backend = Arc::new(Unavailable { delay });
        let model = Arc::new(ScriptedModel::default());
        let orchestrator = QueryOrchestrator::new(
            Arc::new(ConfigStore::default()),
            HybridRetriever::new(
                backend.clone(),
                backend,
                Arc::new(CharacterNgramEmbedder::default()),
                timeout,
            ),
            Answerer::new(model.clone(), sanitizer(), Duration::from_secs(5)),
        );
        (orchestrator, model)
    }

    #[tokio::test]
    async fn backend_failure_is_a_generic_processing_error() {
        let (orchestrator, model) = broken(None, Duration::from_secs(5));
        let result = orchestrator.query(&QueryRequest::new("anything")).await;
        let error = result.expect_err("backends down");
        assert!(matches!(error, QueryError::Processing));
        assert!(!error.to_string().contains("offline"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn retrieval_timeout_resolves_to_fallback() {
        let (orchestrator, model) = broken(Some(Duration::from_secs(30)), Duration::from_millis(20));
        let response = orchestrator
            .query(&QueryRequest::new("anything"))
            .await
            .expect("fallback, not error");
        let QueryResponse::Fallback(fallback) = response else {
            panic!("expected fallback, got {response:?}");
        };
        assert_eq!(fallback.reason.reason, GateReason::RetrievalTimeout);
        assert_eq!(model.calls(), 0);
    }
}
