//! The surface other layers call: ingestion intake, queries, configuration and structure reads.

use crate::answer::Answerer;
use crate::config::{ConfigStore, PipelineSettings, RagConfig, RagConfigUpdate};
use crate::embeddings::Embedder;
use crate::error::{IngestError, QueryError, QueueError, StoreError, ValidationError};
use crate::extractor::TextExtractor;
use crate::llm::{ModelRole, ModelRouter};
use crate::models::{Document, IndexEntry, QueryRequest, QueryResponse};
use crate::pipeline::{IngestionOrchestrator, IngestionParts};
use crate::query::QueryOrchestrator;
use crate::queue::{DeadLetterRecord, Job, JobQueue, MemoryJobQueue};
use crate::retrieval::HybridRetriever;
use crate::sanitizer::Sanitizer;
use crate::stores::{MemoryKeywordIndex, MemoryObjectStore, MemoryRegistry, MemoryStructureStore, MemoryVectorIndex};
use crate::structure::StructureParser;
use crate::toc::TocTree;
use crate::traits::{DocumentRegistry, KeywordIndex, ObjectStore, StructureStore, VectorIndex};
use std::sync::Arc;

/// Concrete collaborators, chosen by the caller.
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub registry: Arc<dyn DocumentRegistry>,
    pub queue: Arc<dyn JobQueue>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub vectors: Arc<dyn VectorIndex>,
    pub structures: Arc<dyn StructureStore>,
    pub models: ModelRouter,
    pub embedder: Arc<dyn Embedder>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl Backends {
    /// Process-local stores around the given models, embedder and extractor.
    pub fn in_memory(
        models: ModelRouter,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            objects: Arc::new(MemoryObjectStore::default()),
            registry: Arc::new(MemoryRegistry::default()),
            queue: Arc::new(MemoryJobQueue::default()),
            keyword: Arc::new(MemoryKeywordIndex::default()),
            vectors: Arc::new(MemoryVectorIndex::default()),
            structures: Arc::new(MemoryStructureStore::default()),
            models,
            embedder,
            extractor,
        }
    }
}

pub struct RagService {
    config: Arc<ConfigStore>,
    ingestion: Arc<IngestionOrchestrator>,
    queries: QueryOrchestrator,
    registry: Arc<dyn DocumentRegistry>,
    queue: Arc<dyn JobQueue>,
    structures: Arc<dyn StructureStore>,
}

impl RagService {
    pub fn new(
        backends: Backends,
        config: Arc<ConfigStore>,
        settings: PipelineSettings,
    ) -> Result<Self, regex::Error> {
        let sanitizer = Arc::new(Sanitizer::new()?);

        let structure = Arc::new(StructureParser::new(
            backends.models.model_for(ModelRole::DocumentParser),
            sanitizer.clone(),
            settings.structure_timeout,
        ));
        let retriever = HybridRetriever::new(
            backends.keyword.clone(),
            backends.vectors.clone(),
            backends.embedder.clone(),
            settings.retrieval_timeout,
        );
        let answerer = Answerer::new(
            backends.models.model_for(ModelRole::AnswerGenerator),
            sanitizer,
            settings.generation_timeout,
        );

        let ingestion = IngestionOrchestrator::new(
            IngestionParts {
                queue: backends.queue.clone(),
                registry: backends.registry.clone(),
                objects: backends.objects,
                extractor: backends.extractor,
                structure,
                embedder: backends.embedder,
                keyword: backends.keyword,
                vectors: backends.vectors,
                structures: backends.structures.clone(),
            },
            settings,
        );

        Ok(Self {
            queries: QueryOrchestrator::new(config.clone(), retriever, answerer),
            config,
            ingestion: Arc::new(ingestion),
            registry: backends.registry,
            queue: backends.queue,
            structures: backends.structures,
        })
    }

    pub fn ingestion(&self) -> &Arc<IngestionOrchestrator> {
        &self.ingestion
    }

    pub async fn enqueue_ingestion(&self, document_id: &str, object_key: &str) -> Result<Job, IngestError> {
        self.ingestion.enqueue_ingestion(document_id, object_key).await
    }

    pub async fn submit(&self, document: Document, object_key: &str, bytes: Vec<u8>) -> Result<Job, IngestError> {
        self.ingestion.submit(document, object_key, bytes).await
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        self.queries.query(request).await
    }

    pub fn get_config(&self) -> RagConfig {
        self.config.get()
    }

    pub fn set_config(&self, update: &RagConfigUpdate) -> Result<RagConfig, ValidationError> {
        self.config.set(update)
    }

    pub fn reset_config(&self) -> RagConfig {
        self.config.reset()
    }

    /// Empty when the document has no stored table of contents.
    pub async fn get_toc(&self, document_id: &str) -> Result<TocTree, StoreError> {
        Ok(self
            .structures
            .read_toc(document_id)
            .await?
            .unwrap_or_default())
    }

    pub async fn get_index(&self, document_id: &str) -> Result<Vec<IndexEntry>, StoreError> {
        self.structures.read_index(document_id).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        self.queue.dead_letters().await
    }

    pub async fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.queue.jobs().await
    }

    pub async fn document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        self.registry.get(document_id).await
    }

    pub async fn documents(&self) -> Result<Vec<Document>, StoreError> {
        self.registry.list().await
    }
}
