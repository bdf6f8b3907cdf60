//! Book ingestion and citation-grounded question answering.
//!
//! Two pipelines share one [`ConfigStore`] and one set of index backends:
//! the ingestion side ([`IngestionOrchestrator`]) turns raw PDF/DjVu uploads into
//! chunks, vectors and structure; the query side ([`QueryOrchestrator`]) retrieves,
//! gates and answers. [`RagService`] wires both together.

pub mod answer;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod retrieval;
pub mod sanitizer;
pub mod service;
pub mod stores;
pub mod structure;
pub mod toc;
pub mod traits;

#[cfg(test)]
mod testing;

pub use answer::Answerer;
pub use chunking::{chunk_document, reassemble};
pub use config::{ChunkingConfig, ConfigStore, PipelineSettings, RagConfig, RagConfigUpdate, RetryPolicy};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    AnswerError, ExtractError, GenerationError, IngestError, QueryError, QueueError, RetrievalError,
    StageError, StoreError, TocError, ValidationError,
};
pub use extractor::{BookExtractor, DocumentFormat, ExtractedText, TextExtractor};
pub use gate::{Gate, GateEvaluator, GateFailure, GateReason};
pub use ingest::{discover_books, ingest_folder, FolderReport};
pub use llm::{GenerativeModel, ModelRole, ModelRouter, OllamaModel};
pub use models::{
    Chunk, ChunkId, Claim, Document, DocumentStatus, Fallback, GroundedAnswer, IndexEntry, QueryRequest,
    QueryResponse, RetrievedChunk, SearchFilter, Stage,
};
pub use pipeline::{DrainReport, IngestionOrchestrator, IngestionParts, JobOutcome};
pub use query::QueryOrchestrator;
pub use queue::{DeadLetterRecord, FileJobQueue, Job, JobQueue, JobStatus, MemoryJobQueue};
pub use retrieval::{FusionWeights, HybridRetriever};
pub use sanitizer::{AuditCategory, SanitizationResult, SanitizeContext, Sanitizer};
pub use service::{Backends, RagService};
pub use stores::{FsObjectStore, FsRegistry, Neo4jStore, OpenSearchStore, QdrantStore};
pub use toc::{NestedTocNode, TocNodeId, TocTree};
pub use traits::{DocumentRegistry, KeywordIndex, ObjectStore, StructureStore, VectorIndex};
