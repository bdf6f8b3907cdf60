use crate::error::StoreError;
use crate::models::{Chunk, ChunkHit, ChunkId, Document, DocumentStatus, IndexEntry, SearchFilter};
use crate::toc::TocTree;
use async_trait::async_trait;

/// Raw uploads, addressed by opaque key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Full-text index over chunk text. Writes replace everything stored for the document.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), StoreError>;

    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError>;
}

/// One vector entry. The payload carries what the retriever needs without a second lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: ChunkId,
    pub page_number: u32,
    pub text: String,
    pub vector: Vec<f32>,
}

impl VectorRecord {
    /// Chunks without an embedding are not vector-searchable.
    pub fn from_chunk(chunk: &Chunk) -> Option<Self> {
        chunk.embedding.as_ref().map(|vector| Self {
            chunk_id: chunk.id(),
            page_number: chunk.page_number,
            text: chunk.text.clone(),
            vector: vector.clone(),
        })
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn replace_vectors(&self, document_id: &str, records: &[VectorRecord]) -> Result<(), StoreError>;

    async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError>;
}

/// Per-document ToC tree and alphabetical index.
#[async_trait]
pub trait StructureStore: Send + Sync {
    async fn replace_structure(
        &self,
        document_id: &str,
        toc: &TocTree,
        index: &[IndexEntry],
    ) -> Result<(), StoreError>;

    async fn read_toc(&self, document_id: &str) -> Result<Option<TocTree>, StoreError>;

    async fn read_index(&self, document_id: &str) -> Result<Vec<IndexEntry>, StoreError>;
}

/// Authoritative document metadata and processing status.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    async fn register(&self, document: Document) -> Result<(), StoreError>;

    async fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError>;

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<Document>, StoreError>;
}
