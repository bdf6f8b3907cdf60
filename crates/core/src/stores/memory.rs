//! Process-local backends. Used for tests and single-process runs.

use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::models::{Chunk, ChunkHit, Document, DocumentStatus, IndexEntry, SearchFilter};
use crate::toc::TocTree;
use crate::traits::{DocumentRegistry, KeywordIndex, ObjectStore, StructureStore, VectorIndex, VectorRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryKeywordIndex {
    documents: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl MemoryKeywordIndex {
    pub fn chunk_count(&self, document_id: &str) -> usize {
        self.documents.read().get(document_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl KeywordIndex for MemoryKeywordIndex {
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(document_id.to_string(), chunks.to_vec());
        Ok(())
    }

    /// Saturated term frequency weighted by inverse document frequency over the filtered set.
    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents.read();
        let candidates: Vec<(&Chunk, Vec<String>)> = documents
            .iter()
            .filter(|(document_id, _)| filter.accepts(document_id))
            .flat_map(|(_, chunks)| chunks.iter())
            .map(|chunk| (chunk, tokenize(&chunk.text)))
            .collect();

        let total = candidates.len() as f64;
        let document_frequency: HashMap<&str, f64> = terms
            .iter()
            .map(|term| {
                let df = candidates
                    .iter()
                    .filter(|(_, tokens)| tokens.iter().any(|token| token == term))
                    .count() as f64;
                (term.as_str(), df)
            })
            .collect();

        let mut hits: Vec<ChunkHit> = candidates
            .iter()
            .filter_map(|(chunk, tokens)| {
                let score: f64 = terms
                    .iter()
                    .map(|term| {
                        let tf = tokens.iter().filter(|token| *token == term).count() as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let df = document_frequency.get(term.as_str()).copied().unwrap_or(0.0);
                        let idf = (1.0 + (total - df + 0.5) / (df + 0.5)).ln();
                        idf * tf / (tf + 1.2)
                    })
                    .sum();
                (score > 0.0).then(|| ChunkHit {
                    chunk_id: chunk.id(),
                    page_number: chunk.page_number,
                    text: chunk.text.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    documents: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn replace_vectors(&self, document_id: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(document_id.to_string(), records.to_vec());
        Ok(())
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let documents = self.documents.read();
        let mut hits: Vec<ChunkHit> = documents
            .iter()
            .filter(|(document_id, _)| filter.accepts(document_id))
            .flat_map(|(_, records)| records.iter())
            .filter(|record| record.vector.len() == vector.len())
            .map(|record| ChunkHit {
                chunk_id: record.chunk_id.clone(),
                page_number: record.page_number,
                text: record.text.clone(),
                score: cosine_similarity(vector, &record.vector),
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStructureStore {
    documents: RwLock<HashMap<String, (TocTree, Vec<IndexEntry>)>>,
}

#[async_trait]
impl StructureStore for MemoryStructureStore {
    async fn replace_structure(
        &self,
        document_id: &str,
        toc: &TocTree,
        index: &[IndexEntry],
    ) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(document_id.to_string(), (toc.clone(), index.to_vec()));
        Ok(())
    }

    async fn read_toc(&self, document_id: &str) -> Result<Option<TocTree>, StoreError> {
        Ok(self
            .documents
            .read()
            .get(document_id)
            .map(|(toc, _)| toc.clone()))
    }

    async fn read_index(&self, document_id: &str) -> Result<Vec<IndexEntry>, StoreError> {
        Ok(self
            .documents
            .read()
            .get(document_id)
            .map(|(_, index)| index.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.objects.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    documents: RwLock<HashMap<String, Document>>,
}

#[async_trait]
impl DocumentRegistry for MemoryRegistry {
    async fn register(&self, document: Document) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(document.document_id.clone(), document);
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().get(document_id).cloned())
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        let mut documents = self.documents.write();
        let document = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
        document.status = status;
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> = self.documents.read().values().cloned().collect();
        documents.sort_by(|left, right| left.document_id.cmp(&right.document_id));
        Ok(documents)
    }
}
