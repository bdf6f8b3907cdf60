use crate::error::StoreError;
use crate::models::{ChunkHit, ChunkId, SearchFilter};
use crate::traits::{VectorIndex, VectorRecord};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url("")).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&json!({ "filter": document_filter(document_id) }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

fn document_filter(document_id: &str) -> Value {
    json!({ "must": [{ "key": "document_id", "match": { "value": document_id } }] })
}

/// Qdrant point ids must be integers or UUIDs; derive a stable UUID from the chunk identity.
pub fn point_id(chunk_id: &ChunkId) -> Uuid {
    let digest = Sha256::digest(chunk_id.to_string().as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn replace_vectors(&self, document_id: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.ensure_collection().await?;
        self.delete_document(document_id).await?;

        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(StoreError::Request(format!(
                        "embedding dimension {} != {}",
                        record.vector.len(),
                        self.vector_size
                    )));
                }
                Ok(json!({
                    "id": point_id(&record.chunk_id).to_string(),
                    "vector": record.vector,
                    "payload": {
                        "document_id": record.chunk_id.document_id,
                        "order_index": record.chunk_id.order_index,
                        "page_number": record.page_number,
                        "text": record.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        debug!(document_id, points = records.len(), "vector index rewritten");
        Ok(())
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(document_id) = &filter.document_id {
            body["filter"] = document_filter(document_id);
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_points(&parsed))
    }
}

fn parse_points(response: &Value) -> Vec<ChunkHit> {
    let Some(points) = response.pointer("/result").and_then(Value::as_array) else {
        return Vec::new();
    };

    points
        .iter()
        .filter_map(|point| {
            let document_id = point.pointer("/payload/document_id").and_then(Value::as_str)?;
            let order_index = point.pointer("/payload/order_index").and_then(Value::as_u64)?;
            Some(ChunkHit {
                chunk_id: ChunkId::new(document_id, u32::try_from(order_index).ok()?),
                page_number: point
                    .pointer("/payload/page_number")
                    .and_then(Value::as_u64)
                    .and_then(|page| u32::try_from(page).ok())
                    .unwrap_or(1),
                text: point
                    .pointer("/payload/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: point.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_and_distinct() {
        let first = point_id(&ChunkId::new("doc-1", 0));
        assert_eq!(first, point_id(&ChunkId::new("doc-1", 0)));
        assert_ne!(first, point_id(&ChunkId::new("doc-1", 1)));
    }

    #[test]
    fn search_result_points_become_chunk_hits() {
        let response = json!({
            "result": [
                {"id": "x", "score": 0.91, "payload": {
                    "document_id": "doc-1", "order_index": 4, "page_number": 7, "text": "flow"
                }},
                {"id": "y", "score": 0.2, "payload": {}}
            ]
        });

        let hits = parse_points(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, ChunkId::new("doc-1", 4));
        assert_eq!(hits[0].page_number, 7);
    }

    #[tokio::test]
    async fn mismatched_query_dimensions_are_rejected_before_any_request() {
        let store = QdrantStore::new("http://127.0.0.1:9", "chunks", 4);
        let result = store.search_vector(&[1.0], 3, &SearchFilter::default()).await;
        assert!(matches!(result, Err(StoreError::Request(_))));
    }
}
