use crate::error::StoreError;
use crate::models::{Chunk, ChunkHit, ChunkId, SearchFilter};
use crate::traits::KeywordIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

const BACKEND: &str = "opensearch";

pub struct OpenSearchStore {
    client: Client,
    endpoint: String,
    index_name: String,
}

impl OpenSearchStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
        }
    }

    fn index_url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.index_name, suffix)
    }

    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let response = self.client.head(self.index_url("")).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.index_url(""))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "document_id": {"type": "keyword"},
                        "order_index": {"type": "integer"},
                        "page_number": {"type": "integer"},
                        "text": {"type": "text", "analyzer": "standard"}
                    }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "opensearch index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.index_url("/_delete_by_query?refresh=true&conflicts=proceed"))
            .json(&json!({
                "query": { "term": { "document_id": document_id } }
            }))
            .send()
            .await?;

        // A missing index holds nothing to delete.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(backend_error(response.status()))
        }
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

#[async_trait]
impl KeywordIndex for OpenSearchStore {
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.ensure_index().await?;
        self.delete_document(document_id).await?;

        let mut operations = Vec::with_capacity(chunks.len() * 2);
        for chunk in chunks {
            operations.push(json!({
                "index": {
                    "_index": self.index_name,
                    "_id": chunk.id().to_string(),
                }
            }));
            operations.push(json!({
                "document_id": chunk.document_id,
                "order_index": chunk.order_index,
                "page_number": chunk.page_number,
                "text": chunk.text,
            }));
        }

        if operations.is_empty() {
            return Ok(());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let body: Value = response.json().await?;
        if body.pointer("/errors").and_then(Value::as_bool).unwrap_or(false) {
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("bulk write for {document_id} reported item errors"),
            });
        }

        debug!(document_id, chunks = chunks.len(), "keyword index rewritten");
        Ok(())
    }

    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let filters: Vec<Value> = filter
            .document_id
            .iter()
            .map(|document_id| json!({"term": {"document_id": document_id}}))
            .collect();

        let body = json!({
            "size": top_k,
            "query": {
                "bool": {
                    "must": [{ "match": { "text": query } }],
                    "filter": filters
                }
            }
        });

        let response = self
            .client
            .post(self.index_url("/_search"))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let response_json: Value = response.json().await?;
        Ok(parse_hits(&response_json))
    }
}

fn parse_hits(response: &Value) -> Vec<ChunkHit> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| hits.iter().filter_map(parse_hit).collect())
        .unwrap_or_default()
}

fn parse_hit(raw: &Value) -> Option<ChunkHit> {
    let source = raw.pointer("/_source")?;
    let document_id = source.pointer("/document_id").and_then(Value::as_str)?;
    let order_index = source.pointer("/order_index").and_then(Value::as_u64)?;
    Some(ChunkHit {
        chunk_id: ChunkId::new(document_id, u32::try_from(order_index).ok()?),
        page_number: source
            .pointer("/page_number")
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok())
            .unwrap_or(1),
        text: source
            .pointer("/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_hits_become_chunk_hits() {
        let response = json!({
            "hits": { "hits": [
                {"_id": "doc-1#3", "_score": 7.5, "_source": {
                    "document_id": "doc-1", "order_index": 3, "page_number": 12, "text": "pressure"
                }},
                {"_id": "broken", "_score": 1.0, "_source": {"text": "no identity"}}
            ]}
        });

        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, ChunkId::new("doc-1", 3));
        assert_eq!(hits[0].page_number, 12);
        assert_eq!(hits[0].score, 7.5);
    }

    #[test]
    fn empty_response_has_no_hits() {
        assert!(parse_hits(&json!({})).is_empty());
    }
}
