use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Unprocessed,
    Queued,
    Processing,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub author: String,
    /// Opaque object-store key of the raw upload.
    pub object_key: Option<String>,
    pub status: DocumentStatus,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            title: title.into(),
            author: author.into(),
            object_key: None,
            status: DocumentStatus::Unprocessed,
            registered_at: now,
            updated_at: now,
        }
    }
}

/// Pipeline stages of one ingestion job, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Extract,
    Chunk,
    KeywordWrite,
    VectorWrite,
    StructureWrite,
    /// The worker holding the job vanished before finishing.
    Lease,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::KeywordWrite => "keyword_write",
            Self::VectorWrite => "vector_write",
            Self::StructureWrite => "structure_write",
            Self::Lease => "lease",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a chunk: the owning document plus its zero-based order index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document_id: String,
    pub order_index: u32,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, order_index: u32) -> Self {
        Self {
            document_id: document_id.into(),
            order_index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.order_index)
    }
}

impl FromStr for ChunkId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (document_id, index) = value
            .trim()
            .rsplit_once('#')
            .ok_or_else(|| format!("chunk id '{value}' lacks an order index"))?;
        if document_id.is_empty() {
            return Err(format!("chunk id '{value}' lacks a document id"));
        }
        let order_index = index
            .parse::<u32>()
            .map_err(|error| format!("chunk id '{value}': {error}"))?;
        Ok(Self::new(document_id, order_index))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    /// Stable, zero-based position assigned at chunk time.
    pub order_index: u32,
    pub page_number: u32,
    pub text: String,
    /// Byte offsets of `text` inside the normalized document text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(self.document_id.clone(), self.order_index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub term: String,
    pub pages: BTreeSet<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct SearchFilter {
    pub document_id: Option<String>,
}

impl SearchFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
        }
    }

    pub fn accepts(&self, document_id: &str) -> bool {
        self.document_id
            .as_deref()
            .map_or(true, |wanted| wanted == document_id)
    }
}

/// One ranked reference returned by a lexical or vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: ChunkId,
    pub page_number: u32,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Lexical,
    Vector,
}

/// A fused candidate that survived the relevance threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    pub page_number: u32,
    pub text: String,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

impl RetrievedChunk {
    pub fn modes(&self) -> Vec<SearchMode> {
        let mut modes = Vec::new();
        if self.lexical_rank.is_some() {
            modes.push(SearchMode::Lexical);
        }
        if self.vector_rank.is_some() {
            modes.push(SearchMode::Vector);
        }
        modes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub text: String,
    pub source: ChunkId,
    pub page_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundedAnswer {
    pub summary: String,
    pub claims: Vec<Claim>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub document_id: Option<String>,
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            document_id: None,
            top_k: None,
        }
    }

    pub fn for_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallback {
    pub reason: crate::gate::GateFailure,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Answer(GroundedAnswer),
    Fallback(Fallback),
}
