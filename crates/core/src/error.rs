use crate::models::Stage;
use thiserror::Error;

/// A rejected configuration update or malformed caller input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("{tool} failed: {details}")]
    ToolFailed { tool: &'static str, details: String },

    #[error("{tool} timed out")]
    ToolTimeout { tool: &'static str },

    #[error("document has no extractable text")]
    NoText,
}

impl ExtractError {
    /// Corrupt or unsupported input never gets better on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ToolFailed { .. } | Self::ToolTimeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BackendResponse { .. } | Self::Http(_) | Self::Io(_) | Self::NotReady(_) => true,
            Self::Url(_) | Self::Serialization(_) | Self::Request(_) | Self::NotFound(_) => false,
        }
    }
}

/// Failure signals of the generative model client.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("model temporarily unavailable: {0}")]
    Transient(String),

    #[error("model returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("lease on job {0} is no longer held")]
    LeaseLost(uuid::Uuid),

    #[error("job {job_id} is {status}, expected running")]
    InvalidTransition { job_id: uuid::Uuid, status: String },

    #[error("queue persistence failed: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for QueueError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Failures while accepting work for the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("document {0} is not registered")]
    UnknownDocument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TocError {
    #[error("toc node {0} does not exist")]
    UnknownNode(usize),

    #[error("page {page} of '{title}' precedes page {previous} in reading order")]
    PageOrder {
        title: String,
        page: u32,
        previous: u32,
    },

    #[error("toc node {0} is reachable more than once")]
    Cycle(usize),

    #[error("toc node {0} has an inconsistent parent link")]
    BrokenParent(usize),
}

/// Stage-local failure, classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("{stage} failed (transient): {message}")]
    Transient { stage: Stage, message: String },

    #[error("{stage} failed (terminal): {message}")]
    Terminal { stage: Stage, message: String },
}

impl StageError {
    pub fn transient(stage: Stage, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    pub fn terminal(stage: Stage, message: impl Into<String>) -> Self {
        Self::Terminal {
            stage,
            message: message.into(),
        }
    }

    pub fn from_extract(error: ExtractError) -> Self {
        if error.is_transient() {
            Self::transient(Stage::Extract, error.to_string())
        } else {
            Self::terminal(Stage::Extract, error.to_string())
        }
    }

    pub fn from_store(stage: Stage, error: StoreError) -> Self {
        if error.is_transient() {
            Self::transient(stage, error.to_string())
        } else {
            Self::terminal(stage, error.to_string())
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Transient { stage, .. } | Self::Terminal { stage, .. } => *stage,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Terminal { message, .. } => message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval timed out")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("generation timed out")]
    Timeout,

    #[error(transparent)]
    Model(#[from] GenerationError),

    #[error("no context survived truncation")]
    EmptyContext,

    #[error("answer carries no claims")]
    Ungrounded,

    #[error("claim {claim} cites unknown source {source_ref}")]
    UnresolvedCitation { claim: usize, source_ref: String },
}

/// Errors surfaced to callers of the query path. Internal detail is logged, never returned.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("insufficient context: {0}")]
    InsufficientContext(crate::gate::GateFailure),

    #[error("query processing failed")]
    Processing,
}

pub type Result<T, E = StageError> = std::result::Result<T, E>;
