//! Ingestion orchestrator: leases queued jobs and runs them through the stage chain.
//!
//! Stages run sequentially inside one job. Every index write replaces what the
//! document had before, so a retried job never duplicates chunks or structure.

use crate::chunking::chunk_document;
use crate::config::PipelineSettings;
use crate::embeddings::{embed_chunks, Embedder};
use crate::error::{IngestError, QueueError, StageError, ValidationError};
use crate::extractor::TextExtractor;
use crate::models::{Document, DocumentStatus, Stage};
use crate::queue::{DeadLetterRecord, Job, JobQueue};
use crate::structure::StructureParser;
use crate::traits::{DocumentRegistry, KeywordIndex, ObjectStore, StructureStore, VectorIndex, VectorRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything one ingestion worker talks to.
#[derive(Clone)]
pub struct IngestionParts {
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<dyn DocumentRegistry>,
    pub objects: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub structure: Arc<StructureParser>,
    pub embedder: Arc<dyn Embedder>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub vectors: Arc<dyn VectorIndex>,
    pub structures: Arc<dyn StructureStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded {
        job_id: Uuid,
        document_id: String,
        chunks: usize,
    },
    RetryScheduled {
        job_id: Uuid,
        document_id: String,
        attempt: u32,
        delay: Duration,
    },
    DeadLettered(DeadLetterRecord),
    /// Another worker settled the job after this worker's lease ran out.
    Abandoned { job_id: Uuid },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub abandoned: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Succeeded { .. } => self.succeeded += 1,
            JobOutcome::RetryScheduled { .. } => self.retried += 1,
            JobOutcome::DeadLettered(_) => self.dead_lettered += 1,
            JobOutcome::Abandoned { .. } => self.abandoned += 1,
        }
    }
}

pub struct IngestionOrchestrator {
    parts: IngestionParts,
    settings: PipelineSettings,
}

impl IngestionOrchestrator {
    pub fn new(parts: IngestionParts, settings: PipelineSettings) -> Self {
        Self { parts, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Queues a registered document and returns without doing any processing.
    pub async fn enqueue_ingestion(&self, document_id: &str, object_key: &str) -> Result<Job, IngestError> {
        if self.parts.registry.get(document_id).await?.is_none() {
            return Err(IngestError::UnknownDocument(document_id.to_string()));
        }

        let job = self.parts.queue.enqueue(document_id, object_key).await?;
        if job.attempts == 0 {
            self.parts
                .registry
                .set_status(document_id, DocumentStatus::Queued)
                .await?;
        }
        info!(document_id, job_id = %job.id, object_key, "ingestion enqueued");
        Ok(job)
    }

    /// Stores an upload, registers it if new, and queues it.
    pub async fn submit(&self, document: Document, object_key: &str, bytes: Vec<u8>) -> Result<Job, IngestError> {
        if object_key.trim().is_empty() {
            return Err(ValidationError::new("object_key", "must not be empty").into());
        }
        self.parts.objects.put(object_key, bytes).await?;

        let document_id = document.document_id.clone();
        if self.parts.registry.get(&document_id).await?.is_none() {
            self.parts
                .registry
                .register(Document {
                    object_key: Some(object_key.to_string()),
                    ..document
                })
                .await?;
        }
        self.enqueue_ingestion(&document_id, object_key).await
    }

    /// Settles expired leases, then leases and runs at most one job.
    pub async fn process_next(&self, worker_id: &str) -> Result<Option<JobOutcome>, QueueError> {
        for expired in self.parts.queue.reclaim_expired().await? {
            let Some(token) = expired.lease_token() else {
                continue;
            };
            let holder = expired
                .lease
                .as_ref()
                .map(|lease| lease.worker_id.clone())
                .unwrap_or_default();
            warn!(job_id = %expired.id, document_id = %expired.document_id, holder, "reclaiming expired lease");
            let failure = StageError::transient(Stage::Lease, format!("lease held by {holder} expired"));
            self.settle_failure(&expired, token, failure).await?;
        }

        let Some(job) = self
            .parts
            .queue
            .lease_next(worker_id, self.settings.lease_duration)
            .await?
        else {
            return Ok(None);
        };
        let Some(token) = job.lease_token() else {
            return Ok(None);
        };

        info!(
            job_id = %job.id,
            document_id = %job.document_id,
            attempt = job.attempts,
            worker_id,
            "job leased"
        );
        self.mark(&job.document_id, DocumentStatus::Processing).await;

        match self.run(&job, token).await {
            Ok(chunks) => self.settle_success(&job, token, chunks).await.map(Some),
            Err(failure) => self.settle_failure(&job, token, failure).await.map(Some),
        }
    }

    /// Processes jobs until nothing is visible. Jobs waiting out a backoff are not awaited.
    pub async fn drain(&self, worker_id: &str) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        while let Some(outcome) = self.process_next(worker_id).await? {
            report.record(&outcome);
        }
        Ok(report)
    }

    /// Like [`drain`](Self::drain), but also sleeps through retry backoffs until no job is waiting.
    pub async fn drain_with_retries(&self, worker_id: &str) -> Result<DrainReport, QueueError> {
        let mut report = self.drain(worker_id).await?;
        while let Some(visible_at) = self.parts.queue.next_visible().await? {
            let wait = (visible_at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(wait_ms = wait.as_millis() as u64, "waiting for the next retry");
            tokio::time::sleep(wait).await;

            let next = self.drain(worker_id).await?;
            report.succeeded += next.succeeded;
            report.retried += next.retried;
            report.dead_lettered += next.dead_lettered;
            report.abandoned += next.abandoned;
        }
        Ok(report)
    }

    /// Starts `count` polling workers that stop once `shutdown` flips to `true`.
    pub fn spawn_workers(self: &Arc<Self>, count: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|index| {
                let orchestrator = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                let worker_id = format!("worker-{index}");
                tokio::spawn(async move {
                    info!(worker_id, "ingestion worker started");
                    while !*shutdown.borrow() {
                        let idle = match orchestrator.process_next(&worker_id).await {
                            Ok(Some(_)) => false,
                            Ok(None) => true,
                            Err(error) => {
                                error!(worker_id, error = %error, "queue operation failed");
                                true
                            }
                        };
                        if idle {
                            tokio::select! {
                                _ = shutdown.changed() => {}
                                _ = tokio::time::sleep(orchestrator.settings.poll_interval) => {}
                            }
                        }
                    }
                    info!(worker_id, "ingestion worker stopped");
                })
            })
            .collect()
    }

    async fn run(&self, job: &Job, token: Uuid) -> Result<usize, StageError> {
        let document_id = job.document_id.as_str();

        let bytes = self
            .parts
            .objects
            .get(&job.object_key)
            .await
            .map_err(|error| StageError::from_store(Stage::Fetch, error))?;
        debug!(document_id, bytes = bytes.len(), "raw document fetched");

        let extracted = self
            .parts
            .extractor
            .extract(&bytes, Some(&job.object_key))
            .await
            .map_err(StageError::from_extract)?;
        debug!(document_id, pages = extracted.page_count(), chars = extracted.text.len(), "text extracted");
        self.renew(job, token).await?;

        let toc = self.parts.structure.parse_toc(document_id, &extracted).await;
        let index = self.parts.structure.parse_index(document_id, &extracted).await;
        self.renew(job, token).await?;

        let mut chunks = chunk_document(document_id, &extracted, self.settings.chunking);
        if chunks.is_empty() {
            return Err(StageError::terminal(Stage::Chunk, "document produced no chunks"));
        }
        let embedded = embed_chunks(self.parts.embedder.as_ref(), &mut chunks);
        debug!(
            document_id,
            chunks = chunks.len(),
            embedded = embedded.embedded,
            skipped = embedded.skipped,
            "chunks embedded"
        );

        self.parts
            .keyword
            .replace_chunks(document_id, &chunks)
            .await
            .map_err(|error| StageError::from_store(Stage::KeywordWrite, error))?;
        self.renew(job, token).await?;

        let records: Vec<VectorRecord> = chunks.iter().filter_map(VectorRecord::from_chunk).collect();
        self.parts
            .vectors
            .replace_vectors(document_id, &records)
            .await
            .map_err(|error| StageError::from_store(Stage::VectorWrite, error))?;
        self.renew(job, token).await?;

        self.parts
            .structures
            .replace_structure(document_id, &toc, &index)
            .await
            .map_err(|error| StageError::from_store(Stage::StructureWrite, error))?;

        Ok(chunks.len())
    }

    async fn renew(&self, job: &Job, token: Uuid) -> Result<(), StageError> {
        self.parts
            .queue
            .renew(job.id, token, self.settings.lease_duration)
            .await
            .map(|_| ())
            .map_err(|error| StageError::transient(Stage::Lease, error.to_string()))
    }

    async fn settle_success(&self, job: &Job, token: Uuid, chunks: usize) -> Result<JobOutcome, QueueError> {
        match self.parts.queue.complete(job.id, token).await {
            Ok(_) => {}
            Err(lost @ (QueueError::LeaseLost(_) | QueueError::InvalidTransition { .. })) => {
                warn!(job_id = %job.id, error = %lost, "finished job was already settled elsewhere");
                return Ok(JobOutcome::Abandoned { job_id: job.id });
            }
            Err(other) => return Err(other),
        }

        self.mark(&job.document_id, DocumentStatus::Indexed).await;
        info!(job_id = %job.id, document_id = %job.document_id, chunks, attempt = job.attempts, "document indexed");
        Ok(JobOutcome::Succeeded {
            job_id: job.id,
            document_id: job.document_id.clone(),
            chunks,
        })
    }

    async fn settle_failure(&self, job: &Job, token: Uuid, failure: StageError) -> Result<JobOutcome, QueueError> {
        let policy = self.settings.retry;
        let exhausted = job.attempts >= policy.max_attempts;

        let settled = if failure.is_terminal() || exhausted {
            self.parts
                .queue
                .dead_letter(job.id, token, failure.stage(), failure.message())
                .await
                .map(|record| {
                    error!(
                        job_id = %job.id,
                        document_id = %job.document_id,
                        stage = %failure.stage(),
                        attempt = job.attempts,
                        terminal = failure.is_terminal(),
                        error = failure.message(),
                        "job dead-lettered"
                    );
                    JobOutcome::DeadLettered(record)
                })
        } else {
            let delay = policy.delay_for(job.attempts);
            self.parts
                .queue
                .schedule_retry(job.id, token, failure.stage(), failure.message(), delay)
                .await
                .map(|_| {
                    warn!(
                        job_id = %job.id,
                        document_id = %job.document_id,
                        stage = %failure.stage(),
                        attempt = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = failure.message(),
                        "job scheduled for retry"
                    );
                    JobOutcome::RetryScheduled {
                        job_id: job.id,
                        document_id: job.document_id.clone(),
                        attempt: job.attempts,
                        delay,
                    }
                })
        };

        match settled {
            Ok(outcome) => {
                if matches!(outcome, JobOutcome::DeadLettered(_)) {
                    self.mark(&job.document_id, DocumentStatus::Failed).await;
                }
                Ok(outcome)
            }
            Err(lost @ (QueueError::LeaseLost(_) | QueueError::InvalidTransition { .. })) => {
                warn!(job_id = %job.id, error = %lost, "failed job was already settled elsewhere");
                Ok(JobOutcome::Abandoned { job_id: job.id })
            }
            Err(other) => Err(other),
        }
    }

    async fn mark(&self, document_id: &str, status: DocumentStatus) {
        if let Err(error) = self.parts.registry.set_status(document_id, status).await {
            warn!(document_id, status = ?status, error = %error, "document status not updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{ExtractError, StoreError};
    use crate::extractor::ExtractedText;
    use crate::models::{Chunk, ChunkHit, SearchFilter};
    use crate::queue::{JobStatus, MemoryJobQueue};
    use crate::stores::{MemoryKeywordIndex, MemoryObjectStore, MemoryRegistry, MemoryStructureStore, MemoryVectorIndex};
    use crate::testing::{book, sanitizer, ScriptedModel};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedExtractor {
        failure: Option<String>,
        text: ExtractedText,
    }

    impl FixedExtractor {
        fn ok(pages: &[&str]) -> Self {
            Self {
                failure: None,
                text: book(pages),
            }
        }

        fn corrupt(details: &str) -> Self {
            Self {
                failure: Some(details.to_string()),
                text: book(&["unused"]),
            }
        }
    }

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract(&self, _bytes: &[u8], _name_hint: Option<&str>) -> Result<ExtractedText, ExtractError> {
            match &self.failure {
                Some(details) => Err(ExtractError::PdfParse(details.clone())),
                None => Ok(self.text.clone()),
            }
        }
    }

    /// Keyword index that fails its first `failures` writes after storing half the chunks.
    struct FlakyKeywordIndex {
        inner: MemoryKeywordIndex,
        failures: Mutex<usize>,
    }

    #[async_trait]
    impl KeywordIndex for FlakyKeywordIndex {
        async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
            let failing = {
                let mut failures = self.failures.lock();
                let failing = *failures > 0;
                if failing {
                    *failures -= 1;
                }
                failing
            };
            if failing {
                self.inner
                    .replace_chunks(document_id, &chunks[..chunks.len() / 2])
                    .await?;
                return Err(StoreError::NotReady("opensearch warming up".to_string()));
            }
            self.inner.replace_chunks(document_id, chunks).await
        }

        async fn search_keyword(
            &self,
            query: &str,
            top_k: usize,
            filter: &SearchFilter,
        ) -> Result<Vec<ChunkHit>, StoreError> {
            self.inner.search_keyword(query, top_k, filter).await
        }
    }

    struct Fixture {
        orchestrator: IngestionOrchestrator,
        queue: Arc<MemoryJobQueue>,
        registry: Arc<MemoryRegistry>,
        keyword: Arc<FlakyKeywordIndex>,
    }

    const PAGES: [&str; 3] = [
        "Rivers carve valleys over long spans of time. Sediment settles where the current slows.",
        "Glaciers move slower than rivers but reshape mountains entirely.",
        "Wind erosion polishes desert stones into ventifacts.",
    ];

    async fn fixture(extractor: FixedExtractor, keyword_failures: usize, max_attempts: u32) -> Fixture {
        let queue = Arc::new(MemoryJobQueue::default());
        let registry = Arc::new(MemoryRegistry::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let keyword = Arc::new(FlakyKeywordIndex {
            inner: MemoryKeywordIndex::default(),
            failures: Mutex::new(keyword_failures),
        });

        registry
            .register(Document::new("doc-1", "Erosion", "A. Author"))
            .await
            .expect("register");
        objects
            .put("books/doc-1.pdf", b"%PDF-1.4 fake".to_vec())
            .await
            .expect("put");

        let settings = PipelineSettings {
            chunking: crate::config::ChunkingConfig {
                target_chars: 60,
                overlap_chars: 10,
            },
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::ZERO,
                multiplier: 2,
                max_delay: Duration::ZERO,
            },
            ..PipelineSettings::default()
        };

        let parts = IngestionParts {
            queue: queue.clone(),
            registry: registry.clone(),
            objects,
            extractor: Arc::new(extractor),
            structure: Arc::new(StructureParser::new(
                Arc::new(ScriptedModel::default()),
                sanitizer(),
                Duration::from_secs(1),
            )),
            embedder: Arc::new(CharacterNgramEmbedder::default()),
            keyword: keyword.clone(),
            vectors: Arc::new(MemoryVectorIndex::default()),
            structures: Arc::new(MemoryStructureStore::default()),
        };

        Fixture {
            orchestrator: IngestionOrchestrator::new(parts, settings),
            queue,
            registry,
            keyword,
        }
    }

    async fn status(fixture: &Fixture) -> DocumentStatus {
        fixture
            .registry
            .get("doc-1")
            .await
            .expect("registry")
            .expect("document")
            .status
    }

    async fn stored_chunks(fixture: &Fixture) -> usize {
        fixture.keyword.inner.chunk_count("doc-1")
    }

    #[tokio::test]
    async fn enqueue_requires_a_registered_document() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 0, 3).await;
        let error = fixture
            .orchestrator
            .enqueue_ingestion("missing", "books/missing.pdf")
            .await
            .expect_err("unknown document");
        assert!(matches!(error, IngestError::UnknownDocument(_)));

        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");
        assert_eq!(status(&fixture).await, DocumentStatus::Queued);
    }

    #[tokio::test]
    async fn successful_job_indexes_the_document() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 0, 3).await;
        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let outcome = fixture
            .orchestrator
            .process_next("w1")
            .await
            .expect("queue")
            .expect("a job");
        let JobOutcome::Succeeded { chunks, .. } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(chunks >= 3);
        assert_eq!(status(&fixture).await, DocumentStatus::Indexed);
        assert!(fixture.orchestrator.process_next("w1").await.expect("queue").is_none());
    }

    #[tokio::test]
    async fn retry_after_partial_write_does_not_duplicate_chunks() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 1, 3).await;
        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let first = fixture.orchestrator.process_next("w1").await.expect("queue");
        assert!(matches!(
            first,
            Some(JobOutcome::RetryScheduled { attempt: 1, .. })
        ));
        assert_eq!(status(&fixture).await, DocumentStatus::Processing);

        let second = fixture.orchestrator.process_next("w2").await.expect("queue");
        let Some(JobOutcome::Succeeded { chunks, .. }) = second else {
            panic!("expected success on retry, got {second:?}");
        };
        assert_eq!(stored_chunks(&fixture).await, chunks);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_with_exact_attempt_count() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), usize::MAX, 3).await;
        let job = fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let report = fixture.orchestrator.drain("w1").await.expect("drain");
        assert_eq!(report.retried, 2);
        assert_eq!(report.dead_lettered, 1);

        let stored = fixture.queue.get(job.id).await.expect("get").expect("job");
        assert_eq!(stored.status, JobStatus::DeadLettered);
        assert_eq!(stored.attempts, 3);
        assert_eq!(status(&fixture).await, DocumentStatus::Failed);

        let letters = fixture.queue.dead_letters().await.expect("letters");
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].stage, Stage::KeywordWrite);
        assert_eq!(letters[0].attempts, 3);
    }

    #[tokio::test]
    async fn drain_with_retries_waits_out_the_backoff() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 1, 3).await;
        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let report = fixture
            .orchestrator
            .drain_with_retries("w1")
            .await
            .expect("drain");
        assert_eq!(report.retried, 1);
        assert_eq!(report.succeeded, 1);
        assert!(fixture.queue.next_visible().await.expect("queue").is_none());
        assert_eq!(status(&fixture).await, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn corrupt_input_skips_the_retry_budget() {
        let fixture = fixture(
            FixedExtractor::corrupt("bad xref table"),
            0,
            3,
        )
        .await;
        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let outcome = fixture.orchestrator.process_next("w1").await.expect("queue");
        let Some(JobOutcome::DeadLettered(record)) = outcome else {
            panic!("expected dead letter, got {outcome:?}");
        };
        assert_eq!(record.attempts, 1);
        assert_eq!(record.stage, Stage::Extract);
        assert_eq!(status(&fixture).await, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_as_a_failed_attempt() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 0, 3).await;
        fixture
            .orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        // a worker that leased the job and died
        fixture
            .queue
            .lease_next("ghost", Duration::ZERO)
            .await
            .expect("lease")
            .expect("job");

        let outcome = fixture.orchestrator.process_next("w1").await.expect("queue");
        let Some(JobOutcome::Succeeded { .. }) = outcome else {
            panic!("expected the reclaimed job to succeed, got {outcome:?}");
        };
        let jobs = fixture.queue.jobs().await.expect("jobs");
        assert_eq!(jobs[0].attempts, 2);
        assert_eq!(jobs[0].last_stage, Some(Stage::Lease));
    }

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let fixture = fixture(FixedExtractor::ok(&PAGES), 0, 3).await;
        let orchestrator = Arc::new(fixture.orchestrator);
        orchestrator
            .enqueue_ingestion("doc-1", "books/doc-1.pdf")
            .await
            .expect("enqueue");

        let (stop, shutdown) = watch::channel(false);
        let handles = orchestrator.spawn_workers(2, shutdown);

        for _ in 0..100 {
            if fixture.registry.get("doc-1").await.expect("get").map(|doc| doc.status)
                == Some(DocumentStatus::Indexed)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        stop.send(true).expect("workers listening");
        for handle in handles {
            handle.await.expect("worker exits cleanly");
        }
        assert_eq!(
            fixture.registry.get("doc-1").await.expect("get").map(|doc| doc.status),
            Some(DocumentStatus::Indexed)
        );
    }
}
