//! Durable ingestion queue with lease (visibility timeout) semantics.
//!
//! A leased job is invisible to other workers until it is completed, rescheduled,
//! dead-lettered, or its lease expires. Expired leases are surfaced by
//! [`JobQueue::reclaim_expired`] so a crashed worker never strands a job.
//!
//! ```text
//! pending ──lease──▶ running ──complete──▶ succeeded
//!                      │  ▲
//!        schedule_retry│  │lease (after backoff)
//!                      ▼  │
//!                  retry_pending
//! running ──dead_letter──▶ dead_lettered
//! ```

use crate::error::QueueError;
use crate::models::Stage;
use crate::stores::fs::{load_json, update_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    /// The last attempt failed; the job becomes visible again at `visible_at`.
    RetryPending,
    Succeeded,
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::RetryPending => "retry_pending",
            Self::Succeeded => "succeeded",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::RetryPending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: Uuid,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: String,
    pub object_key: String,
    /// Number of times the job has been leased.
    pub attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub last_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub lease: Option<Lease>,
}

impl Job {
    pub fn lease_token(&self) -> Option<Uuid> {
        self.lease.as_ref().map(|lease| lease.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: Uuid,
    pub document_id: String,
    pub object_key: String,
    pub stage: Stage,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Queue contents plus transition rules; time is passed in so transitions are testable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    jobs: Vec<Job>,
    dead_letters: Vec<DeadLetterRecord>,
}

impl QueueState {
    /// Enqueueing a document that already has an active job returns that job.
    pub fn enqueue(&mut self, document_id: &str, object_key: &str, now: DateTime<Utc>) -> Job {
        if let Some(active) = self
            .jobs
            .iter()
            .find(|job| job.document_id == document_id && job.status.is_active())
        {
            return active.clone();
        }

        let job = Job {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            object_key: object_key.to_string(),
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
            last_stage: None,
            created_at: now,
            updated_at: now,
            visible_at: now,
            lease: None,
        };
        self.jobs.push(job.clone());
        job
    }

    pub fn lease_next(&mut self, worker_id: &str, lease_for: Duration, now: DateTime<Utc>) -> Option<Job> {
        let job = self
            .jobs
            .iter_mut()
            .filter(|job| {
                matches!(job.status, JobStatus::Pending | JobStatus::RetryPending) && job.visible_at <= now
            })
            .min_by_key(|job| (job.visible_at, job.created_at))?;

        job.status = JobStatus::Running;
        job.attempts += 1;
        job.updated_at = now;
        job.lease = Some(Lease {
            token: Uuid::new_v4(),
            worker_id: worker_id.to_string(),
            expires_at: now + chrono_duration(lease_for),
        });
        Some(job.clone())
    }

    fn held(&mut self, job_id: Uuid, token: Uuid) -> Result<&mut Job, QueueError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;
        if job.status != JobStatus::Running {
            return Err(QueueError::InvalidTransition {
                job_id,
                status: job.status.as_str().to_string(),
            });
        }
        if job.lease_token() != Some(token) {
            return Err(QueueError::LeaseLost(job_id));
        }
        Ok(job)
    }

    pub fn renew(&mut self, job_id: Uuid, token: Uuid, lease_for: Duration, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let job = self.held(job_id, token)?;
        if let Some(lease) = job.lease.as_mut() {
            lease.expires_at = now + chrono_duration(lease_for);
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    pub fn complete(&mut self, job_id: Uuid, token: Uuid, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let job = self.held(job_id, token)?;
        job.status = JobStatus::Succeeded;
        job.lease = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    pub fn schedule_retry(
        &mut self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let job = self.held(job_id, token)?;
        job.status = JobStatus::RetryPending;
        job.lease = None;
        job.last_stage = Some(stage);
        job.last_error = Some(error.to_string());
        job.visible_at = now + chrono_duration(delay);
        job.updated_at = now;
        Ok(job.clone())
    }

    pub fn dead_letter(
        &mut self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, QueueError> {
        let job = self.held(job_id, token)?;
        job.status = JobStatus::DeadLettered;
        job.lease = None;
        job.last_stage = Some(stage);
        job.last_error = Some(error.to_string());
        job.updated_at = now;

        let record = DeadLetterRecord {
            job_id,
            document_id: job.document_id.clone(),
            object_key: job.object_key.clone(),
            stage,
            error: error.to_string(),
            attempts: job.attempts,
            dead_lettered_at: now,
        };
        self.dead_letters.push(record.clone());
        Ok(record)
    }

    /// Running jobs whose lease ran out. Their stale token lets the caller settle them.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.lease.as_ref().map_or(true, |lease| lease.expires_at <= now)
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.iter().find(|job| job.id == job_id).cloned()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn dead_letters(&self) -> &[DeadLetterRecord] {
        &self.dead_letters
    }

    /// Earliest moment a waiting job becomes leasable.
    pub fn next_visible(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .filter(|job| matches!(job.status, JobStatus::Pending | JobStatus::RetryPending))
            .map(|job| job.visible_at)
            .min()
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, document_id: &str, object_key: &str) -> Result<Job, QueueError>;

    async fn lease_next(&self, worker_id: &str, lease_for: Duration) -> Result<Option<Job>, QueueError>;

    async fn renew(&self, job_id: Uuid, token: Uuid, lease_for: Duration) -> Result<Job, QueueError>;

    async fn complete(&self, job_id: Uuid, token: Uuid) -> Result<Job, QueueError>;

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
        delay: Duration,
    ) -> Result<Job, QueueError>;

    async fn dead_letter(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
    ) -> Result<DeadLetterRecord, QueueError>;

    async fn reclaim_expired(&self) -> Result<Vec<Job>, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError>;

    async fn jobs(&self) -> Result<Vec<Job>, QueueError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError>;

    async fn next_visible(&self) -> Result<Option<DateTime<Utc>>, QueueError>;
}

#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: parking_lot::Mutex<QueueState>,
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, document_id: &str, object_key: &str) -> Result<Job, QueueError> {
        Ok(self.state.lock().enqueue(document_id, object_key, Utc::now()))
    }

    async fn lease_next(&self, worker_id: &str, lease_for: Duration) -> Result<Option<Job>, QueueError> {
        Ok(self.state.lock().lease_next(worker_id, lease_for, Utc::now()))
    }

    async fn renew(&self, job_id: Uuid, token: Uuid, lease_for: Duration) -> Result<Job, QueueError> {
        self.state.lock().renew(job_id, token, lease_for, Utc::now())
    }

    async fn complete(&self, job_id: Uuid, token: Uuid) -> Result<Job, QueueError> {
        self.state.lock().complete(job_id, token, Utc::now())
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
        delay: Duration,
    ) -> Result<Job, QueueError> {
        self.state
            .lock()
            .schedule_retry(job_id, token, stage, error, delay, Utc::now())
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
    ) -> Result<DeadLetterRecord, QueueError> {
        self.state.lock().dead_letter(job_id, token, stage, error, Utc::now())
    }

    async fn reclaim_expired(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.state.lock().expired(Utc::now()))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.state.lock().get(job_id))
    }

    async fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.state.lock().jobs().to_vec())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        Ok(self.state.lock().dead_letters().to_vec())
    }

    async fn next_visible(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(self.state.lock().next_visible())
    }
}

/// Queue persisted to one JSON file and shared by every process that opens it.
///
/// Transitions run under an exclusive file lock against a fresh read of the file,
/// so an `ingest` process and any number of worker processes see one queue and a
/// job is never leased twice. Reads go straight to the file, which is only ever
/// replaced by an atomic rename.
#[derive(Debug, Clone)]
pub struct FileJobQueue {
    path: PathBuf,
}

impl FileJobQueue {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let state: QueueState = load_json(&path).await?;
        debug!(path = %path.display(), jobs = state.jobs.len(), "job queue opened");
        Ok(Self { path })
    }

    async fn transition<T, F>(&self, apply: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut QueueState, DateTime<Utc>) -> Result<T, QueueError>,
    {
        update_json(&self.path, |state: &mut QueueState| apply(state, Utc::now())).await
    }

    async fn read<T>(&self, view: impl FnOnce(&QueueState) -> T) -> Result<T, QueueError> {
        let state: QueueState = load_json(&self.path).await?;
        Ok(view(&state))
    }
}

#[async_trait]
impl JobQueue for FileJobQueue {
    async fn enqueue(&self, document_id: &str, object_key: &str) -> Result<Job, QueueError> {
        self.transition(|state, now| Ok(state.enqueue(document_id, object_key, now)))
            .await
    }

    async fn lease_next(&self, worker_id: &str, lease_for: Duration) -> Result<Option<Job>, QueueError> {
        self.transition(|state, now| Ok(state.lease_next(worker_id, lease_for, now)))
            .await
    }

    async fn renew(&self, job_id: Uuid, token: Uuid, lease_for: Duration) -> Result<Job, QueueError> {
        self.transition(|state, now| state.renew(job_id, token, lease_for, now))
            .await
    }

    async fn complete(&self, job_id: Uuid, token: Uuid) -> Result<Job, QueueError> {
        self.transition(|state, now| state.complete(job_id, token, now)).await
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
        delay: Duration,
    ) -> Result<Job, QueueError> {
        self.transition(|state, now| state.schedule_retry(job_id, token, stage, error, delay, now))
            .await
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        token: Uuid,
        stage: Stage,
        error: &str,
    ) -> Result<DeadLetterRecord, QueueError> {
        self.transition(|state, now| state.dead_letter(job_id, token, stage, error, now))
            .await
    }

    async fn reclaim_expired(&self) -> Result<Vec<Job>, QueueError> {
        let now = Utc::now();
        self.read(|state| state.expired(now)).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        self.read(|state| state.get(job_id)).await
    }

    async fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.read(|state| state.jobs().to_vec()).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        self.read(|state| state.dead_letters().to_vec()).await
    }

    async fn next_visible(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.read(QueueState::next_visible).await
    }
}
