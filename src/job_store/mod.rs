//! Durable job tracking for Skriv.
//!
//! The job store is the single source of truth for the pipeline: intake
//! creates jobs, dispatcher workers claim and finish them, the status API
//! projects them to clients. Every state transition is a conditional update
//! keyed on the current state (and, for running jobs, the owning worker), so
//! two workers can never hold the same job.

mod sqlite;

pub use sqlite::SqliteJobStore;

use crate::error::Result;
use crate::transcription::TranscriptionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle state of a transcription job.
///
/// `Pending -> Running -> {Succeeded, Failed, Pending}` with retries;
/// `Cancelled` is reachable from `Pending` directly and from `Running` once
/// the in-flight call returns. Terminal states absorb all further requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A transcription job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID, assigned at creation.
    pub id: Uuid,
    /// Key of the stored media payload. Never changes after creation.
    pub blob_key: String,
    /// Declared media type of the payload.
    pub content_type: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of dispatch attempts so far.
    pub attempts: u32,
    /// Transcription result; present only when succeeded.
    pub result: Option<TranscriptionResult>,
    /// Last failure reason; present only when failed.
    pub error: Option<String>,
    /// Earliest time a retried job becomes claimable again.
    pub not_before: Option<DateTime<Utc>>,
    /// Worker currently holding the job (running only).
    pub worker_id: Option<String>,
    /// Last liveness signal from the owning worker (running only).
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Whether cancellation was requested while the job was running.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for a stored payload.
    pub fn new(blob_key: String, content_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            blob_key,
            content_type,
            state: JobState::Pending,
            attempts: 0,
            result: None,
            error: None,
            not_before: None,
            worker_id: None,
            heartbeat_at: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Client-facing projection of a job.
///
/// Hides claim bookkeeping (worker, heartbeat, backoff window) from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub state: JobState,
    pub attempts: u32,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            attempts: job.attempts,
            content_type: job.content_type.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Trait for job store implementations.
///
/// Claim-related methods take the worker's ID so ownership is checked on
/// every transition; a mismatch surfaces as `SkrivError::Conflict`, which
/// workers treat as "someone else owns this now" rather than an error.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a new pending job referencing a stored payload.
    async fn create(&self, blob_key: &str, content_type: &str) -> Result<Job>;

    /// Fetch a job by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// List jobs, newest first, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobView>>;

    /// Atomically claim the oldest eligible pending job for a worker.
    ///
    /// The claimed job moves to running with `attempts` incremented. Returns
    /// `None` when no pending job has an elapsed backoff window.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>>;

    /// Record a liveness signal for a running job held by this worker.
    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<()>;

    /// Finish a running job with a transcription result.
    ///
    /// If cancellation was requested while the job ran, the result is
    /// discarded and the job ends cancelled instead.
    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: &TranscriptionResult,
    ) -> Result<JobView>;

    /// Finish a running job as permanently failed.
    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> Result<JobView>;

    /// Return a running job to the queue with a backoff delay.
    async fn release_for_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        delay: Duration,
    ) -> Result<JobView>;

    /// Request cancellation of a job.
    ///
    /// Pending jobs cancel immediately; running jobs are flagged and forced
    /// to cancelled when their in-flight call returns; terminal jobs are
    /// untouched.
    async fn cancel(&self, id: Uuid) -> Result<JobView>;

    /// Requeue running jobs whose heartbeat is older than `stale_after`.
    ///
    /// Covers workers that crashed while holding a claim; called at startup
    /// and periodically by the reaper.
    async fn requeue_stale(&self, stale_after: Duration) -> Result<usize>;

    /// Subscribe to job update events.
    fn updates(&self) -> broadcast::Receiver<JobView>;
}
