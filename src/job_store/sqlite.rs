//! SQLite-based job store implementation.
//!
//! A single WAL-mode connection behind a mutex. State transitions are
//! conditional UPDATEs keyed on the current state and owning worker, so a
//! transition raced by another worker (or the reaper) affects zero rows and
//! surfaces as a conflict instead of clobbering the winner.

use super::{Job, JobState, JobStore, JobView};
use crate::error::{Result, SkrivError};
use crate::transcription::TranscriptionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Capacity of the job update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    blob_key TEXT NOT NULL,
    content_type TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    result_json TEXT,
    error TEXT,
    not_before TEXT,
    worker_id TEXT,
    heartbeat_at TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
CREATE INDEX IF NOT EXISTS idx_jobs_state_created ON jobs(state, created_at);
"#;

const JOB_COLUMNS: &str = "id, blob_key, content_type, state, attempts, result_json, error, \
                           not_before, worker_id, heartbeat_at, cancel_requested, created_at, \
                           updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<JobView>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite job store at {:?}", path);

        let (events, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        let (events, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SkrivError::JobStore(format!("Failed to acquire lock: {}", e)))
    }

    fn emit(&self, view: JobView) {
        let _ = self.events.send(view);
    }

    fn read_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        match conn.query_row(&sql, params![id], job_from_row) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that a job is still running under this worker; the single shared
    /// guard behind complete/fail/release.
    fn held_job(conn: &Connection, id: Uuid, worker_id: &str) -> Result<Job> {
        let job = Self::read_job(conn, &id.to_string())?
            .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;

        if job.state != JobState::Running || job.worker_id.as_deref() != Some(worker_id) {
            return Err(SkrivError::Conflict(format!(
                "job {} is no longer held by {}",
                id, worker_id
            )));
        }

        Ok(job)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self))]
    async fn create(&self, blob_key: &str, content_type: &str) -> Result<Job> {
        let job = Job::new(blob_key.to_string(), content_type.to_string());

        {
            let conn = self.lock()?;
            conn.execute(
                r#"
                INSERT INTO jobs
                (id, blob_key, content_type, state, attempts, cancel_requested, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?5)
                "#,
                params![
                    job.id.to_string(),
                    job.blob_key,
                    job.content_type,
                    job.state.to_string(),
                    job.created_at.to_rfc3339(),
                ],
            )?;
        }

        info!("Created job {} ({})", job.id, job.content_type);
        self.emit(JobView::from(&job));
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let conn = self.lock()?;
        Self::read_job(&conn, &id.to_string())
    }

    #[instrument(skip(self))]
    async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobView>> {
        let conn = self.lock()?;

        let views = match state {
            Some(s) => {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE state = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![s.to_string(), limit as i64], job_from_row)?;
                rows.filter_map(|j| j.ok())
                    .map(|j| JobView::from(&j))
                    .collect()
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit as i64], job_from_row)?;
                rows.filter_map(|j| j.ok())
                    .map(|j| JobView::from(&j))
                    .collect()
            }
        };

        Ok(views)
    }

    #[instrument(skip(self))]
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now().to_rfc3339();
        let job = {
            let conn = self.lock()?;
            loop {
                let candidate = conn.query_row(
                    "SELECT id FROM jobs
                     WHERE state = 'pending' AND (not_before IS NULL OR not_before <= ?1)
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT 1",
                    params![now],
                    |row| row.get::<_, String>(0),
                );

                let id = match candidate {
                    Ok(id) => id,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let changed = conn.execute(
                    "UPDATE jobs
                     SET state = 'running', attempts = attempts + 1, worker_id = ?2,
                         heartbeat_at = ?3, not_before = NULL, updated_at = ?3
                     WHERE id = ?1 AND state = 'pending'",
                    params![id, worker_id, now],
                )?;

                if changed == 0 {
                    // Lost the claim race; silently move on to the next candidate.
                    debug!("Claim conflict on job {}, trying next", id);
                    continue;
                }

                break Self::read_job(&conn, &id)?.ok_or_else(|| {
                    SkrivError::JobStore(format!("claimed job {} vanished", id))
                })?;
            }
        };

        debug!("Worker {} claimed job {} (attempt {})", worker_id, job.id, job.attempts);
        self.emit(JobView::from(&job));
        Ok(Some(job))
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE jobs SET heartbeat_at = ?3
             WHERE id = ?1 AND state = 'running' AND worker_id = ?2",
            params![id.to_string(), worker_id, now],
        )?;

        if changed == 0 {
            return Err(SkrivError::Conflict(format!(
                "job {} is no longer held by {}",
                id, worker_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        result: &TranscriptionResult,
    ) -> Result<JobView> {
        let now = Utc::now().to_rfc3339();
        let view = {
            let conn = self.lock()?;
            let job = Self::held_job(&conn, id, worker_id)?;

            if job.cancel_requested {
                // Cancellation arrived while the call was in flight; the
                // result is discarded.
                conn.execute(
                    "UPDATE jobs SET state = 'cancelled', worker_id = NULL, heartbeat_at = NULL,
                                     updated_at = ?2
                     WHERE id = ?1",
                    params![id.to_string(), now],
                )?;
            } else {
                let result_json = serde_json::to_string(result)?;
                conn.execute(
                    "UPDATE jobs SET state = 'succeeded', result_json = ?2, worker_id = NULL,
                                     heartbeat_at = NULL, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), result_json, now],
                )?;
            }

            let job = Self::read_job(&conn, &id.to_string())?
                .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;
            JobView::from(&job)
        };

        info!("Job {} finished as {}", id, view.state);
        self.emit(view.clone());
        Ok(view)
    }

    #[instrument(skip(self))]
    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> Result<JobView> {
        let now = Utc::now().to_rfc3339();
        let view = {
            let conn = self.lock()?;
            let job = Self::held_job(&conn, id, worker_id)?;

            if job.cancel_requested {
                conn.execute(
                    "UPDATE jobs SET state = 'cancelled', worker_id = NULL, heartbeat_at = NULL,
                                     updated_at = ?2
                     WHERE id = ?1",
                    params![id.to_string(), now],
                )?;
            } else {
                conn.execute(
                    "UPDATE jobs SET state = 'failed', error = ?2, worker_id = NULL,
                                     heartbeat_at = NULL, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), error, now],
                )?;
            }

            let job = Self::read_job(&conn, &id.to_string())?
                .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;
            JobView::from(&job)
        };

        info!("Job {} finished as {}", id, view.state);
        self.emit(view.clone());
        Ok(view)
    }

    #[instrument(skip(self))]
    async fn release_for_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        delay: Duration,
    ) -> Result<JobView> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| SkrivError::JobStore(format!("backoff delay out of range: {}", e)))?;
        let now = Utc::now();
        let not_before = (now + delay).to_rfc3339();

        let view = {
            let conn = self.lock()?;
            let job = Self::held_job(&conn, id, worker_id)?;

            if job.cancel_requested {
                conn.execute(
                    "UPDATE jobs SET state = 'cancelled', worker_id = NULL, heartbeat_at = NULL,
                                     updated_at = ?2
                     WHERE id = ?1",
                    params![id.to_string(), now.to_rfc3339()],
                )?;
            } else {
                conn.execute(
                    "UPDATE jobs SET state = 'pending', worker_id = NULL, heartbeat_at = NULL,
                                     not_before = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), not_before, now.to_rfc3339()],
                )?;
            }

            let job = Self::read_job(&conn, &id.to_string())?
                .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;
            JobView::from(&job)
        };

        debug!("Job {} released for retry as {}", id, view.state);
        self.emit(view.clone());
        Ok(view)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, id: Uuid) -> Result<JobView> {
        let now = Utc::now().to_rfc3339();
        let (view, changed) = {
            let conn = self.lock()?;
            let job = Self::read_job(&conn, &id.to_string())?
                .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;

            let changed = match job.state {
                JobState::Pending => conn.execute(
                    "UPDATE jobs SET state = 'cancelled', updated_at = ?2
                     WHERE id = ?1 AND state = 'pending'",
                    params![id.to_string(), now],
                )?,
                JobState::Running => {
                    // Advisory: the in-flight call is not aborted, but its
                    // outcome will be discarded.
                    conn.execute(
                        "UPDATE jobs SET cancel_requested = 1, updated_at = ?2
                         WHERE id = ?1 AND state = 'running'",
                        params![id.to_string(), now],
                    )?;
                    0
                }
                // Terminal states are left untouched.
                _ => 0,
            };

            let job = Self::read_job(&conn, &id.to_string())?
                .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))?;
            (JobView::from(&job), changed)
        };

        if changed > 0 {
            info!("Cancelled job {}", id);
            self.emit(view.clone());
        }
        Ok(view)
    }

    #[instrument(skip(self))]
    async fn requeue_stale(&self, stale_after: Duration) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| SkrivError::JobStore(format!("stale deadline out of range: {}", e)))?;
        let now = Utc::now();
        let cutoff = (now - stale_after).to_rfc3339();

        let views = {
            let conn = self.lock()?;

            let stale: Vec<(String, bool)> = {
                let mut stmt = conn.prepare(
                    "SELECT id, cancel_requested FROM jobs
                     WHERE state = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?1)",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
                })?;
                rows.filter_map(|r| r.ok()).collect()
            };

            let mut views = Vec::with_capacity(stale.len());
            for (id, cancel_requested) in &stale {
                let next_state = if *cancel_requested { "cancelled" } else { "pending" };
                conn.execute(
                    "UPDATE jobs SET state = ?2, worker_id = NULL, heartbeat_at = NULL,
                                     updated_at = ?3
                     WHERE id = ?1 AND state = 'running'",
                    params![id, next_state, now.to_rfc3339()],
                )?;
                if let Some(job) = Self::read_job(&conn, id)? {
                    views.push(JobView::from(&job));
                }
            }
            views
        };

        let count = views.len();
        for view in views {
            self.emit(view);
        }
        if count > 0 {
            info!("Requeued {} stale running job(s)", count);
        }
        Ok(count)
    }

    fn updates(&self) -> broadcast::Receiver<JobView> {
        self.events.subscribe()
    }
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let state_str: String = row.get(3)?;
    let result_json: Option<String> = row.get(5)?;
    let not_before_str: Option<String> = row.get(7)?;
    let heartbeat_str: Option<String> = row.get(9)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    Ok(Job {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        blob_key: row.get(1)?,
        content_type: row.get(2)?,
        state: state_str.parse().unwrap_or(JobState::Pending),
        attempts: row.get::<_, i64>(4)? as u32,
        result: result_json.and_then(|j| serde_json::from_str(&j).ok()),
        error: row.get(6)?,
        not_before: parse_opt_datetime(not_before_str),
        worker_id: row.get(8)?,
        heartbeat_at: parse_opt_datetime(heartbeat_str),
        cancel_requested: row.get::<_, i64>(10)? != 0,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}
