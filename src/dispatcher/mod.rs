//! Job dispatcher for Skriv.
//!
//! Bridges the durable queue to the transcription backend. A fixed pool of
//! workers claims pending jobs in creation order, runs the backend call with
//! a heartbeat, and writes the outcome back. Transient failures go back to
//! the queue with exponential backoff; permanent ones fail the job on the
//! spot. A reaper task requeues jobs whose worker stopped heartbeating.

use crate::blob_store::BlobStore;
use crate::config::DispatcherSettings;
use crate::error::{Result, SkrivError};
use crate::job_store::{Job, JobStore};
use crate::transcription::{Transcriber, TranscriptionResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Pulls pending jobs and runs them through the transcription backend.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    transcriber: Arc<dyn Transcriber>,
    settings: DispatcherSettings,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        transcriber: Arc<dyn Transcriber>,
        settings: DispatcherSettings,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            transcriber,
            settings,
            request_timeout,
        }
    }

    /// Requeue jobs stranded in running by a previous process.
    ///
    /// Called once at startup before any worker claims; the reaper covers the
    /// same case periodically while running.
    pub async fn recover(&self) -> Result<usize> {
        let requeued = self.store.requeue_stale(self.settings.stale_after()).await?;
        if requeued > 0 {
            info!("Recovered {} job(s) from a previous run", requeued);
        }
        Ok(requeued)
    }

    /// Start the worker pool and the stale-job reaper.
    ///
    /// Workers run until `shutdown` flips to true; in-flight jobs finish
    /// their current attempt before the task exits.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.settings.workers + 1);

        handles.push(tokio::spawn(Self::reaper_loop(
            self.clone(),
            shutdown.clone(),
        )));

        for idx in 0..self.settings.workers {
            let worker_id = format!("worker-{}", idx);
            handles.push(tokio::spawn(Self::worker_loop(
                self.clone(),
                worker_id,
                shutdown.clone(),
            )));
        }

        info!("Started {} transcription worker(s)", self.settings.workers);
        handles
    }

    async fn worker_loop(this: Arc<Self>, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker {} started", worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match this.poll_once(&worker_id).await {
                // Processed a job; look for the next one right away.
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(this.settings.poll_interval()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(SkrivError::Conflict(reason)) => {
                    // Expected under concurrency: another worker or the
                    // reaper took the job.
                    debug!("Worker {}: {}", worker_id, reason);
                }
                Err(e) => {
                    warn!("Worker {} error: {}", worker_id, e);
                    tokio::select! {
                        _ = tokio::time::sleep(this.settings.poll_interval()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    async fn reaper_loop(this: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(this.settings.reap_interval());
        // The immediate first tick duplicates startup recovery; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = this.store.requeue_stale(this.settings.stale_after()).await {
                        warn!("Stale job sweep failed: {}", e);
                    }
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether a job was handled.
    pub async fn poll_once(&self, worker_id: &str) -> Result<bool> {
        let job = match self.store.claim_next(worker_id).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        self.process(worker_id, job).await?;
        Ok(true)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempts))]
    async fn process(&self, worker_id: &str, job: Job) -> Result<()> {
        let outcome = match self.blobs.get(&job.blob_key).await {
            Ok(media) => self.transcribe_with_heartbeat(worker_id, &job, &media).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.store.complete(job.id, worker_id, &result).await?;
            }
            Err(e) if e.is_transient() && job.attempts < self.settings.max_attempts => {
                let delay = self.backoff_delay(job.attempts);
                warn!(
                    "Job {} attempt {}/{} failed ({}), retrying in {:?}",
                    job.id, job.attempts, self.settings.max_attempts, e, delay
                );
                self.store.release_for_retry(job.id, worker_id, delay).await?;
            }
            Err(e) => {
                warn!("Job {} failed after {} attempt(s): {}", job.id, job.attempts, e);
                self.store.fail(job.id, worker_id, &e.to_string()).await?;
            }
        }

        Ok(())
    }

    /// Run the backend call while keeping the job's heartbeat fresh.
    async fn transcribe_with_heartbeat(
        &self,
        worker_id: &str,
        job: &Job,
        media: &[u8],
    ) -> Result<TranscriptionResult> {
        let call = self
            .transcriber
            .transcribe(media, &job.content_type, self.request_timeout);
        tokio::pin!(call);

        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval());

        loop {
            tokio::select! {
                result = &mut call => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.store.heartbeat(job.id, worker_id).await {
                        // Claim was lost mid-flight; let the call finish and
                        // hit the conflict on its final transition.
                        debug!("Heartbeat for job {} rejected: {}", job.id, e);
                    }
                }
            }
        }
    }

    /// Exponential backoff: base * 2^(attempts-1), capped.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let delay_ms = self
            .settings
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.settings.backoff_cap_ms);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::job_store::{JobState, SqliteJobStore};
    use crate::transcription::ResultSegment;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct StaticTranscriber {
        text: String,
    }

    #[async_trait]
    impl Transcriber for StaticTranscriber {
        async fn transcribe(
            &self,
            _media: &[u8],
            _content_type: &str,
            _timeout: Duration,
        ) -> Result<TranscriptionResult> {
            let segments = if self.text.is_empty() {
                vec![]
            } else {
                vec![ResultSegment::new(0.0, 10.0, self.text.clone())]
            };
            let confidence = if self.text.is_empty() { 0.0 } else { 0.9 };
            Ok(TranscriptionResult::from_segments(segments, confidence))
        }
    }

    struct FlakyTranscriber {
        failures_left: AtomicU32,
        text: String,
    }

    #[async_trait]
    impl Transcriber for FlakyTranscriber {
        async fn transcribe(
            &self,
            _media: &[u8],
            _content_type: &str,
            _timeout: Duration,
        ) -> Result<TranscriptionResult> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(SkrivError::Backend("temporarily overloaded".to_string()));
            }
            Ok(TranscriptionResult::from_segments(
                vec![ResultSegment::new(0.0, 5.0, self.text.clone())],
                0.8,
            ))
        }
    }

    struct PermanentFailTranscriber;

    #[async_trait]
    impl Transcriber for PermanentFailTranscriber {
        async fn transcribe(
            &self,
            _media: &[u8],
            _content_type: &str,
            _timeout: Duration,
        ) -> Result<TranscriptionResult> {
            Err(SkrivError::UnsupportedMedia("not decodable".to_string()))
        }
    }

    struct SlowTranscriber {
        delay: Duration,
    }

    #[async_trait]
    impl Transcriber for SlowTranscriber {
        async fn transcribe(
            &self,
            _media: &[u8],
            _content_type: &str,
            _timeout: Duration,
        ) -> Result<TranscriptionResult> {
            tokio::time::sleep(self.delay).await;
            Ok(TranscriptionResult::from_segments(
                vec![ResultSegment::new(0.0, 1.0, "slow result".to_string())],
                0.7,
            ))
        }
    }

    fn test_settings(max_attempts: u32) -> DispatcherSettings {
        DispatcherSettings {
            workers: 1,
            poll_interval_ms: 10,
            max_attempts,
            backoff_base_ms: 0,
            backoff_cap_ms: 0,
            heartbeat_interval_secs: 1,
            stale_after_secs: 60,
            reap_interval_secs: 60,
        }
    }

    struct Fixture {
        store: Arc<SqliteJobStore>,
        blobs: Arc<MemoryBlobStore>,
        dispatcher: Dispatcher,
    }

    fn fixture(transcriber: Arc<dyn Transcriber>, max_attempts: u32) -> Fixture {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            blobs.clone(),
            transcriber,
            test_settings(max_attempts),
            Duration::from_secs(5),
        );
        Fixture {
            store,
            blobs,
            dispatcher,
        }
    }

    async fn enqueue(fx: &Fixture, media: &[u8]) -> Uuid {
        let key = fx.blobs.put(media).await.unwrap();
        fx.store.create(&key, "audio/mpeg").await.unwrap().id
    }

    /// Drive poll_once until the job reaches a terminal state.
    async fn drive_to_terminal(fx: &Fixture, id: Uuid) -> crate::job_store::Job {
        for _ in 0..20 {
            let _ = fx.dispatcher.poll_once("w-test").await;
            let job = fx.store.get(id).await.unwrap().unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_successful_job_lifecycle() {
        let fx = fixture(
            Arc::new(StaticTranscriber {
                text: "hello there".to_string(),
            }),
            3,
        );
        let id = enqueue(&fx, b"audio").await;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 1);
        let result = job.result.unwrap();
        assert_eq!(result.text, "hello there");
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_silent_clip_succeeds_with_empty_text() {
        let fx = fixture(
            Arc::new(StaticTranscriber {
                text: String::new(),
            }),
            3,
        );
        let id = enqueue(&fx, b"ten seconds of silence").await;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Succeeded);
        let result = job.result.unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let fx = fixture(
            Arc::new(FlakyTranscriber {
                failures_left: AtomicU32::new(2),
                text: "finally".to_string(),
            }),
            3,
        );
        let id = enqueue(&fx, b"audio").await;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.result.unwrap().text, "finally");
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_job() {
        let fx = fixture(
            Arc::new(FlakyTranscriber {
                failures_left: AtomicU32::new(u32::MAX),
                text: String::new(),
            }),
            2,
        );
        let id = enqueue(&fx, b"audio").await;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.error.is_some());
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let fx = fixture(Arc::new(PermanentFailTranscriber), 5);
        let id = enqueue(&fx, b"not really audio").await;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert!(job.error.unwrap().contains("Unsupported media"));
    }

    #[tokio::test]
    async fn test_missing_blob_fails_permanently() {
        let fx = fixture(
            Arc::new(StaticTranscriber {
                text: "unreachable".to_string(),
            }),
            5,
        );
        let id = fx
            .store
            .create(&Uuid::new_v4().to_string(), "audio/mpeg")
            .await
            .unwrap()
            .id;

        let job = drive_to_terminal(&fx, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_processing_discards_result() {
        let fx = fixture(
            Arc::new(SlowTranscriber {
                delay: Duration::from_millis(200),
            }),
            3,
        );
        let id = enqueue(&fx, b"audio").await;

        let store = fx.store.clone();
        let processing = tokio::spawn(async move {
            let _ = fx.dispatcher.poll_once("w-test").await;
            fx
        });

        // Let the worker claim, then request cancellation mid-flight
        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = store.cancel(id).await.unwrap();
        assert_eq!(view.state, JobState::Running);

        let fx = processing.await.unwrap();
        let job = fx.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_worker_pool_drains_queue() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut settings = test_settings(3);
        settings.workers = 2;
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            blobs.clone(),
            Arc::new(StaticTranscriber {
                text: "done".to_string(),
            }),
            settings,
            Duration::from_secs(5),
        ));

        let mut ids = Vec::new();
        for i in 0..5 {
            let key = blobs.put(format!("media {}", i).as_bytes()).await.unwrap();
            ids.push(store.create(&key, "audio/mpeg").await.unwrap().id);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = dispatcher.spawn(shutdown_rx);

        // Wait for all jobs to finish
        for _ in 0..100 {
            let mut all_done = true;
            for id in &ids {
                let job = store.get(*id).await.unwrap().unwrap();
                if !job.state.is_terminal() {
                    all_done = false;
                    break;
                }
            }
            if all_done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for id in &ids {
            let job = store.get(*id).await.unwrap().unwrap();
            assert_eq!(job.state, JobState::Succeeded);
            assert_eq!(job.attempts, 1);
        }

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_backoff_delay_growth() {
        let fx = fixture(Arc::new(PermanentFailTranscriber), 3);
        let mut dispatcher = fx.dispatcher;
        dispatcher.settings.backoff_base_ms = 100;
        dispatcher.settings.backoff_cap_ms = 1000;

        assert_eq!(dispatcher.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(dispatcher.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(dispatcher.backoff_delay(3), Duration::from_millis(400));
        // Capped
        assert_eq!(dispatcher.backoff_delay(10), Duration::from_millis(1000));
        // Huge attempt counts don't overflow
        assert_eq!(dispatcher.backoff_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_recover_requeues_stale_running_jobs() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut settings = test_settings(3);
        settings.stale_after_secs = 0;
        let dispatcher = Dispatcher::new(
            store.clone(),
            blobs.clone(),
            Arc::new(StaticTranscriber {
                text: "recovered".to_string(),
            }),
            settings,
            Duration::from_secs(5),
        );

        let key = blobs.put(b"audio").await.unwrap();
        let id = store.create(&key, "audio/mpeg").await.unwrap().id;

        // Simulate a crashed worker: claim and never finish
        store.claim_next("w-crashed").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let requeued = dispatcher.recover().await.unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(
            store.get(id).await.unwrap().unwrap().state,
            JobState::Pending
        );

        // The recovered job runs to completion on the next poll
        let processed = dispatcher.poll_once("w-new").await.unwrap();
        assert!(processed);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.result.unwrap().text, "recovered");
    }
}
