//! Upload intake for Skriv.
//!
//! Validates an uploaded payload, stores it as a blob, and creates the job
//! record. Submission is the only write path into the pipeline; everything
//! after the returned handle happens asynchronously on the worker pool.

use crate::blob_store::BlobStore;
use crate::config::IntakeSettings;
use crate::error::{Result, SkrivError};
use crate::job_store::{JobState, JobStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Handle returned to the caller for a freshly created job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    /// ID to poll or subscribe with.
    pub id: Uuid,
    /// State at creation time (always pending).
    pub state: JobState,
}

/// Accepts uploads and turns them into pending jobs.
pub struct IntakeService {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    settings: IntakeSettings,
}

impl IntakeService {
    /// Create a new intake service.
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            settings,
        }
    }

    /// Validate and accept a media upload, returning a job handle.
    ///
    /// Exactly one blob and one job are created per successful call. If the
    /// job record cannot be written after the blob is stored, the blob is
    /// cleaned up best-effort so a failed submission leaves nothing behind.
    #[instrument(skip(self, media), fields(bytes = media.len(), content_type = %declared_content_type))]
    pub async fn submit(&self, media: &[u8], declared_content_type: &str) -> Result<JobHandle> {
        if media.is_empty() {
            return Err(SkrivError::InvalidInput("empty payload".to_string()));
        }

        if media.len() as u64 > self.settings.max_payload_bytes {
            return Err(SkrivError::PayloadTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                media.len(),
                self.settings.max_payload_bytes
            )));
        }

        let content_type = normalize_content_type(declared_content_type);
        if !self.is_accepted(&content_type) {
            let shown = if content_type.is_empty() {
                declared_content_type
            } else {
                content_type.as_str()
            };
            return Err(SkrivError::InvalidInput(format!(
                "unaccepted content type: {}",
                shown
            )));
        }

        let blob_key = self.blobs.put(media).await?;

        let job = match self.store.create(&blob_key, &content_type).await {
            Ok(job) => job,
            Err(e) => {
                // Roll back the stored payload so failure has no side effects.
                if let Err(cleanup_err) = self.blobs.delete(&blob_key).await {
                    warn!(
                        "Failed to clean up blob {} after job creation error: {}",
                        blob_key, cleanup_err
                    );
                }
                return Err(e);
            }
        };

        debug!("Accepted upload as job {}", job.id);

        Ok(JobHandle {
            id: job.id,
            state: job.state,
        })
    }

    fn is_accepted(&self, content_type: &str) -> bool {
        if content_type.is_empty() {
            return false;
        }
        self.settings.accepted_types.iter().any(|accepted| {
            if let Some(prefix) = accepted.strip_suffix("/*") {
                content_type
                    .split('/')
                    .next()
                    .is_some_and(|top| top == prefix)
            } else {
                accepted == content_type
            }
        })
    }
}

/// Lowercase a media type and strip parameters ("Audio/MPEG; q=1" -> "audio/mpeg").
fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
