//! Transcription port for Skriv.
//!
//! Wraps the speech-to-text capability behind a narrow trait: media bytes in,
//! text plus segment timings and confidence out, bounded by a timeout. The
//! dispatcher only sees this trait; the OpenAI Whisper backend is one
//! implementation of it.

mod models;
mod whisper;

pub use models::{ResultSegment, TranscriptionResult};
pub use whisper::{is_api_key_configured, WhisperTranscriber};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for transcription backends.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a media payload, returning text with segment timings.
    ///
    /// The declared content type travels with the bytes so the backend can
    /// name the upload correctly. Implementations must respect `timeout` and
    /// surface expiry as `SkrivError::Timeout`.
    async fn transcribe(
        &self,
        media: &[u8],
        content_type: &str,
        timeout: Duration,
    ) -> Result<TranscriptionResult>;
}
