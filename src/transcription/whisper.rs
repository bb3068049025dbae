//! OpenAI Whisper transcription backend.

use super::{ResultSegment, Transcriber, TranscriptionResult};
use crate::error::{Result, SkrivError};
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// OpenAI Whisper-based transcriber.
pub struct WhisperTranscriber {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config("whisper-1", None, Duration::from_secs(300))
    }

    /// Create a new Whisper transcriber with custom configuration.
    ///
    /// `request_timeout` bounds the underlying HTTP client; per-call timeouts
    /// passed to `transcribe` are enforced on top of it.
    pub fn with_config(
        model: &str,
        language: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SkrivError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let client =
            async_openai::Client::with_config(OpenAIConfig::default()).with_http_client(http_client);

        Ok(Self {
            client,
            model: model.to_string(),
            language,
        })
    }

    /// Pick an upload filename whose extension matches the declared type.
    ///
    /// The API sniffs format from the filename, so a bare "media" name for an
    /// mp3 upload would be rejected.
    fn upload_name(content_type: &str) -> String {
        let ext = match content_type {
            "audio/mpeg" => "mp3",
            "audio/wav" | "audio/x-wav" => "wav",
            "audio/mp4" | "audio/x-m4a" => "m4a",
            "audio/flac" => "flac",
            "audio/ogg" => "ogg",
            "audio/webm" | "video/webm" => "webm",
            "video/mp4" => "mp4",
            "video/quicktime" => "mov",
            "video/mpeg" => "mpeg",
            _ => "bin",
        };
        format!("media.{}", ext)
    }

    /// Classify a backend error as unsupported media or a backend fault.
    fn classify_error(err: async_openai::error::OpenAIError) -> SkrivError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("invalid file format")
            || lower.contains("unsupported")
            || lower.contains("could not be decoded")
            || lower.contains("corrupted")
        {
            SkrivError::UnsupportedMedia(msg)
        } else {
            SkrivError::Backend(format!("Whisper API error: {}", msg))
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    #[instrument(skip(self, media), fields(bytes = media.len(), model = %self.model))]
    async fn transcribe(
        &self,
        media: &[u8],
        content_type: &str,
        timeout: Duration,
    ) -> Result<TranscriptionResult> {
        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(async_openai::types::AudioInput::from_vec_u8(
                Self::upload_name(content_type),
                media.to_vec(),
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = &self.language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| SkrivError::Backend(format!("Failed to build request: {}", e)))?;

        let audio = self.client.audio();
        let call = audio.transcribe_verbose_json(request);
        let response = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Self::classify_error)?,
            Err(_) => {
                return Err(SkrivError::Timeout(format!(
                    "transcription exceeded {:?}",
                    timeout
                )))
            }
        };

        // Segment-level confidence comes back as average log probabilities;
        // exp() maps them onto 0..1.
        let (segments, confidence) = match response.segments {
            Some(segs) if !segs.is_empty() => {
                let confidence = segs
                    .iter()
                    .map(|s| s.avg_logprob.exp().clamp(0.0, 1.0))
                    .sum::<f32>()
                    / segs.len() as f32;
                let segments: Vec<ResultSegment> = segs
                    .iter()
                    .map(|s| {
                        ResultSegment::new(
                            s.start as f64,
                            s.end as f64,
                            s.text.trim().to_string(),
                        )
                    })
                    .collect();
                (segments, confidence)
            }
            _ => {
                // Fallback: single segment covering the whole payload
                let text = response.text.trim().to_string();
                let confidence = if text.is_empty() { 0.0 } else { 0.5 };
                (
                    vec![ResultSegment::new(0.0, response.duration as f64, text)],
                    confidence,
                )
            }
        };

        debug!("Transcribed {} segments", segments.len());

        Ok(TranscriptionResult {
            text: response.text.trim().to_string(),
            segments,
            confidence,
            language: Some(response.language),
            duration_seconds: response.duration as f64,
        })
    }
}

/// Check if the OpenAI API key is configured.
pub fn is_api_key_configured() -> bool {
    std::env::var("OPENAI_API_KEY").is_ok()
}
