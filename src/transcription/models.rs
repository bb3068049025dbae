//! Data models for transcription results.

use serde::{Deserialize, Serialize};

/// A complete transcription result for one media payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript text.
    pub text: String,
    /// Individual segments with timestamps.
    pub segments: Vec<ResultSegment>,
    /// Backend confidence in the transcript (0.0-1.0).
    pub confidence: f32,
    /// Language detected by the backend (if reported).
    pub language: Option<String>,
    /// Total media duration in seconds.
    pub duration_seconds: f64,
}

impl TranscriptionResult {
    /// Build a result from segments, deriving text and duration.
    pub fn from_segments(segments: Vec<ResultSegment>, confidence: f32) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let duration_seconds = segments.last().map(|s| s.end_seconds).unwrap_or(0.0);

        Self {
            text,
            segments,
            confidence,
            language: None,
            duration_seconds,
        }
    }
}

/// A single segment of a transcript with timestamp information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSegment {
    /// Start time in seconds.
    pub start_seconds: f64,
    /// End time in seconds.
    pub end_seconds: f64,
    /// Transcribed text content.
    pub text: String,
}

impl ResultSegment {
    /// Create a new segment.
    pub fn new(start_seconds: f64, end_seconds: f64, text: String) -> Self {
        Self {
            start_seconds,
            end_seconds,
            text,
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}
