//! Configuration settings for Skriv.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub intake: IntakeSettings,
    pub dispatcher: DispatcherSettings,
    pub transcription: TranscriptionSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Storage settings for blobs and job records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Blob store provider (local, memory).
    pub blob_provider: String,
    /// Directory for uploaded media blobs (for local provider).
    pub blob_dir: String,
    /// Path to the SQLite job database.
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.skriv".to_string(),
            blob_provider: "local".to_string(),
            blob_dir: "~/.skriv/blobs".to_string(),
            sqlite_path: "~/.skriv/jobs.db".to_string(),
        }
    }
}

/// Upload validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    /// Maximum accepted payload size in bytes.
    pub max_payload_bytes: u64,
    /// Accepted media types. Entries ending in "/*" match a whole top-level
    /// type (e.g. "audio/*").
    pub accepted_types: Vec<String>,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 50 * 1024 * 1024,
            accepted_types: vec![
                "audio/mpeg".to_string(),
                "audio/wav".to_string(),
                "audio/x-wav".to_string(),
                "audio/mp4".to_string(),
                "audio/x-m4a".to_string(),
                "audio/flac".to_string(),
                "audio/ogg".to_string(),
                "audio/webm".to_string(),
                "video/mp4".to_string(),
                "video/webm".to_string(),
                "video/quicktime".to_string(),
                "video/mpeg".to_string(),
            ],
        }
    }
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Number of concurrent transcription workers.
    pub workers: usize,
    /// How long an idle worker sleeps before polling for jobs again (ms).
    pub poll_interval_ms: u64,
    /// Maximum dispatch attempts per job before it fails permanently.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff (ms).
    pub backoff_base_ms: u64,
    /// Upper bound on the retry backoff delay (ms).
    pub backoff_cap_ms: u64,
    /// Interval between worker heartbeats while processing (seconds).
    pub heartbeat_interval_secs: u64,
    /// A running job whose last heartbeat is older than this is considered
    /// abandoned and requeued (seconds).
    pub stale_after_secs: u64,
    /// How often the reaper scans for abandoned jobs (seconds).
    pub reap_interval_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            max_attempts: 3,
            backoff_base_ms: 2000,
            backoff_cap_ms: 60_000,
            heartbeat_interval_secs: 10,
            stale_after_secs: 60,
            reap_interval_secs: 30,
        }
    }
}

impl DispatcherSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Transcription backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model to use.
    pub model: String,
    /// Per-call timeout for the transcription backend (seconds).
    pub request_timeout_secs: u64,
    /// Optional language hint passed to the backend.
    pub language: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            request_timeout_secs: 300,
            language: None,
        }
    }
}

impl TranscriptionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SkrivError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skriv")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.data_dir)
    }

    /// Get the expanded blob directory path.
    pub fn blob_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.blob_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.sqlite_path)
    }

    /// Base URL of a locally configured server, for client commands.
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }
}
