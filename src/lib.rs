//! Skriv - Asynchronous Transcription Jobs
//!
//! An HTTP service that accepts uploaded audio/video files and transcribes
//! them asynchronously on a bounded worker pool.
//!
//! The name "Skriv" comes from the Norwegian word for "write."
//!
//! # Overview
//!
//! Submitting a file returns a job handle immediately; the actual
//! transcription runs on background workers. Clients poll or stream job
//! progress until the job reaches a terminal state and carries either a
//! transcript or a failure reason.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `blob_store` - Storage for uploaded media payloads
//! - `transcription` - Speech-to-text backend abstraction
//! - `job_store` - Durable job records and the state machine
//! - `intake` - Upload validation and job creation
//! - `dispatcher` - Worker pool, retries, and crash recovery
//! - `status` - Read-only job views and subscriptions
//! - `server` - HTTP API
//!
//! # Example
//!
//! ```rust,no_run
//! use skriv::blob_store::MemoryBlobStore;
//! use skriv::config::Settings;
//! use skriv::intake::IntakeService;
//! use skriv::job_store::SqliteJobStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::default();
//!     let store = Arc::new(SqliteJobStore::in_memory()?);
//!     let blobs = Arc::new(MemoryBlobStore::new());
//!     let intake = IntakeService::new(store, blobs, settings.intake);
//!
//!     let handle = intake.submit(b"...media bytes...", "audio/mpeg").await?;
//!     println!("Created job {}", handle.id);
//!
//!     Ok(())
//! }
//! ```

pub mod blob_store;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod job_store;
pub mod server;
pub mod status;
pub mod transcription;

pub use error::{Result, SkrivError};
