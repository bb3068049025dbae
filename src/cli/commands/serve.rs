//! Server command: runs the HTTP API and the transcription worker pool.

use crate::blob_store::{BlobStore, LocalBlobStore, MemoryBlobStore};
use crate::cli::Output;
use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::job_store::{JobStore, SqliteJobStore};
use crate::server::{router, AppState};
use crate::transcription::{is_api_key_configured, Transcriber, WhisperTranscriber};
use std::sync::Arc;
use tokio::sync::watch;

/// Run the transcription job server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    settings: Settings,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&settings.sqlite_path())?);

    let blobs: Arc<dyn BlobStore> = match settings.storage.blob_provider.as_str() {
        "memory" => Arc::new(MemoryBlobStore::new()),
        _ => Arc::new(LocalBlobStore::new(&settings.blob_dir())?),
    };

    if !is_api_key_configured() {
        Output::warning("OPENAI_API_KEY is not set; transcription attempts will fail.");
    }

    let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::with_config(
        &settings.transcription.model,
        settings.transcription.language.clone(),
        settings.transcription.request_timeout(),
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        blobs.clone(),
        transcriber,
        settings.dispatcher.clone(),
        settings.transcription.request_timeout(),
    ));

    // Requeue jobs stranded by a previous process before workers start
    dispatcher.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = dispatcher.spawn(shutdown_rx);

    let state = Arc::new(AppState::new(store, blobs, &settings));
    let app = router(state, &settings);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Skriv Job Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit", "POST /jobs");
    Output::kv("Job status", "GET  /jobs/:id");
    Output::kv("Job stream", "GET  /jobs/:id/stream");
    Output::kv("Cancel", "POST /jobs/:id/cancel");
    Output::kv("List jobs", "GET  /jobs");
    println!();
    Output::info(&format!(
        "{} worker(s) ready. Press Ctrl+C to stop.",
        settings.dispatcher.workers
    ));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop workers after the listener closes; in-flight attempts finish first
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }

    Output::info("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
