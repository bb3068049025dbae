//! HTTP API surface for Skriv.
//!
//! Submission returns a job handle immediately; results are delivered
//! through polling or the SSE stream once a worker has processed the job.
//! Handlers never block on transcription.

use crate::blob_store::BlobStore;
use crate::config::Settings;
use crate::error::SkrivError;
use crate::intake::IntakeService;
use crate::job_store::{JobState, JobStore};
use crate::status::StatusApi;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    intake: IntakeService,
    status: StatusApi,
    store: Arc<dyn JobStore>,
}

impl AppState {
    /// Assemble the request-facing services around a job store and blob store.
    pub fn new(store: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>, settings: &Settings) -> Self {
        Self {
            intake: IntakeService::new(store.clone(), blobs, settings.intake.clone()),
            status: StatusApi::new(store.clone()),
            store,
        }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>, settings: &Settings) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Slack above the intake limit so oversized payloads get our error shape
    // instead of the framework's.
    let body_limit = (settings.intake.max_payload_bytes as usize).saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct ListParams {
    /// Filter by job state (pending, running, succeeded, failed, cancelled)
    state: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    50
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Map the error taxonomy onto HTTP status codes.
fn error_response(err: SkrivError) -> Response {
    let status = match &err {
        SkrivError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SkrivError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        SkrivError::NotFound(_) => StatusCode::NOT_FOUND,
        SkrivError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        SkrivError::Conflict(_) => StatusCode::CONFLICT,
        SkrivError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SkrivError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SkrivError::Backend(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.intake.submit(&body, content_type).await {
        Ok(handle) => (StatusCode::CREATED, Json(handle)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.status.get(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let filter = match params.state.as_deref() {
        Some(s) => match s.parse::<JobState>() {
            Ok(state) => Some(state),
            Err(e) => return error_response(SkrivError::InvalidInput(e)),
        },
        None => None,
    };

    match state.store.list(filter, params.limit).await {
        Ok(views) => Json(views).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stream_job(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.status.subscribe(id).await {
        Ok(stream) => {
            let events = stream.map(|view| Event::default().event("job").json_data(&view));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.store.cancel(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::intake::JobHandle;
    use crate::job_store::{JobView, SqliteJobStore};

    async fn spawn_server() -> (String, Arc<SqliteJobStore>) {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let settings = Settings::default();

        let state = Arc::new(AppState::new(
            store.clone() as Arc<dyn JobStore>,
            blobs as Arc<dyn BlobStore>,
            &settings,
        ));
        let app = router(state, &settings);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), store)
    }

    #[tokio::test]
    async fn test_submit_then_fetch_job() {
        let (base, _store) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/jobs", base))
            .header("content-type", "audio/mpeg")
            .body("fake mp3 bytes".as_bytes().to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let handle: JobHandle = resp.json().await.unwrap();
        assert_eq!(handle.state, JobState::Pending);

        let resp = client
            .get(format!("{}/jobs/{}", base, handle.id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let view: JobView = resp.json().await.unwrap();
        assert_eq!(view.id, handle.id);
        assert_eq!(view.state, JobState::Pending);
        assert_eq!(view.content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_submit_unaccepted_type_is_rejected() {
        let (base, store) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/jobs", base))
            .header("content-type", "application/zip")
            .body(vec![0x50, 0x4b, 0x03, 0x04])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: ErrorResponse = resp.json().await.unwrap();
        assert!(body.error.contains("content type"));

        assert!(store.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_404() {
        let (base, _store) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/jobs/{}", base, Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_cancel_pending_job_over_http() {
        let (base, _store) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/jobs", base))
            .header("content-type", "audio/wav")
            .body("wav".as_bytes().to_vec())
            .send()
            .await
            .unwrap();
        let handle: JobHandle = resp.json().await.unwrap();

        let resp = client
            .post(format!("{}/jobs/{}/cancel", base, handle.id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let view: JobView = resp.json().await.unwrap();
        assert_eq!(view.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_list_jobs_with_state_filter() {
        let (base, store) = spawn_server().await;
        let client = reqwest::Client::new();

        store.create("a", "audio/mpeg").await.unwrap();
        store.create("b", "audio/mpeg").await.unwrap();
        store.claim_next("w1").await.unwrap();

        let resp = client
            .get(format!("{}/jobs?state=pending", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let views: Vec<JobView> = resp.json().await.unwrap();
        assert_eq!(views.len(), 1);

        let resp = client
            .get(format!("{}/jobs?state=bogus", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _store) = spawn_server().await;

        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
    }
}
