//! Read-only job status projection for Skriv.
//!
//! Serves polling (`get`) and subscriptions (`subscribe`). A subscription is
//! a finite stream: the current view first, then one view per state change,
//! ending once the job reaches a terminal state. Nothing here ever mutates a
//! job.

use crate::error::{Result, SkrivError};
use crate::job_store::{JobStore, JobView};
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Read-only API over the job store.
pub struct StatusApi {
    store: Arc<dyn JobStore>,
}

impl StatusApi {
    /// Create a new status API.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Fetch the current view of a job.
    pub async fn get(&self, id: Uuid) -> Result<JobView> {
        self.store
            .get(id)
            .await?
            .map(|job| JobView::from(&job))
            .ok_or_else(|| SkrivError::NotFound(format!("job {}", id)))
    }

    /// Subscribe to a job's progress.
    ///
    /// The receiver is registered before the initial snapshot is read, so a
    /// transition between the two shows up as a (possibly duplicate) update
    /// rather than a gap.
    pub async fn subscribe(&self, id: Uuid) -> Result<impl Stream<Item = JobView> + Send> {
        let rx = self.store.updates();
        let initial = self.get(id).await?;
        let store = self.store.clone();

        struct SubState {
            rx: broadcast::Receiver<JobView>,
            store: Arc<dyn JobStore>,
            pending: Option<JobView>,
            done: bool,
        }

        let state = SubState {
            rx,
            store,
            pending: Some(initial),
            done: false,
        };

        Ok(futures::stream::unfold(state, move |mut state| async move {
            if let Some(view) = state.pending.take() {
                state.done = view.state.is_terminal();
                return Some((view, state));
            }
            if state.done {
                return None;
            }

            loop {
                match state.rx.recv().await {
                    Ok(view) if view.id == id => {
                        state.done = view.state.is_terminal();
                        return Some((view, state));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Missed updates; fall back to the current snapshot so
                        // a dropped terminal event still ends the stream.
                        match state.store.get(id).await {
                            Ok(Some(job)) => {
                                let view = JobView::from(&job);
                                state.done = view.state.is_terminal();
                                return Some((view, state));
                            }
                            _ => return None,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{JobState, SqliteJobStore};
    use crate::transcription::{ResultSegment, TranscriptionResult};
    use futures::StreamExt;

    fn setup() -> (StatusApi, Arc<SqliteJobStore>) {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        (StatusApi::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let (api, _store) = setup();
        let result = api.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SkrivError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_returns_view() {
        let (api, store) = setup();
        let job = store.create("blob", "audio/mpeg").await.unwrap();

        let view = api.get(job.id).await.unwrap();
        assert_eq!(view.id, job.id);
        assert_eq!(view.state, JobState::Pending);
        assert_eq!(view.attempts, 0);
    }

    #[tokio::test]
    async fn test_subscribe_follows_job_to_terminal_state() {
        let (api, store) = setup();
        let job = store.create("blob", "audio/mpeg").await.unwrap();

        let stream = api.subscribe(job.id).await.unwrap();

        let id = job.id;
        let mutate = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            store.claim_next("w1").await.unwrap().unwrap();
            let result = TranscriptionResult::from_segments(
                vec![ResultSegment::new(0.0, 1.0, "over".to_string())],
                0.9,
            );
            store.complete(id, "w1", &result).await.unwrap();
        });

        let views: Vec<JobView> = stream.collect().await;
        mutate.await.unwrap();

        assert_eq!(views.first().unwrap().state, JobState::Pending);
        assert_eq!(views.last().unwrap().state, JobState::Succeeded);
        assert!(views.iter().any(|v| v.state == JobState::Running));
        // Stream terminated on its own after the terminal view
    }

    #[tokio::test]
    async fn test_subscribe_to_terminal_job_yields_single_view() {
        let (api, store) = setup();
        let job = store.create("blob", "audio/mpeg").await.unwrap();
        store.cancel(job.id).await.unwrap();

        let stream = api.subscribe(job.id).await.unwrap();
        let views: Vec<JobView> = stream.collect().await;

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_subscribe_ignores_other_jobs() {
        let (api, store) = setup();
        let watched = store.create("blob-a", "audio/mpeg").await.unwrap();
        let other = store.create("blob-b", "audio/mpeg").await.unwrap();

        let stream = api.subscribe(watched.id).await.unwrap();
        futures::pin_mut!(stream);

        // Initial snapshot
        assert_eq!(stream.next().await.unwrap().id, watched.id);

        // Unrelated activity must not leak into this subscription
        store.cancel(other.id).await.unwrap();
        store.cancel(watched.id).await.unwrap();

        let next = stream.next().await.unwrap();
        assert_eq!(next.id, watched.id);
        assert_eq!(next.state, JobState::Cancelled);
        assert!(stream.next().await.is_none());
    }
}
