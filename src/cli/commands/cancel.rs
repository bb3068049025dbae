//! Cancel command: request cancellation of a job.

use super::resolve_server;
use crate::cli::Output;
use crate::config::Settings;
use crate::job_store::{JobState, JobView};
use anyhow::{bail, Context, Result};
use uuid::Uuid;

/// Request cancellation of a job and report what happened.
pub async fn run_cancel(job_id: &str, server: Option<String>, settings: Settings) -> Result<()> {
    let id = Uuid::parse_str(job_id).with_context(|| format!("invalid job ID: {}", job_id))?;
    let base = resolve_server(server, &settings)?;
    let client = reqwest::Client::new();

    let resp = client
        .post(base.join(&format!("jobs/{}/cancel", id))?)
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        bail!("job {} not found", id);
    }
    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }

    let view: JobView = resp.json().await?;
    match view.state {
        JobState::Cancelled => Output::success(&format!("Job {} cancelled.", id)),
        JobState::Running => Output::info(&format!(
            "Job {} is mid-transcription; it will be cancelled when the current attempt returns.",
            id
        )),
        state => Output::warning(&format!(
            "Job {} already finished as {}; cancellation had no effect.",
            id, state
        )),
    }

    Ok(())
}
