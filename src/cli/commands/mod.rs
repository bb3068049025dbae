//! CLI command implementations.

mod cancel;
mod config;
mod serve;
mod status;
mod submit;

pub use cancel::run_cancel;
pub use config::run_config;
pub use serve::run_serve;
pub use status::run_status;
pub use submit::run_submit;

use crate::cli::Output;
use crate::config::Settings;
use crate::job_store::{JobState, JobView};
use anyhow::{bail, Context, Result};
use url::Url;
use uuid::Uuid;

/// Resolve the server base URL from a flag or the configured host/port.
pub(crate) fn resolve_server(server: Option<String>, settings: &Settings) -> Result<Url> {
    let raw = server.unwrap_or_else(|| settings.server_url());
    Url::parse(&raw).with_context(|| format!("invalid server URL: {}", raw))
}

/// Fetch the current view of a job from the server.
pub(crate) async fn fetch_view(
    client: &reqwest::Client,
    base: &Url,
    id: Uuid,
) -> Result<JobView> {
    let resp = client
        .get(base.join(&format!("jobs/{}", id))?)
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        bail!("job {} not found", id);
    }
    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }

    Ok(resp.json().await?)
}

/// Poll a job until it reaches a terminal state, with a spinner.
pub(crate) async fn poll_until_terminal(
    client: &reqwest::Client,
    base: &Url,
    id: Uuid,
) -> Result<JobView> {
    let spinner = Output::spinner("Waiting for job...");

    loop {
        let view = fetch_view(client, base, id).await?;
        if view.state.is_terminal() {
            spinner.finish_and_clear();
            return Ok(view);
        }
        spinner.set_message(format!(
            "Job {} is {} (attempt {})",
            id, view.state, view.attempts
        ));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

/// Print the outcome of a finished job.
pub(crate) fn print_outcome(view: &JobView) {
    match view.state {
        JobState::Succeeded => {
            Output::success("Transcription complete.");
            if let Some(result) = &view.result {
                println!();
                Output::transcript(result);
            }
        }
        JobState::Failed => {
            Output::error(&format!(
                "Transcription failed: {}",
                view.error.as_deref().unwrap_or("unknown error")
            ));
        }
        JobState::Cancelled => {
            Output::warning("Job was cancelled.");
        }
        _ => {
            Output::job_line(view);
        }
    }
}
