//! Status command: show or follow a job's progress.

use super::{fetch_view, poll_until_terminal, print_outcome, resolve_server};
use crate::cli::Output;
use crate::config::Settings;
use anyhow::{Context, Result};
use uuid::Uuid;

/// Show the current state of a job, optionally following it to completion.
pub async fn run_status(
    job_id: &str,
    server: Option<String>,
    follow: bool,
    settings: Settings,
) -> Result<()> {
    let id = Uuid::parse_str(job_id).with_context(|| format!("invalid job ID: {}", job_id))?;
    let base = resolve_server(server, &settings)?;
    let client = reqwest::Client::new();

    let view = if follow {
        poll_until_terminal(&client, &base, id).await?
    } else {
        fetch_view(&client, &base, id).await?
    };

    Output::header(&format!("Job {}", view.id));
    println!();
    Output::kv("State", &view.state.to_string());
    Output::kv("Attempts", &view.attempts.to_string());
    Output::kv("Content type", &view.content_type);
    Output::kv("Created", &view.created_at.to_rfc3339());
    Output::kv("Updated", &view.updated_at.to_rfc3339());
    println!();

    if view.state.is_terminal() {
        print_outcome(&view);
    } else {
        Output::info(&format!(
            "Still {}. Use --follow to wait for the result.",
            view.state
        ));
    }

    Ok(())
}
