//! Submit command: upload a media file as a new transcription job.

use super::{poll_until_terminal, print_outcome, resolve_server};
use crate::cli::Output;
use crate::config::Settings;
use crate::intake::JobHandle;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Upload a file and print the resulting job handle.
pub async fn run_submit(
    file: &str,
    content_type: Option<String>,
    server: Option<String>,
    wait: bool,
    settings: Settings,
) -> Result<()> {
    let path = Path::new(file);
    let media = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", file))?;

    let content_type = content_type.unwrap_or_else(|| guess_content_type(path));
    let base = resolve_server(server, &settings)?;
    let client = reqwest::Client::new();

    Output::info(&format!(
        "Uploading {} ({} bytes, {})",
        file,
        media.len(),
        content_type
    ));

    let resp = client
        .post(base.join("jobs")?)
        .header(reqwest::header::CONTENT_TYPE, &content_type)
        .body(media)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("submission rejected ({}): {}", status, body);
    }

    let handle: JobHandle = resp.json().await?;
    Output::success(&format!("Created job {}", handle.id));

    if wait {
        let view = poll_until_terminal(&client, &base, handle.id).await?;
        print_outcome(&view);
    } else {
        Output::kv("Check status", &format!("skriv status {}", handle.id));
        Output::kv("Follow", &format!("skriv status --follow {}", handle.id));
    }

    Ok(())
}

/// Guess a content type from the file extension.
fn guess_content_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("talk.mp3")), "audio/mpeg");
        assert_eq!(guess_content_type(Path::new("Talk.WAV")), "audio/wav");
        assert_eq!(guess_content_type(Path::new("clip.mov")), "video/quicktime");
        assert_eq!(
            guess_content_type(Path::new("unknown.xyz")),
            "application/octet-stream"
        );
        assert_eq!(
            guess_content_type(Path::new("noextension")),
            "application/octet-stream"
        );
    }
}
