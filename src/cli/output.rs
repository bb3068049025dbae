//! CLI output formatting utilities.

use crate::job_store::{JobState, JobView};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Style a job state with its conventional color.
    pub fn state(state: JobState) -> StyledObject<String> {
        let text = state.to_string();
        match state {
            JobState::Pending => style(text).yellow(),
            JobState::Running => style(text).cyan(),
            JobState::Succeeded => style(text).green(),
            JobState::Failed => style(text).red(),
            JobState::Cancelled => style(text).dim(),
        }
    }

    /// Print a one-line summary of a job.
    pub fn job_line(view: &JobView) {
        println!(
            "  {} {} ({}, attempt {}, updated {})",
            style("*").cyan(),
            style(view.id.to_string()).bold(),
            Self::state(view.state),
            view.attempts,
            view.updated_at.format("%H:%M:%S")
        );
    }

    /// Print a finished transcript with per-segment timestamps.
    pub fn transcript(result: &crate::transcription::TranscriptionResult) {
        if result.text.is_empty() {
            Self::info("Transcript is empty (no speech detected).");
            return;
        }

        for segment in &result.segments {
            println!(
                "  {} {}",
                style(format!(
                    "[{} - {}]",
                    format_timestamp(segment.start_seconds),
                    format_timestamp(segment.end_seconds)
                ))
                .dim(),
                segment.text
            );
        }
        println!();
        Self::kv("Confidence", &format!("{:.2}", result.confidence));
        if let Some(lang) = &result.language {
            Self::kv("Language", lang);
        }
        Self::kv(
            "Duration",
            &format_timestamp(result.duration_seconds),
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(65.0), "01:05");
        assert_eq!(format_timestamp(3665.0), "01:01:05");
    }
}
