//! CLI module for Skriv.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Skriv - Asynchronous Transcription Jobs
///
/// An HTTP service that accepts audio/video uploads and transcribes them on a
/// bounded worker pool. The name "Skriv" comes from the Norwegian word for
/// "write."
#[derive(Parser, Debug)]
#[command(name = "skriv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the transcription job server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Upload a media file as a new transcription job
    Submit {
        /// Path to the audio/video file
        file: String,

        /// Declared content type (guessed from the extension if omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Server base URL (defaults to the configured server)
        #[arg(short, long)]
        server: Option<String>,

        /// Block until the job reaches a terminal state
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the status of a job
    Status {
        /// Job ID returned at submission
        job_id: String,

        /// Server base URL (defaults to the configured server)
        #[arg(short, long)]
        server: Option<String>,

        /// Keep polling until the job reaches a terminal state
        #[arg(short, long)]
        follow: bool,
    },

    /// Request cancellation of a job
    Cancel {
        /// Job ID returned at submission
        job_id: String,

        /// Server base URL (defaults to the configured server)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write a default configuration file
    Init,

    /// Show configuration file path
    Path,
}
