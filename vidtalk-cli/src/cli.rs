//! Command-line arguments and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// vidtalk - summarize a video, then talk about it out loud
#[derive(Parser, Debug)]
#[command(name = "vidtalk")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (defaults to the user data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize a video file or link and remember the result for `live`
    Summarize {
        /// Local video file (max 20 MiB)
        #[arg(required_unless_present = "link", conflicts_with = "link")]
        file: Option<PathBuf>,

        /// Public http(s) link to a video
        #[arg(long)]
        link: Option<String>,

        /// Response language tag, e.g. `en`, `es`, `pt-BR`
        #[arg(long)]
        language: Option<String>,

        /// Read the summary aloud after printing it
        #[arg(long)]
        speak: bool,
    },

    /// Synthesize speech for a piece of text
    Speak {
        text: String,

        #[arg(long)]
        voice: Option<String>,

        /// Write a WAV file instead of playing through the speaker
        #[arg(long, value_name = "PATH")]
        wav: Option<PathBuf>,

        #[arg(long)]
        output_device: Option<String>,
    },

    /// Start a live spoken conversation grounded in a summary
    Live {
        /// Grounding text (defaults to the last summary)
        #[arg(long, conflicts_with = "context_file")]
        context: Option<String>,

        /// Read grounding text from a file
        #[arg(long, value_name = "PATH")]
        context_file: Option<PathBuf>,

        #[arg(long)]
        voice: Option<String>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        input_device: Option<String>,

        #[arg(long)]
        output_device: Option<String>,

        /// Print status and playback events as JSON lines on stdout
        #[arg(long)]
        json_events: bool,
    },

    /// List audio devices
    Devices {
        #[arg(long)]
        json: bool,
    },

    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print current settings (API key redacted)
    Show,
    /// Print the settings file path
    Path,
    /// Set one value, e.g. `vidtalk config set voice Kore`
    Set { key: String, value: String },
}

impl Args {
    fn level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Logs go to stderr so `--json-events` output on stdout stays clean.
/// `RUST_LOG` overrides the verbosity flags.
pub fn init_tracing(args: &Args) {
    let fallback = format!("vidtalk={}", args.level());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}
