//! vidtalk command-line entry point.
//!
//! ## Runtime note
//!
//! `main` is synchronous. The REST client is blocking and must not run
//! inside an async context, so only the `live` command builds a tokio
//! runtime, and only for signal handling and event forwarding.

mod cli;
mod commands;
mod settings;
mod wav;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use cli::{init_tracing, Args};
use settings::{default_settings_path, load_settings};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        voice = %settings.voice,
        language = %settings.language,
        live_model = %settings.live_model,
        "settings loaded"
    );
    debug!(command = ?args.command, "dispatching");

    commands::run(args.command, &settings_path, settings)
}
