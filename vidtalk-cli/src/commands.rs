//! Subcommand handlers.
//!
//! Each handler receives the loaded settings and returns `anyhow::Result`.
//! Blocking REST calls run on the main thread; only `live` starts a tokio
//! runtime, for Ctrl-C handling and event forwarding.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use vidtalk_core::audio::buffer::decode;
use vidtalk_core::audio::device::{list_input_devices, list_output_devices, DeviceInfo};
use vidtalk_core::live::{normalize_voice, SessionObservers};
use vidtalk_core::playback::PlaybackOutput;
use vidtalk_core::service::language::normalize_language_tag;
use vidtalk_core::{
    CpalInput, CpalPlayback, CpalPlaybackDevice, EncodedChunk, GeminiLiveTransport, GenAiClient,
    LiveBackends, LiveSession, PlaybackScheduler, SessionPhase, SystemContext, VideoInput,
};

use crate::cli::{Command, ConfigAction};
use crate::settings::{save_settings, AppSettings, API_KEY_ENV};
use crate::wav::write_wav;

/// Extra wait past the scheduled end before giving up on the output clock.
const PLAYBACK_DRAIN_GRACE: Duration = Duration::from_secs(3);

pub fn run(command: Command, settings_path: &Path, mut settings: AppSettings) -> Result<()> {
    match command {
        Command::Summarize {
            file,
            link,
            language,
            speak,
        } => summarize(&mut settings, settings_path, file, link, language, speak),
        Command::Speak {
            text,
            voice,
            wav,
            output_device,
        } => {
            let client = client_for(&settings)?;
            let voice = voice.map(|v| normalize_voice(&v)).unwrap_or_else(|| settings.voice.clone());
            let output_device = output_device.or_else(|| settings.preferred_output_device.clone());
            speak(&client, &text, &voice, wav.as_deref(), output_device.as_deref())
        }
        Command::Live {
            context,
            context_file,
            voice,
            language,
            input_device,
            output_device,
            json_events,
        } => {
            let text = resolve_context(&settings, context, context_file)?;
            let voice = voice.unwrap_or_else(|| settings.voice.clone());
            let language = language.unwrap_or_else(|| settings.language.clone());
            let options = LiveOptions {
                input_device: input_device.or_else(|| settings.preferred_input_device.clone()),
                output_device: output_device.or_else(|| settings.preferred_output_device.clone()),
                json_events,
            };
            live(&settings, SystemContext::new(text, &voice, &language), options)
        }
        Command::Devices { json } => devices(json),
        Command::Config { action } => config(action, settings_path, settings),
    }
}

fn client_for(settings: &AppSettings) -> Result<GenAiClient> {
    let api_key = require_api_key(settings)?;
    GenAiClient::new(settings.client_config(api_key)).context("building HTTP client")
}

fn require_api_key(settings: &AppSettings) -> Result<String> {
    settings.resolve_api_key().ok_or_else(|| {
        anyhow!("no API key: set {API_KEY_ENV} or run `vidtalk config set apiKey <key>`")
    })
}

// ---------------------------------------------------------------------------
// summarize / speak
// ---------------------------------------------------------------------------

fn summarize(
    settings: &mut AppSettings,
    settings_path: &Path,
    file: Option<PathBuf>,
    link: Option<String>,
    language: Option<String>,
    read_aloud: bool,
) -> Result<()> {
    let video = match (file, link) {
        (Some(path), _) => VideoInput::from_file(&path)?,
        (None, Some(link)) => VideoInput::from_link(&link)?,
        (None, None) => bail!("pass a video file or --link"),
    };
    let language = normalize_language_tag(language.as_deref().unwrap_or(&settings.language));
    let client = client_for(settings)?;

    let started = Instant::now();
    let summary = client.summarize(&video, &language)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, chars = summary.len(), "summarize finished");

    println!("{summary}");

    settings.last_summary = Some(summary.clone());
    if let Err(e) = save_settings(settings_path, settings) {
        warn!("could not store summary for `live`: {e}");
    }

    if read_aloud {
        let output_device = settings.preferred_output_device.clone();
        speak(&client, &summary, &settings.voice, None, output_device.as_deref())?;
    }
    Ok(())
}

fn speak(
    client: &GenAiClient,
    text: &str,
    voice: &str,
    wav: Option<&Path>,
    output_device: Option<&str>,
) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        bail!("nothing to say");
    }
    let chunk = client.synthesize_speech(text, Some(voice))?;
    debug!(bytes = chunk.data.len(), rate = chunk.sample_rate, "speech synthesized");

    match wav {
        Some(path) => {
            let unit = decode(&chunk.data, chunk.sample_rate, chunk.channels)?;
            let seconds = unit.duration();
            write_wav(path, &unit.into_buffer())?;
            info!(path = %path.display(), seconds, "speech written");
            Ok(())
        }
        None => play_to_end(&chunk, output_device),
    }
}

/// Play one chunk on the speaker and block until the output clock passes its end.
fn play_to_end(chunk: &EncodedChunk, output_device: Option<&str>) -> Result<()> {
    let mut output = CpalPlayback::open(output_device)?;
    let mut scheduler = PlaybackScheduler::new();
    let scheduled = scheduler.schedule_chunk(&mut output, chunk)?;

    let deadline = Instant::now() + Duration::from_secs_f64(scheduled.end_time()) + PLAYBACK_DRAIN_GRACE;
    while output.current_time() < scheduled.end_time() {
        if Instant::now() >= deadline {
            warn!("output clock stalled, stopping playback early");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    debug!(queued = output.queued_units(), "playback finished");
    output.close();
    Ok(())
}

// ---------------------------------------------------------------------------
// live
// ---------------------------------------------------------------------------

struct LiveOptions {
    input_device: Option<String>,
    output_device: Option<String>,
    json_events: bool,
}

/// Grounding text: `--context`, then `--context-file`, then the last summary.
fn resolve_context(
    settings: &AppSettings,
    context: Option<String>,
    context_file: Option<PathBuf>,
) -> Result<String> {
    let text = match (context, context_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => settings
            .last_summary
            .clone()
            .ok_or_else(|| anyhow!("no summary yet: run `vidtalk summarize` first or pass --context"))?,
    };
    let text = text.trim();
    if text.is_empty() {
        bail!("grounding context is empty");
    }
    Ok(text.to_string())
}

fn live(settings: &AppSettings, context: SystemContext, options: LiveOptions) -> Result<()> {
    let api_key = require_api_key(settings)?;
    let backends = LiveBackends {
        transport: Box::new(GeminiLiveTransport::new(api_key)),
        input: Arc::new(CpalInput::new(options.input_device)),
        playback: Box::new(CpalPlaybackDevice::new(options.output_device)),
    };

    let observers = SessionObservers::default();
    let status_rx = observers.status.subscribe();
    let playback_rx = observers.playback.subscribe();

    info!(voice = %context.voice, language = %context.language, model = %settings.live_model, "starting live session");
    let mut session =
        LiveSession::start_with_observers(settings.live_config(), backends, context, observers)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let outcome = runtime.block_on(forward_events(status_rx, playback_rx, options.json_events));

    session.close();
    let diagnostics = session.diagnostics();
    info!(
        frames_sent = diagnostics.frames_sent,
        messages_received = diagnostics.messages_received,
        units_scheduled = diagnostics.units_scheduled,
        units_dropped = diagnostics.units_dropped,
        "live session finished"
    );
    if options.json_events {
        println!("{}", json!({ "type": "diagnostics", "event": diagnostics }));
    }

    match outcome {
        LiveOutcome::Failed(error) => Err(anyhow!("live session ended: {error}")),
        LiveOutcome::Interrupted | LiveOutcome::Ended => Ok(()),
    }
}

enum LiveOutcome {
    Interrupted,
    Ended,
    Failed(String),
}

async fn forward_events(
    mut status_rx: tokio::sync::broadcast::Receiver<vidtalk_core::SessionStatusEvent>,
    mut playback_rx: tokio::sync::broadcast::Receiver<vidtalk_core::PlaybackEvent>,
    json_events: bool,
) -> LiveOutcome {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if !json_events {
        eprintln!("Connecting... press Ctrl-C to hang up.");
    }

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, closing session");
                return LiveOutcome::Interrupted;
            }
            status = status_rx.recv() => match status {
                Ok(event) => {
                    if json_events {
                        println!("{}", json!({ "type": "status", "event": event }));
                    } else if event.phase == SessionPhase::Open {
                        eprintln!("Connected. Start talking.");
                    }
                    if event.phase == SessionPhase::Closed {
                        return match event.error {
                            Some(error) => LiveOutcome::Failed(error),
                            None => LiveOutcome::Ended,
                        };
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => return LiveOutcome::Ended,
            },
            playback = playback_rx.recv() => match playback {
                Ok(event) => {
                    if json_events {
                        println!("{}", json!({ "type": "playback", "event": event }));
                    } else {
                        debug!(seq = event.seq, start = event.start_time, duration = event.duration, "unit scheduled");
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("playback receiver lagged by {n} events"),
                Err(RecvError::Closed) => return LiveOutcome::Ended,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// devices / config
// ---------------------------------------------------------------------------

fn devices(as_json: bool) -> Result<()> {
    let inputs = list_input_devices();
    let outputs = list_output_devices();
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "inputs": inputs, "outputs": outputs }))?
        );
        return Ok(());
    }
    print_devices("Microphones", &inputs);
    print_devices("Speakers", &outputs);
    Ok(())
}

fn print_devices(title: &str, devices: &[DeviceInfo]) {
    println!("{title}:");
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in devices {
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if device.is_loopback_like {
            tags.push("loopback?");
        }
        if tags.is_empty() {
            println!("  {}", device.name);
        } else {
            println!("  {} [{}]", device.name, tags.join(", "));
        }
    }
}

fn config(action: ConfigAction, settings_path: &Path, mut settings: AppSettings) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", settings_path.display()),
        ConfigAction::Show => {
            let mut shown = settings;
            if shown.api_key.is_some() {
                shown.api_key = Some("<redacted>".into());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Set { key, value } => {
            apply_setting(&mut settings, &key, &value)?;
            settings.normalize();
            save_settings(settings_path, &settings)
                .with_context(|| format!("writing {}", settings_path.display()))?;
            info!(key = %key, "setting saved");
        }
    }
    Ok(())
}

/// Apply one `config set` pair. Keys accept camelCase or kebab-case; an
/// empty value clears optional fields.
fn apply_setting(settings: &mut AppSettings, key: &str, value: &str) -> Result<()> {
    let optional = || Some(value.to_string()).filter(|v| !v.trim().is_empty());
    match key.replace('-', "").to_ascii_lowercase().as_str() {
        "apikey" => settings.api_key = optional(),
        "voice" => settings.voice = value.into(),
        "language" => settings.language = value.into(),
        "inputdevice" | "preferredinputdevice" => settings.preferred_input_device = optional(),
        "outputdevice" | "preferredoutputdevice" => settings.preferred_output_device = optional(),
        "livemodel" => settings.live_model = value.into(),
        "summarymodel" => settings.summary_model = value.into(),
        "ttsmodel" => settings.tts_model = value.into(),
        "requesttimeoutsecs" | "timeout" => {
            settings.request_timeout_secs = value
                .trim()
                .parse()
                .with_context(|| format!("`{value}` is not a number of seconds"))?;
        }
        "lastsummary" => settings.last_summary = optional(),
        _ => bail!("unknown setting `{key}`"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_setting_accepts_both_key_styles() {
        let mut settings = AppSettings::default();
        apply_setting(&mut settings, "output-device", "USB Speakers").unwrap();
        apply_setting(&mut settings, "ttsModel", "custom-tts").unwrap();
        apply_setting(&mut settings, "timeout", " 30 ").unwrap();

        assert_eq!(settings.preferred_output_device.as_deref(), Some("USB Speakers"));
        assert_eq!(settings.tts_model, "custom-tts");
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn apply_setting_clears_optional_values() {
        let mut settings = AppSettings {
            api_key: Some("secret".into()),
            ..AppSettings::default()
        };
        apply_setting(&mut settings, "apiKey", "").unwrap();
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn apply_setting_rejects_unknown_keys_and_bad_numbers() {
        let mut settings = AppSettings::default();
        assert!(apply_setting(&mut settings, "colour", "blue").is_err());
        assert!(apply_setting(&mut settings, "timeout", "soon").is_err());
    }

    #[test]
    fn context_prefers_flag_then_file_then_last_summary() {
        let settings = AppSettings {
            last_summary: Some("stored summary".into()),
            ..AppSettings::default()
        };
        assert_eq!(
            resolve_context(&settings, Some(" flag text ".into()), None).unwrap(),
            "flag text"
        );

        let path = std::env::temp_dir().join(format!("vidtalk-context-{}.txt", std::process::id()));
        std::fs::write(&path, "from file\n").unwrap();
        let from_file = resolve_context(&settings, None, Some(path.clone())).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(from_file, "from file");

        assert_eq!(resolve_context(&settings, None, None).unwrap(), "stored summary");
    }

    #[test]
    fn context_is_required() {
        let settings = AppSettings::default();
        assert!(resolve_context(&settings, None, None).is_err());
        assert!(resolve_context(&settings, Some("   ".into()), None).is_err());
    }
}
