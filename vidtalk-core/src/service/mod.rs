//! Request/response calls to the Gemini REST API: video summarization and
//! one-shot speech synthesis.
//!
//! Request construction and response interpretation are plain functions so
//! they can be tested without a network; [`GenAiClient`] only adds the HTTP
//! round trip.

pub mod language;
pub mod media;

use std::time::Duration;

use tracing::{debug, info, warn};

use self::{language::language_directive, media::VideoInput};
use crate::{
    codec::EncodedChunk,
    error::{Result, VidtalkError},
    protocol::{
        ApiErrorBody, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
        Modality, Part, SpeechConfig,
    },
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SUMMARY_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

const SUMMARY_PROMPT: &str = "Summarize this video in a few short paragraphs. \
Describe what happens, the main points made, and any conclusion. \
This summary will ground a follow-up spoken conversation about the video.";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub summary_model: String,
    pub tts_model: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Body for a summary request: the video, then the prompt and language
/// directive.
pub fn summary_request(video: &VideoInput, language: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![
            video.to_part(),
            Part::text(format!("{SUMMARY_PROMPT} {}", language_directive(language))),
        ])],
        generation_config: None,
        system_instruction: None,
    }
}

/// Body for a text-to-speech request.
pub fn speech_request(text: &str, voice: Option<&str>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text(text)])],
        generation_config: Some(GenerationConfig {
            response_modalities: vec![Modality::Audio],
            speech_config: voice.map(SpeechConfig::voice),
        }),
        system_instruction: None,
    }
}

/// Concatenated text of the first candidate.
///
/// # Errors
/// `EmptyResponse` when there is no candidate text.
pub fn summary_text(response: &GenerateContentResponse) -> Result<String> {
    let text = response
        .first_content()
        .map(Content::joined_text)
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(VidtalkError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// First inline audio part of the first candidate.
///
/// # Errors
/// `Synthesis` when the response carries no audio; `MalformedAudio` when
/// its payload is not valid base64.
pub fn speech_audio(response: &GenerateContentResponse) -> Result<EncodedChunk> {
    let candidate = response.candidates.first();
    let blob = candidate
        .and_then(|c| c.content.as_ref())
        .and_then(|content| content.audio_blobs().next())
        .ok_or_else(|| {
            let reason = candidate
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".into());
            VidtalkError::Synthesis(reason)
        })?;
    EncodedChunk::from_transport(&blob.mime_type, &blob.data)
}

/// Blocking client for the REST endpoints.
pub struct GenAiClient {
    http: reqwest::blocking::Client,
    config: ClientConfig,
}

impl GenAiClient {
    /// # Errors
    /// `Http` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Summarize a video in the given language.
    pub fn summarize(&self, video: &VideoInput, language: &str) -> Result<String> {
        info!(video = %video.describe(), language, "requesting summary");
        let response = self.generate(&self.config.summary_model, &summary_request(video, language))?;
        let text = summary_text(&response)?;
        debug!(chars = text.len(), "summary received");
        Ok(text)
    }

    /// Synthesize `text` as 16-bit PCM speech.
    pub fn synthesize_speech(&self, text: &str, voice: Option<&str>) -> Result<EncodedChunk> {
        info!(chars = text.len(), voice = voice.unwrap_or("default"), "requesting speech");
        let response = self.generate(&self.config.tts_model, &speech_request(text, voice))?;
        let chunk = speech_audio(&response)?;
        debug!(bytes = chunk.data.len(), rate = chunk.sample_rate, "speech received");
        Ok(chunk)
    }

    fn generate(&self, model: &str, request: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model.trim_start_matches("models/")
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.config.api_key.as_str())
            .json(request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), model, "generateContent failed: {message}");
            return Err(VidtalkError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}
