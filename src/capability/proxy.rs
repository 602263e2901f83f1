//! HTTP client for the site's speech/completion proxy
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /transcribe`: multipart `file` + `model`, responds `{"text": "..."}`
//! - `POST /complete`: JSON `{"prompt": "..."}`, responds with free text
//! - `POST /synthesize`: JSON `{"text": "...", "voice": "..."}`, responds with audio bytes

use std::time::Duration;

use async_trait::async_trait;

use super::{Completer, Synthesizer, Transcriber};
use crate::config::BackendConfig;
use crate::voice::{AudioClip, MP3_MIME};
use crate::{Error, Result};

/// Response from the transcription endpoint
#[derive(serde::Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// Client for the speech/completion proxy
#[derive(Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    stt_model: String,
    tts_voice: String,
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("base_url", &self.base_url)
            .field("stt_model", &self.stt_model)
            .field("tts_voice", &self.tts_voice)
            .finish_non_exhaustive()
    }
}

impl ProxyClient {
    /// Create a client from backend configuration
    ///
    /// `timeout` bounds every request at the HTTP layer.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(config: &BackendConfig, timeout: Duration) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::Config("backend URL required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            stt_model: config.stt_model.clone(),
            tts_voice: config.tts_voice.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint(path));
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }
}

/// File extension the proxy expects for a MIME type
fn file_name_for(mime: &str) -> &'static str {
    match mime {
        "audio/webm" => "audio.webm",
        "audio/ogg" => "audio.ogg",
        "audio/mpeg" | "audio/mp3" => "audio.mp3",
        _ => "audio.wav",
    }
}

/// Pull text out of a transcription body
///
/// Accepts `{"text": ...}` JSON or a bare text body.
fn parse_transcript(body: &str) -> String {
    serde_json::from_str::<TranscribeResponse>(body)
        .map_or_else(|_| body.trim().to_string(), |r| r.text.trim().to_string())
}

#[async_trait]
impl Transcriber for ProxyClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        tracing::debug!(
            audio_bytes = clip.bytes.len(),
            mime = %clip.mime,
            "starting transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(clip.bytes.clone())
                    .file_name(file_name_for(&clip.mime))
                    .mime_str(&clip.mime)
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.stt_model.clone());

        let response = self
            .post("transcribe")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        let body = response.text().await.map_err(|e| Error::Stt(e.to_string()))?;
        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let transcript = parse_transcript(&body);
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Completer for ProxyClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        #[derive(serde::Serialize)]
        struct CompleteRequest<'a> {
            prompt: &'a str,
        }

        tracing::debug!(prompt_chars = prompt.len(), "requesting completion");

        let response = self
            .post("complete")
            .json(&CompleteRequest { prompt })
            .send()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Completion(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::Completion(format!("completion API error {status}: {body}")));
        }

        Ok(body.trim().to_string())
    }
}

#[async_trait]
impl Synthesizer for ProxyClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        #[derive(serde::Serialize)]
        struct SynthesizeRequest<'a> {
            text: &'a str,
            voice: &'a str,
        }

        let response = self
            .post("synthesize")
            .json(&SynthesizeRequest {
                text,
                voice: &self.tts_voice,
            })
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| MP3_MIME.to_string(), ToString::to_string);

        let audio = response.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        if audio.is_empty() {
            return Err(Error::Tts("empty audio response".to_string()));
        }

        Ok(AudioClip::new(audio.to_vec(), mime))
    }
}
