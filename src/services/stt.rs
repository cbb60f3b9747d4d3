//! Whisper-compatible speech-to-text over HTTP.

use crate::config::SttConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{AudioClip, SessionContext};
use crate::services::{SpeechToText, endpoint, http_client, provider_message};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Multipart upload to `{api_url}/audio/transcriptions`.
///
/// Network-level failures are retried up to `max_retries` times with a
/// linearly growing pause; provider rejections fail immediately.
pub struct WhisperStt {
    client: reqwest::Client,
    config: SttConfig,
}

impl WhisperStt {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SttConfig) -> Result<Self> {
        let client = http_client(Some(Duration::from_secs(config.timeout_secs.max(1))))?;
        Ok(Self { client, config })
    }

    fn api_key(&self, session: &SessionContext) -> Option<String> {
        let configured = self.config.api_key.trim();
        if configured.is_empty() {
            session.bearer().map(str::to_owned)
        } else {
            Some(configured.to_owned())
        }
    }

    async fn attempt(&self, wav: &[u8], lang: &str, key: &str) -> Result<String> {
        let file = Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AssistantError::Stt(format!("bad upload part: {e}")))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.config.model.clone());
        if !lang.is_empty() {
            form = form.text("language", lang.to_owned());
        }

        let response = self
            .client
            .post(endpoint(&self.config.api_url, "audio/transcriptions"))
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AssistantError::Stt(format!(
                "HTTP {}: {}",
                status.as_u16(),
                provider_message(&body)
            )));
        }
        parse_transcription(&body)
    }
}

/// Extract `text` from a transcription body; an `error` field is a failure
/// even on HTTP 200.
fn parse_transcription(body: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AssistantError::Stt(format!("invalid transcription body: {e}")))?;
    if value.get("error").is_some_and(|e| !e.is_null()) {
        return Err(AssistantError::Stt(provider_message(body)));
    }
    value
        .get("text")
        .and_then(|t| t.as_str())
        .map(str::to_owned)
        .ok_or_else(|| AssistantError::Stt("transcription body has no text".into()))
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, clip: &AudioClip, session: &SessionContext) -> Result<String> {
        let key = self
            .api_key(session)
            .ok_or_else(|| AssistantError::Config("no STT API key provided".into()))?;
        let wav = clip.to_wav_bytes()?;
        info!(
            "STT request: {:.1}s audio, {} bytes, lang={}",
            clip.duration().as_secs_f32(),
            wav.len(),
            session.lang
        );

        let mut failures: u32 = 0;
        loop {
            let started = Instant::now();
            match self.attempt(&wav, &session.lang, &key).await {
                Ok(text) => {
                    info!(
                        "STT done in {}ms ({} chars)",
                        started.elapsed().as_millis(),
                        text.chars().count()
                    );
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && failures < self.config.max_retries => {
                    failures += 1;
                    let wait = Duration::from_millis(self.config.retry_backoff_ms * u64::from(failures));
                    warn!(
                        "STT attempt {failures}/{} failed ({e}); retrying in {}ms",
                        self.config.max_retries + 1,
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!(
                        "STT failed after {} attempt(s) (key length {}): {e}",
                        failures + 1,
                        key.len()
                    );
                    return Err(e);
                }
            }
        }
    }
}
