//! Remote collaborators consumed by a turn.
//!
//! Each collaborator sits behind a narrow async trait so the orchestrator can
//! be driven by in-memory fakes. The HTTP implementations follow the wire
//! formats of the hosted providers the assistant talks to.

pub mod chat;
pub mod publish;
pub mod scoring;
pub mod sse;
pub mod stt;
pub mod tts;

use crate::audio::playback::{AudioPlayer, SpeakerPlayer};
use crate::config::AssistantConfig;
use crate::emotion::EmotionScore;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{AudioClip, ChatMessage, SessionContext, SynthesizedAudio};
use crate::video::grid::CompositeImage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use chat::StreamingChat;
pub use publish::TmpFilesPublisher;
pub use scoring::VisionEmotionScorer;
pub use stt::WhisperStt;
pub use tts::HttpTts;

/// Speech-to-text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one finalized utterance in the session language.
    async fn transcribe(&self, clip: &AudioClip, session: &SessionContext) -> Result<String>;
}

/// Driver emotion scoring from transcript and frame grid.
#[async_trait]
pub trait EmotionScorer: Send + Sync {
    /// `Ok(None)` when the model declines to rate.
    async fn score(
        &self,
        text: &str,
        image_url: Option<&str>,
        session: &SessionContext,
    ) -> Result<Option<EmotionScore>>;
}

/// Streaming chat completion.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Stream a reply to `history`, calling `on_delta` for each text fragment,
    /// and return the assembled message once the stream finishes.
    async fn complete(
        &self,
        history: &[ChatMessage],
        session: &SessionContext,
        on_delta: &(dyn for<'d> Fn(&'d str) + Send + Sync),
    ) -> Result<String>;
}

/// Text-to-speech.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, session: &SessionContext) -> Result<SynthesizedAudio>;
}

/// Publishes an image and returns a publicly fetchable URL.
#[async_trait]
pub trait AssetPublisher: Send + Sync {
    async fn publish(&self, image: &CompositeImage) -> Result<String>;
}

/// Everything a turn talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub emotion: Arc<dyn EmotionScorer>,
    pub chat: Arc<dyn ChatCompletion>,
    pub tts: Arc<dyn TextToSpeech>,
    pub publisher: Arc<dyn AssetPublisher>,
    pub player: Arc<dyn AudioPlayer>,
}

impl Collaborators {
    /// Build the HTTP collaborators and the speaker player from config.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Ok(Self {
            stt: Arc::new(WhisperStt::new(config.stt.clone())?),
            emotion: Arc::new(VisionEmotionScorer::new(config.emotion.clone())?),
            chat: Arc::new(StreamingChat::new(config.chat.clone())?),
            tts: Arc::new(HttpTts::new(config.tts.clone())?),
            publisher: Arc::new(TmpFilesPublisher::new(config.upload.clone())?),
            player: Arc::new(SpeakerPlayer::new(config.audio.clone())),
        })
    }
}

pub(crate) fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| AssistantError::Config(format!("cannot build HTTP client: {e}")))
}

/// `{base}/{path}` without doubled slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Session token first, then the configured key.
pub(crate) fn pick_key(session: &SessionContext, configured: &str) -> Option<String> {
    session
        .bearer()
        .map(str::to_owned)
        .or_else(|| {
            let k = configured.trim();
            (!k.is_empty()).then(|| k.to_owned())
        })
}

/// Pull a readable message out of a provider error body.
pub(crate) fn provider_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let err = v.get("error")?;
        err.get("message")
            .and_then(|m| m.as_str())
            .or_else(|| err.as_str())
            .map(str::to_owned)
    });
    message.unwrap_or_else(|| {
        let trimmed = body.trim();
        trimmed.chars().take(200).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/audio/speech"),
            "https://api.openai.com/v1/audio/speech"
        );
        assert_eq!(endpoint("http://h", "chat/completions"), "http://h/chat/completions");
    }

    #[test]
    fn session_token_wins_over_configured_key() {
        let mut session = SessionContext::default();
        assert_eq!(pick_key(&session, "  "), None);
        assert_eq!(pick_key(&session, "cfg"), Some("cfg".into()));
        session.token = "user".into();
        assert_eq!(pick_key(&session, "cfg"), Some("user".into()));
    }

    #[test]
    fn provider_message_prefers_error_message() {
        assert_eq!(provider_message(r#"{"error":{"message":"bad key"}}"#), "bad key");
        assert_eq!(provider_message(r#"{"error":"quota"}"#), "quota");
        assert_eq!(provider_message("upstream down"), "upstream down");
    }
}
