//! Error types for the lingban turn pipeline.

/// Top-level error type for capture, compositing, and collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Camera / frame source error.
    #[error("video error: {0}")]
    Video(String),

    /// Image decode, resize, or encode error.
    #[error("image error: {0}")]
    Image(String),

    /// Speech-to-text collaborator error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Emotion-scoring collaborator error.
    #[error("emotion error: {0}")]
    Emotion(String),

    /// Chat-completion collaborator error.
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech collaborator error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Asset publisher (image host) error.
    #[error("upload error: {0}")]
    Upload(String),

    /// Audio decode or output error while speaking a reply.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error, including missing credentials.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A collaborator call exceeded its deadline.
    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: &'static str, secs: u64 },

    /// Network-level failure (connect, timeout, broken body) talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    /// Whether the failure is transport-level and worth another attempt.
    ///
    /// Provider rejections (bad key, bad request, `error` payloads) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            Self::Network(e.to_string())
        } else {
            Self::Pipeline(format!("HTTP client error: {e}"))
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(AssistantError::Network("connection refused".into()).is_retryable());
        assert!(
            AssistantError::Timeout {
                what: "speech-to-text",
                secs: 30
            }
            .is_retryable()
        );
    }

    #[test]
    fn provider_rejections_are_not_retryable() {
        assert!(!AssistantError::Stt("invalid language".into()).is_retryable());
        assert!(!AssistantError::Config("no API key provided".into()).is_retryable());
    }

    #[test]
    fn timeout_display_names_the_stage() {
        let e = AssistantError::Timeout {
            what: "chat completion",
            secs: 60,
        };
        assert_eq!(e.to_string(), "timed out after 60s waiting for chat completion");
    }
}
