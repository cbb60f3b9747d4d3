//! Message types passed between pipeline stages and collaborators.

use crate::config::SessionConfig;
use crate::emotion::EmotionScore;
use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A chunk of raw audio samples from the microphone.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples at the configured input sample rate.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this chunk was captured.
    pub captured_at: Instant,
}

/// A finalized utterance emitted by the silence detector.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Samples for the whole utterance, including trailing silence.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When recording of this clip started.
    pub started_at: Instant,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit PCM mono WAV for upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAV writer fails.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| AssistantError::Audio(format!("cannot start WAV: {e}")))?;
            for &s in &self.samples {
                let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                writer
                    .write_sample(v)
                    .map_err(|e| AssistantError::Audio(format!("cannot write WAV: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| AssistantError::Audio(format!("cannot finalize WAV: {e}")))?;
        }
        Ok(cursor.into_inner())
    }
}

/// Synthesized speech returned by the TTS collaborator.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Encoded audio (mp3/wav) as returned by the provider.
    pub bytes: bytes::Bytes,
    /// MIME type reported by the provider, if any.
    pub content_type: Option<String>,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// URL of the first image part.
    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                ContentPart::Text { .. } => None,
            }),
        }
    }
}

/// A single chat message in OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn carrying the transcript and, when available, the frame grid.
    pub fn user_with_image(text: impl Into<String>, image_url: Option<&str>) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        if let Some(url) = image_url {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.to_owned(),
                },
            });
        }
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Per-session selectors and credential forwarded to every collaborator.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Chat session identifier.
    pub session_id: String,
    /// User-supplied bearer token (may be empty).
    pub token: String,
    pub lang: String,
    pub voice_mode: String,
    pub scene: String,
}

impl SessionContext {
    /// A fresh session with a random identifier.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            token: config.token.clone(),
            lang: config.lang.clone(),
            voice_mode: config.voice_mode.clone(),
            scene: config.scene.clone(),
        }
    }

    /// The user token, if one was supplied.
    pub fn bearer(&self) -> Option<&str> {
        let t = self.token.trim();
        (!t.is_empty()).then_some(t)
    }
}

/// Summary of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub transcript: String,
    pub image_url: Option<String>,
    pub frames_used: usize,
    pub emotion: Option<EmotionScore>,
    pub reply: String,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn user_message_serializes_to_openai_parts() {
        let msg = ChatMessage::user_with_image("turn up the AC", Some("https://img/x.jpg"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "turn up the AC"},
                    {"type": "image_url", "image_url": {"url": "https://img/x.jpg"}}
                ]
            })
        );
        assert_eq!(msg.content.image_url(), Some("https://img/x.jpg"));
    }

    #[test]
    fn user_message_without_image_has_only_text_part() {
        let msg = ChatMessage::user_with_image("hello", None);
        match &msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 1),
            MessageContent::Text(_) => panic!("expected parts"),
        }
        assert_eq!(msg.content.text(), "hello");
        assert_eq!(msg.content.image_url(), None);
    }

    #[test]
    fn assistant_message_is_plain_string() {
        let json = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }

    #[test]
    fn wav_encoding_has_riff_header_and_length() {
        let clip = AudioClip {
            samples: vec![0.0, 0.5, -0.5, 1.0],
            sample_rate: 16_000,
            started_at: Instant::now(),
        };
        let wav = clip.to_wav_bytes().unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 4 * 2);

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn clip_duration_from_samples() {
        let clip = AudioClip {
            samples: vec![0.0; 8_000],
            sample_rate: 16_000,
            started_at: Instant::now(),
        };
        assert_eq!(clip.duration(), Duration::from_millis(500));
    }

    #[test]
    fn blank_token_is_no_bearer() {
        let ctx = SessionContext {
            token: "  ".into(),
            ..SessionContext::default()
        };
        assert_eq!(ctx.bearer(), None);
    }
}
