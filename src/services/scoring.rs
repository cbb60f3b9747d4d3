//! Driver emotion scoring through a vision-capable chat model.

use crate::config::EmotionConfig;
use crate::emotion::EmotionScore;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{ChatMessage, SessionContext};
use crate::services::{EmotionScorer, endpoint, http_client, pick_key, provider_message};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rating instructions sent as the system message.
pub const SCORING_PROMPT: &str = "你是一个情绪分析专家，负责分析驾驶员的情绪并评估其对驾驶安全的影响。你将观察驾驶员的行为、面部表情和对话内容，以判断驾驶员当前的情绪状态。基于情绪对驾驶安全的潜在影响，请根据以下标准评估情绪的严重程度，并将其划分为0到9的等级：0：情绪极佳，完全不会影响驾驶。2：情绪良好，可能会有轻微影响，但不至于影响驾驶安全。5：情绪中等，可能会导致注意力分散或轻微的驾驶干扰。7：情绪较严重，可能会显著影响驾驶集中力或判断。9：情绪非常严重，可能导致危险驾驶或完全失去对车辆控制。当你评估时，只有以下情绪对驾驶影响需要考虑：愤怒、悲伤、惊恐、厌恶、惊讶、过于开心、身体不适。请根据情绪的严重程度给出一个等级（0-9）。如果你无法判断当前情绪状态是否会影响驾驶，请输出5。请仅返回一个数字，并避免任何其他文字描述。";

/// Scores via `{api_url}/chat/completions` with a short, low-temperature reply.
pub struct VisionEmotionScorer {
    client: reqwest::Client,
    config: EmotionConfig,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl VisionEmotionScorer {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: EmotionConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(None)?,
            config,
        })
    }

    fn request_body(&self, text: &str, image_url: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                ChatMessage::system(SCORING_PROMPT),
                ChatMessage::user_with_image(text, image_url),
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }
}

#[async_trait]
impl EmotionScorer for VisionEmotionScorer {
    async fn score(
        &self,
        text: &str,
        image_url: Option<&str>,
        session: &SessionContext,
    ) -> Result<Option<EmotionScore>> {
        let key = pick_key(session, &self.config.api_key).ok_or_else(|| {
            AssistantError::Config("no API key provided for emotion recognition".into())
        })?;
        if text.trim().is_empty() {
            return Err(AssistantError::Emotion("missing text".into()));
        }

        let started = Instant::now();
        let response = self
            .client
            .post(endpoint(&self.config.api_url, "chat/completions"))
            .bearer_auth(&key)
            .json(&self.request_body(text, image_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("emotion scoring HTTP {}", status.as_u16());
            return Err(AssistantError::Emotion(format!(
                "HTTP {}: {}",
                status.as_u16(),
                provider_message(&body)
            )));
        }

        let body: CompletionBody = response
            .json()
            .await
            .map_err(|e| AssistantError::Emotion(format!("invalid completion body: {e}")))?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        debug!("emotion reply: {reply:?}");

        let score = EmotionScore::parse_reply(&reply);
        info!(
            "emotion score {} in {}ms",
            score.map_or_else(|| "null".to_owned(), |s| s.to_string()),
            started.elapsed().as_millis()
        );
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn body_carries_prompt_text_and_image() {
        let scorer = VisionEmotionScorer::new(EmotionConfig::default()).unwrap();
        let body = scorer.request_body("我很生气", Some("https://tmpfiles.org/dl/1/image.jpg"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][0]["text"], "我很生气");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "https://tmpfiles.org/dl/1/image.jpg"
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let scorer = VisionEmotionScorer::new(EmotionConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..EmotionConfig::default()
        })
        .unwrap();
        let err = scorer
            .score("hi", None, &SessionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}
