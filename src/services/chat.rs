//! Streaming chat completion (OpenAI-compatible SSE).

use crate::config::ChatConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{ChatMessage, SessionContext};
use crate::services::sse::{SseEvent, SseLineParser};
use crate::services::{ChatCompletion, endpoint, http_client, pick_key, provider_message};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Posts the full history with `stream=true` and assembles the deltas.
pub struct StreamingChat {
    client: reqwest::Client,
    config: ChatConfig,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Text carried by one SSE event, if any. Malformed payloads are skipped.
fn delta_text(event: &SseEvent) -> Option<String> {
    match serde_json::from_str::<ChunkBody>(&event.data) {
        Ok(body) => body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|t| !t.is_empty()),
        Err(e) => {
            debug!("skipping unparseable stream chunk: {e}");
            None
        }
    }
}

impl StreamingChat {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ChatConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(None)?,
            config,
        })
    }

    fn api_key(&self, session: &SessionContext) -> Option<String> {
        let scene = if session.scene.is_empty() {
            "demo"
        } else {
            session.scene.as_str()
        };
        let scene_key = self
            .config
            .scene_keys
            .get(scene)
            .map(String::as_str)
            .unwrap_or_default();
        pick_key(session, scene_key)
    }

    fn request_body(&self, history: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "stream": true,
            "temperature": self.config.temperature,
            "messages": history,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatCompletion for StreamingChat {
    async fn complete(
        &self,
        history: &[ChatMessage],
        session: &SessionContext,
        on_delta: &(dyn for<'d> Fn(&'d str) + Send + Sync),
    ) -> Result<String> {
        let key = self
            .api_key(session)
            .ok_or_else(|| AssistantError::Config("no chat API key provided".into()))?;

        let started = Instant::now();
        let response = self
            .client
            .post(endpoint(&self.config.api_url, "chat/completions"))
            .bearer_auth(&key)
            .json(&self.request_body(history))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Chat(format!(
                "HTTP {}: {}",
                status.as_u16(),
                provider_message(&body)
            )));
        }

        let mut parser = SseLineParser::new();
        let mut reply = String::new();
        let mut stream = response.bytes_stream();
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in parser.push(&chunk) {
                if event.is_done() {
                    done = true;
                    break 'read;
                }
                if let Some(text) = delta_text(&event) {
                    on_delta(&text);
                    reply.push_str(&text);
                }
            }
        }
        if !done {
            debug!("chat stream ended without [DONE]");
            if let Some(event) = parser.flush()
                && !event.is_done()
                && let Some(text) = delta_text(&event)
            {
                on_delta(&text);
                reply.push_str(&text);
            }
        }

        if reply.trim().is_empty() {
            warn!("chat stream produced no text");
            return Err(AssistantError::Chat("empty reply".into()));
        }
        info!(
            "chat reply: {} chars in {}ms (scene {})",
            reply.chars().count(),
            started.elapsed().as_millis(),
            session.scene
        );
        Ok(reply)
    }
}
