//! Text-to-speech over HTTP: OpenAI speech or Volcano Engine voice clone.

use crate::config::{OpenAiTtsConfig, TtsConfig, TtsProvider, VolcanoTtsConfig};
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{SessionContext, SynthesizedAudio};
use crate::services::{TextToSpeech, endpoint, http_client, provider_message};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Volcano success code.
const VOLCANO_OK: i64 = 3000;
const VOLCANO_RESOURCE_ID: &str = "volc.megatts.voiceclone";

/// Dispatches to the provider selected by config or the session voice mode.
pub struct HttpTts {
    client: reqwest::Client,
    config: TtsConfig,
}

#[derive(Debug, Serialize)]
struct VolcanoRequest<'a> {
    app: VolcanoApp<'a>,
    user: VolcanoUser<'a>,
    audio: VolcanoAudio<'a>,
    request: VolcanoText<'a>,
}

#[derive(Debug, Serialize)]
struct VolcanoApp<'a> {
    appid: &'a str,
    token: &'a str,
    cluster: &'a str,
}

#[derive(Debug, Serialize)]
struct VolcanoUser<'a> {
    uid: &'a str,
}

#[derive(Debug, Serialize)]
struct VolcanoAudio<'a> {
    voice_type: &'a str,
    encoding: &'a str,
    speed_ratio: f32,
}

#[derive(Debug, Serialize)]
struct VolcanoText<'a> {
    reqid: String,
    text: &'a str,
    operation: &'a str,
}

#[derive(Debug, Deserialize)]
struct VolcanoResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<String>,
}

impl HttpTts {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TtsConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(None)?,
            config,
        })
    }

    /// The configured override wins; otherwise the voice mode decides.
    pub fn provider_for(&self, session: &SessionContext) -> TtsProvider {
        self.config
            .provider
            .unwrap_or_else(|| TtsProvider::from_mode(&session.voice_mode))
    }

    async fn openai(&self, cfg: &OpenAiTtsConfig, text: &str) -> Result<SynthesizedAudio> {
        if cfg.api_key.trim().is_empty() {
            return Err(AssistantError::Config("no OpenAI TTS API key provided".into()));
        }
        let body = serde_json::json!({
            "model": cfg.model,
            "voice": cfg.voice,
            "input": text,
            "speed": cfg.speed,
            "response_format": "mp3",
        });
        let response = self
            .client
            .post(endpoint(&cfg.api_url, "audio/speech"))
            .bearer_auth(cfg.api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Tts(format!(
                "OpenAI HTTP {}: {}",
                status.as_u16(),
                provider_message(&body)
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .or_else(|| Some("audio/mpeg".to_owned()));
        let bytes = response.bytes().await?;
        Ok(SynthesizedAudio {
            bytes,
            content_type,
        })
    }

    async fn volcano(
        &self,
        cfg: &VolcanoTtsConfig,
        text: &str,
        session: &SessionContext,
    ) -> Result<SynthesizedAudio> {
        if cfg.token.trim().is_empty() || cfg.app_id.trim().is_empty() {
            return Err(AssistantError::Config("Volcano TTS app id/token not configured".into()));
        }
        let uid = if session.session_id.is_empty() {
            "lingban"
        } else {
            session.session_id.as_str()
        };
        let request = VolcanoRequest {
            app: VolcanoApp {
                appid: &cfg.app_id,
                token: &cfg.token,
                cluster: &cfg.cluster,
            },
            user: VolcanoUser { uid },
            audio: VolcanoAudio {
                voice_type: &cfg.voice_type,
                encoding: "mp3",
                speed_ratio: cfg.speed_ratio,
            },
            request: VolcanoText {
                reqid: uuid::Uuid::new_v4().to_string(),
                text,
                operation: "query",
            },
        };

        let response = self
            .client
            .post(&cfg.api_url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer;{}", cfg.token))
            .header("Resource-Id", VOLCANO_RESOURCE_ID)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Tts(format!(
                "Volcano HTTP {}: {}",
                status.as_u16(),
                provider_message(&body)
            )));
        }
        let body: VolcanoResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Tts(format!("invalid Volcano body: {e}")))?;
        decode_volcano(body)
    }
}

fn decode_volcano(body: VolcanoResponse) -> Result<SynthesizedAudio> {
    if body.code != VOLCANO_OK {
        return Err(AssistantError::Tts(format!(
            "Volcano code {}: {}",
            body.code, body.message
        )));
    }
    let data = body
        .data
        .ok_or_else(|| AssistantError::Tts("Volcano response has no audio".into()))?;
    let bytes = STANDARD
        .decode(data.as_bytes())
        .map_err(|e| AssistantError::Tts(format!("invalid Volcano audio payload: {e}")))?;
    Ok(SynthesizedAudio {
        bytes: bytes.into(),
        content_type: Some("audio/mpeg".to_owned()),
    })
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn synthesize(&self, text: &str, session: &SessionContext) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(AssistantError::Tts("nothing to synthesize".into()));
        }
        let provider = self.provider_for(session);
        let started = Instant::now();
        let preview: String = text.chars().take(100).collect();
        info!("TTS via {provider:?}: {preview:?}");

        let result = match provider {
            TtsProvider::OpenAi => self.openai(&self.config.openai, text).await,
            TtsProvider::Volcano => self.volcano(&self.config.volcano, text, session).await,
        };
        match &result {
            Ok(audio) => info!(
                "TTS produced {} bytes in {}ms",
                audio.bytes.len(),
                started.elapsed().as_millis()
            ),
            Err(e) => warn!("TTS via {provider:?} failed: {e}"),
        }
        result
    }
}
