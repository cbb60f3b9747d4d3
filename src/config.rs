//! Configuration types for the capture and turn pipeline.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a conversation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// User-tunable capture and image parameters.
    pub capture: CaptureSettings,
    /// Audio device settings.
    pub audio: AudioConfig,
    /// Per-session selectors forwarded to collaborators.
    pub session: SessionConfig,
    /// Turn orchestration deadlines.
    pub turn: TurnConfig,
    /// Speech-to-text collaborator.
    pub stt: SttConfig,
    /// Emotion-scoring collaborator.
    pub emotion: EmotionConfig,
    /// Chat-completion collaborator.
    pub chat: ChatConfig,
    /// Text-to-speech collaborator.
    pub tts: TtsConfig,
    /// Image host used to publish composite frames.
    pub upload: UploadConfig,
}

/// Capture and image parameters exposed to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Frame sampling interval in ms.
    pub interval_ms: u64,
    /// Width in pixels of each sampled frame (and of each grid cell).
    pub image_width: u32,
    /// JPEG quality in `(0, 1]`.
    pub image_quality: f32,
    /// Number of grid columns in the composite image.
    pub columns: u32,
    /// Most recent frames kept for a turn.
    pub max_screenshots: usize,
    /// Silence (ms) that ends an utterance.
    pub silence_duration_ms: u32,
    /// Volume (dBFS) below which input counts as silence.
    pub silent_threshold_db: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            image_width: 512,
            image_quality: 0.6,
            columns: 4,
            max_screenshots: 1,
            silence_duration_ms: 2500,
            silent_threshold_db: -30.0,
        }
    }
}

impl CaptureSettings {
    /// Kiosk preset: denser sampling and a full grid of recent frames.
    pub fn public_preset() -> Self {
        Self {
            interval_ms: 500,
            max_screenshots: 20,
            ..Self::default()
        }
    }

    /// Restore every field to its default.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// JPEG encoder quality (1..=100) derived from `image_quality`.
    pub fn jpeg_quality(&self) -> u8 {
        (self.image_quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Reject settings the sampler or compositor cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(AssistantError::Config("capture.interval_ms must be > 0".into()));
        }
        if self.image_width == 0 {
            return Err(AssistantError::Config("capture.image_width must be > 0".into()));
        }
        if self.columns == 0 {
            return Err(AssistantError::Config("capture.columns must be > 0".into()));
        }
        if self.max_screenshots == 0 {
            return Err(AssistantError::Config("capture.max_screenshots must be > 0".into()));
        }
        if !(self.image_quality > 0.0 && self.image_quality <= 1.0) {
            return Err(AssistantError::Config(format!(
                "capture.image_quality must be in (0, 1], got {}",
                self.image_quality
            )));
        }
        Ok(())
    }
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate (Hz) the silence detector and STT upload work at.
    pub input_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Floor for volume measurement in dBFS.
    pub min_decibels: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            input_device: None,
            output_device: None,
            min_decibels: -100.0,
        }
    }
}

/// Per-session selectors. Mirrors what the browser kept in local storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bearer token supplied by the user; overrides configured provider keys.
    pub token: String,
    /// STT language code.
    pub lang: String,
    /// TTS voice mode (`clone` or `openai`).
    pub voice_mode: String,
    /// Chat scene (`demo`, `scene1`, `scene2`, `scene3`).
    pub scene: String,
}

impl SessionConfig {
    /// Kiosk selectors: cloned voice and the third scene. Token and language are kept.
    pub fn apply_public_preset(&mut self) {
        self.voice_mode = "clone".to_owned();
        self.scene = "scene3".to_owned();
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            lang: "zh".to_owned(),
            voice_mode: "clone".to_owned(),
            scene: "demo".to_owned(),
        }
    }
}

/// Deadlines applied by the turn orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Upper bound (s) for each collaborator request within a turn.
    pub request_timeout_secs: u64,
    /// Upper bound (s) for playing one reply.
    pub playback_timeout_secs: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            playback_timeout_secs: 180,
        }
    }
}

/// Speech-to-text (Whisper-compatible) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-attempt HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt (network failures only).
    pub max_retries: u32,
    /// Base backoff in ms; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "whisper-1".to_owned(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl SttConfig {
    /// Longest a transcription can take with every retry spent: each attempt
    /// runs to its timeout and attempt `n` is followed by `n * retry_backoff_ms`.
    pub fn worst_case(&self) -> Duration {
        let retries = u64::from(self.max_retries);
        let attempts = Duration::from_secs(self.timeout_secs.saturating_mul(retries + 1));
        let backoff_steps = retries.saturating_mul(retries + 1) / 2;
        attempts.saturating_add(Duration::from_millis(
            self.retry_backoff_ms.saturating_mul(backoff_steps),
        ))
    }
}

/// Emotion-scoring (vision chat model) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://cloud.fastgpt.cn/api/v1".to_owned(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_owned(),
            max_tokens: 10,
            temperature: 0.2,
        }
    }
}

/// Chat-completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub api_url: String,
    /// API key per scene name.
    pub scene_keys: BTreeMap<String, String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            scene_keys: BTreeMap::new(),
            model: "claude-3-5-sonnet".to_owned(),
            temperature: 1.0,
            max_tokens: 2000,
        }
    }
}

/// Which speech synthesis provider to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    OpenAi,
    Volcano,
}

impl TtsProvider {
    /// Parse a provider / voice-mode name. Unknown names select Volcano (voice clone).
    pub fn from_mode(mode: &str) -> Self {
        if mode.trim().eq_ignore_ascii_case("openai") {
            Self::OpenAi
        } else {
            Self::Volcano
        }
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Forces a provider regardless of the session voice mode.
    pub provider: Option<TtsProvider>,
    pub openai: OpenAiTtsConfig,
    pub volcano: VolcanoTtsConfig,
}

/// OpenAI speech endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiTtsConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

impl Default for OpenAiTtsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "tts-1".to_owned(),
            voice: "onyx".to_owned(),
            speed: 1.0,
        }
    }
}

/// Volcano Engine (voice clone) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolcanoTtsConfig {
    pub api_url: String,
    pub app_id: String,
    pub token: String,
    pub cluster: String,
    pub voice_type: String,
    pub speed_ratio: f32,
}

impl Default for VolcanoTtsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openspeech.bytedance.com/api/v1/tts".to_owned(),
            app_id: String::new(),
            token: String::new(),
            cluster: String::new(),
            voice_type: String::new(),
            speed_ratio: 0.9,
        }
    }
}

/// Public image host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub api_url: String,
    /// Prefix of returned page URLs.
    pub page_prefix: String,
    /// Replacement prefix that yields a direct download link.
    pub download_prefix: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_url: "https://tmpfiles.org/api/v1/upload".to_owned(),
            page_prefix: "https://tmpfiles.org/".to_owned(),
            download_prefix: "https://tmpfiles.org/dl/".to_owned(),
        }
    }
}

/// Scenes with a dedicated chat key, and the env var holding each.
const SCENE_KEY_VARS: &[(&str, &str)] = &[
    ("demo", "CHAT_API_KEY_DEMO"),
    ("scene1", "CHAT_API_KEY_SCENE1"),
    ("scene2", "CHAT_API_KEY_SCENE2"),
    ("scene3", "CHAT_API_KEY_SCENE3"),
];

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AssistantError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AssistantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Edit the configuration stored at `path` and write it back.
    ///
    /// Works on the file contents alone (defaults when the file is missing),
    /// so credentials taken from the environment are never persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing file cannot be parsed or the result
    /// cannot be written.
    pub fn update_file(path: &Path, edit: impl FnOnce(&mut Self)) -> Result<Self> {
        let mut stored = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        edit(&mut stored);
        stored.save_to_file(path)?;
        Ok(stored)
    }

    /// Returns the default config file path: `~/.config/lingban/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("lingban").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("lingban")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/lingban-config/config.toml")
        }
    }

    /// Overlay provider credentials and endpoints from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("STT_API_KEY") {
            self.stt.api_key = v;
        }
        if let Some(v) = get("STT_API_BASE_URL") {
            self.stt.api_url = v;
        }
        if let Some(v) = get("EMOTION_API_KEY") {
            self.emotion.api_key = v;
        }
        if let Some(v) = get("EMOTION_API_BASE_URL") {
            self.emotion.api_url = v;
        }
        if let Some(v) = get("CHAT_API_BASE_URL") {
            self.chat.api_url = v;
        }
        for (scene, var) in SCENE_KEY_VARS {
            if let Some(v) = get(var) {
                self.chat.scene_keys.insert((*scene).to_owned(), v);
            }
        }
        if let Some(v) = get("TTS_PROVIDER") {
            self.tts.provider = Some(TtsProvider::from_mode(&v));
        }
        if let Some(v) = get("OPENAI_TTS_API_KEY") {
            self.tts.openai.api_key = v;
        }
        if let Some(v) = get("OPENAI_TTS_BASE_URL") {
            self.tts.openai.api_url = v;
        }
        if let Some(v) = get("VOLCANO_APP_ID") {
            self.tts.volcano.app_id = v;
        }
        if let Some(v) = get("VOLCANO_TOKEN") {
            self.tts.volcano.token = v;
        }
        if let Some(v) = get("VOLCANO_CLUSTER") {
            self.tts.volcano.cluster = v;
        }
        if let Some(v) = get("VOLCANO_VOICE_TYPE") {
            self.tts.volcano.voice_type = v;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AssistantConfig::default();
        assert!(config.capture.validate().is_ok());
        assert!(config.audio.input_sample_rate > 0);
        assert!(config.turn.request_timeout_secs > 0);
        assert_eq!(config.stt.max_retries, 3);
        assert_eq!(config.session.scene, "demo");
    }

    #[test]
    fn capture_defaults_match_chat_page() {
        let s = CaptureSettings::default();
        assert_eq!(s.interval_ms, 1000);
        assert_eq!(s.image_width, 512);
        assert_eq!(s.columns, 4);
        assert_eq!(s.max_screenshots, 1);
        assert_eq!(s.silence_duration_ms, 2500);
        assert!((s.silent_threshold_db + 30.0).abs() < f32::EPSILON);
        assert_eq!(s.jpeg_quality(), 60);
    }

    #[test]
    fn public_preset_samples_more_frames() {
        let s = CaptureSettings::public_preset();
        assert_eq!(s.interval_ms, 500);
        assert_eq!(s.max_screenshots, 20);
        assert_eq!(s.columns, CaptureSettings::default().columns);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut s = CaptureSettings::public_preset();
        s.silent_threshold_db = -45.0;
        s.reset();
        assert_eq!(s, CaptureSettings::default());
    }

    #[test]
    fn validate_rejects_zero_columns_and_bad_quality() {
        let mut s = CaptureSettings::default();
        s.columns = 0;
        assert!(s.validate().is_err());

        let mut s = CaptureSettings::default();
        s.image_quality = 1.5;
        assert!(s.validate().is_err());

        let mut s = CaptureSettings::default();
        s.image_quality = 0.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_frame_budget() {
        let s = CaptureSettings {
            max_screenshots: 0,
            ..CaptureSettings::default()
        };
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("max_screenshots"));
    }

    #[test]
    fn stt_worst_case_covers_every_retry() {
        // 4 attempts of 30 s, then 1 + 2 + 3 s of backoff.
        assert_eq!(SttConfig::default().worst_case(), Duration::from_secs(126));

        let single = SttConfig {
            max_retries: 0,
            timeout_secs: 5,
            ..SttConfig::default()
        };
        assert_eq!(single.worst_case(), Duration::from_secs(5));
    }

    #[test]
    fn public_session_preset_keeps_token_and_lang() {
        let mut session = SessionConfig {
            token: "t".into(),
            lang: "en".into(),
            voice_mode: "openai".into(),
            scene: "demo".into(),
        };
        session.apply_public_preset();
        assert_eq!(session.voice_mode, "clone");
        assert_eq!(session.scene, "scene3");
        assert_eq!(session.token, "t");
        assert_eq!(session.lang, "en");
    }

    #[test]
    fn update_file_never_writes_environment_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut on_disk = AssistantConfig::default();
        on_disk.capture.columns = 3;
        on_disk.chat.scene_keys.insert("demo".into(), "file-key".into());
        on_disk.save_to_file(&path).unwrap();

        let mut live = AssistantConfig::from_file(&path).unwrap();
        live.apply_overrides(|name| (name == "STT_API_KEY").then(|| "env-secret".to_owned()));
        assert_eq!(live.stt.api_key, "env-secret");

        let saved = AssistantConfig::update_file(&path, |c| c.capture.reset()).unwrap();
        assert_eq!(saved.capture, CaptureSettings::default());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("env-secret"));
        let reloaded = AssistantConfig::from_file(&path).unwrap();
        assert!(reloaded.stt.api_key.is_empty());
        assert_eq!(reloaded.capture.columns, CaptureSettings::default().columns);
        assert_eq!(
            reloaded.chat.scene_keys.get("demo").map(String::as_str),
            Some("file-key")
        );
    }

    #[test]
    fn update_file_starts_from_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh").join("config.toml");
        AssistantConfig::update_file(&path, |c| {
            c.capture = CaptureSettings::public_preset();
            c.session.apply_public_preset();
        })
        .unwrap();

        let loaded = AssistantConfig::from_file(&path).unwrap();
        assert_eq!(loaded.capture.max_screenshots, 20);
        assert_eq!(loaded.session.scene, "scene3");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AssistantConfig::default();
        config.capture.max_screenshots = 8;
        config.session.voice_mode = "openai".into();
        config.chat.scene_keys.insert("scene2".into(), "k2".into());

        config.save_to_file(&path).unwrap();
        let loaded = AssistantConfig::from_file(&path).unwrap();
        assert_eq!(loaded.capture.max_screenshots, 8);
        assert_eq!(loaded.session.voice_mode, "openai");
        assert_eq!(loaded.chat.scene_keys.get("scene2").map(String::as_str), Some("k2"));
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result =
            AssistantConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(AssistantConfig::from_file(&path).is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AssistantConfig = toml::from_str(
            r#"
[capture]
columns = 3
"#,
        )
        .unwrap();
        assert_eq!(config.capture.columns, 3);
        assert_eq!(config.capture.interval_ms, 1000);
        assert_eq!(config.chat.max_tokens, 2000);
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = AssistantConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("lingban"));
    }

    #[test]
    fn overrides_map_provider_variables() {
        let env: HashMap<&str, &str> = [
            ("STT_API_KEY", "stt-key"),
            ("STT_API_BASE_URL", "http://stt.local/v1"),
            ("CHAT_API_KEY_SCENE3", "scene3-key"),
            ("TTS_PROVIDER", "OpenAI"),
            ("VOLCANO_TOKEN", "volc"),
            ("EMOTION_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AssistantConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| (*v).to_owned()));

        assert_eq!(config.stt.api_key, "stt-key");
        assert_eq!(config.stt.api_url, "http://stt.local/v1");
        assert_eq!(
            config.chat.scene_keys.get("scene3").map(String::as_str),
            Some("scene3-key")
        );
        assert_eq!(config.tts.provider, Some(TtsProvider::OpenAi));
        assert_eq!(config.tts.volcano.token, "volc");
        assert!(config.emotion.api_key.is_empty(), "blank values are ignored");
    }

    #[test]
    fn unknown_voice_mode_selects_volcano() {
        assert_eq!(TtsProvider::from_mode("clone"), TtsProvider::Volcano);
        assert_eq!(TtsProvider::from_mode(""), TtsProvider::Volcano);
        assert_eq!(TtsProvider::from_mode("openai"), TtsProvider::OpenAi);
    }
}
