//! Lingban: a voice and vision driving companion.
//!
//! Each conversation turn flows through a fixed pipeline:
//! Microphone → silence detector → STT → (emotion ∥ chat) → TTS → Speaker
//!
//! # Architecture
//!
//! - **Audio capture**: records from the microphone via `cpal` and finalizes
//!   an utterance once the volume stays below a threshold
//! - **Video**: samples camera frames into a bounded buffer and composites
//!   them into a single grid image per turn
//! - **Services**: HTTP collaborators for transcription, emotion scoring,
//!   streaming chat, speech synthesis and image publishing
//! - **Turn orchestrator**: a forward-only state machine that admits one turn
//!   at a time and always returns to listening
//! - **Audio playback**: decodes replies with `symphonia` and plays them via `cpal`

pub mod audio;
pub mod config;
pub mod emotion;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod services;
pub mod video;

pub use config::{AssistantConfig, CaptureSettings};
pub use emotion::EmotionScore;
pub use error::{AssistantError, Result};
pub use pipeline::coordinator::ConversationCoordinator;
pub use pipeline::orchestrator::{TurnOrchestrator, TurnOutcome};
pub use pipeline::turn::TurnPhase;
pub use runtime::RuntimeEvent;
