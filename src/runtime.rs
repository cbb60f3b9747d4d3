//! Runtime events emitted by the pipeline for UI and observability.
//!
//! Payloads stay small so stages can emit without slowing a turn. Sends are
//! best-effort: a lagging or absent subscriber never blocks the pipeline.

use crate::emotion::EmotionScore;
use crate::pipeline::turn::TurnPhase;
use tokio::sync::broadcast;

/// Events that describe what the pipeline is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The turn state machine moved to a new phase.
    Phase(TurnPhase),
    /// Microphone recording was started or stopped.
    Recording { active: bool },
    /// Current input volume. `level` is normalized against the recording's
    /// running min/max and is 0 while not recording.
    Volume { db: f32, level: f32 },
    /// User transcription produced by STT.
    Transcription { text: String },
    /// The frame grid for this turn is ready (`image_url` is `None` when not published).
    CompositeReady {
        frames: usize,
        image_url: Option<String>,
    },
    /// Latest emotion score (`None` = unknown).
    Emotion { score: Option<EmotionScore> },
    /// Incremental assistant text while the reply streams.
    AssistantDelta { text: String },
    /// The finished assistant reply.
    AssistantReply { text: String },
    /// An utterance arrived while a turn was in flight and was discarded.
    UtteranceDropped,
    /// A turn was aborted; capture has been resumed.
    TurnFailed { phase: TurnPhase, message: String },
}

/// Optional broadcast sink shared by stages.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl EventSink {
    pub fn new(tx: broadcast::Sender<RuntimeEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
