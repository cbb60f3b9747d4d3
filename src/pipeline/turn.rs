//! Turn state machine.
//!
//! A turn moves strictly forward through
//! `Idle → SttPending → UploadPending → AnalysisPending → TtsPending →
//! PlaybackPending` and always returns to `Idle`. Leaving `Idle` is a single
//! check-and-set, so two clips can never both start a turn.

use crate::audio::recorder::CaptureControl;
use crate::runtime::{EventSink, RuntimeEvent};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TurnPhase {
    Idle,
    SttPending,
    UploadPending,
    AnalysisPending,
    TtsPending,
    PlaybackPending,
}

impl TurnPhase {
    /// Any phase other than `Idle` holds the busy flag.
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "waiting for speech",
            Self::SttPending => "transcribing",
            Self::UploadPending => "uploading frames",
            Self::AnalysisPending => "scoring emotion and chatting",
            Self::TtsPending => "synthesizing reply",
            Self::PlaybackPending => "speaking",
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Owner of the current [`TurnPhase`].
#[derive(Debug)]
pub struct TurnState {
    phase: watch::Sender<TurnPhase>,
    events: EventSink,
}

impl TurnState {
    pub fn new(events: EventSink) -> Self {
        let (phase, _) = watch::channel(TurnPhase::Idle);
        Self { phase, events }
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TurnPhase> {
        self.phase.subscribe()
    }

    /// `Idle → SttPending`. Returns `false` (and changes nothing) when busy.
    pub fn try_begin(&self) -> bool {
        let began = self.phase.send_if_modified(|phase| {
            if phase.is_busy() {
                return false;
            }
            *phase = TurnPhase::SttPending;
            true
        });
        if began {
            self.events.emit(RuntimeEvent::Phase(TurnPhase::SttPending));
        }
        began
    }

    /// Move forward to `next`. Backward or idle moves are refused.
    pub fn advance(&self, next: TurnPhase) -> bool {
        let moved = self.phase.send_if_modified(|phase| {
            if !phase.is_busy() || next <= *phase {
                return false;
            }
            *phase = next;
            true
        });
        if moved {
            debug!("turn phase: {next}");
            self.events.emit(RuntimeEvent::Phase(next));
        } else {
            warn!("refused turn transition {} → {next}", self.phase());
        }
        moved
    }

    /// Return to `Idle` from any phase.
    pub fn finish(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            let was_busy = phase.is_busy();
            *phase = TurnPhase::Idle;
            was_busy
        });
        if changed {
            self.events.emit(RuntimeEvent::Phase(TurnPhase::Idle));
        }
    }
}

/// Releases the busy flag and resumes capture when dropped.
///
/// Held for the whole turn, so every exit (success, error, timeout, or the
/// turn future being dropped) ends back in `Idle` with the microphone live.
pub struct TurnGuard<'a> {
    state: &'a TurnState,
    capture: &'a dyn CaptureControl,
}

impl<'a> TurnGuard<'a> {
    pub fn new(state: &'a TurnState, capture: &'a dyn CaptureControl) -> Self {
        Self { state, capture }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.state.finish();
        self.capture.resume();
    }
}
