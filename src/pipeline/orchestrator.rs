//! Turn orchestrator: one finalized utterance in, one spoken reply out.
//!
//! A turn runs STT, composites and publishes the buffered frames, fans out
//! emotion scoring and chat completion, then synthesizes and plays the
//! reply. Clips arriving while a turn is in flight are dropped. Emotion and
//! upload failures degrade in place; STT, chat, TTS and playback failures
//! abort the turn. Either way the turn ends in `Idle` with capture resumed.
//! A regenerate request re-answers the last user message under the same rules.

use crate::audio::recorder::CaptureControl;
use crate::config::{AssistantConfig, CaptureSettings, TurnConfig};
use crate::emotion::EmotionScore;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{AudioClip, ChatMessage, SessionContext, TurnReport};
use crate::pipeline::transcript::ConversationTranscript;
use crate::pipeline::turn::{TurnGuard, TurnPhase, TurnState};
use crate::runtime::{EventSink, RuntimeEvent};
use crate::services::Collaborators;
use crate::video::grid::{self, CompositeImage};
use crate::video::sampler::FrameBuffer;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How a call to [`TurnOrchestrator::on_utterance`] or
/// [`TurnOrchestrator::regenerate`] ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Another turn was in flight; the request was discarded.
    Dropped,
    Completed(TurnReport),
    /// The turn stopped at `phase`. Capture has been resumed.
    Aborted {
        phase: TurnPhase,
        error: AssistantError,
    },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

type StageResult<T> = std::result::Result<T, (TurnPhase, AssistantError)>;

/// Owns the turn state, the conversation history and the latest emotion.
pub struct TurnOrchestrator {
    collaborators: Collaborators,
    capture: Arc<dyn CaptureControl>,
    frames: FrameBuffer,
    settings: CaptureSettings,
    timeouts: TurnConfig,
    /// Deadline for transcription, wide enough for every STT retry.
    stt_timeout_secs: u64,
    session: SessionContext,
    state: TurnState,
    transcript: Mutex<ConversationTranscript>,
    emotion: watch::Sender<Option<EmotionScore>>,
    events: EventSink,
}

impl TurnOrchestrator {
    pub fn new(
        config: &AssistantConfig,
        session: SessionContext,
        collaborators: Collaborators,
        capture: Arc<dyn CaptureControl>,
        frames: FrameBuffer,
        events: EventSink,
    ) -> Self {
        let (emotion, _) = watch::channel(None);
        let retries = config.stt.worst_case();
        let stt_secs = retries.as_secs() + u64::from(retries.subsec_nanos() > 0);
        Self {
            collaborators,
            capture,
            frames,
            settings: config.capture.clone(),
            timeouts: config.turn.clone(),
            stt_timeout_secs: stt_secs.max(config.turn.request_timeout_secs),
            session,
            state: TurnState::new(events.clone()),
            transcript: Mutex::new(ConversationTranscript::new()),
            emotion,
            events,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.phase()
    }

    pub fn is_busy(&self) -> bool {
        self.state.phase().is_busy()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<TurnPhase> {
        self.state.subscribe()
    }

    /// Latest emotion score; `None` until scored or after a failed rating.
    pub fn latest_emotion(&self) -> Option<EmotionScore> {
        *self.emotion.borrow()
    }

    pub fn subscribe_emotion(&self) -> watch::Receiver<Option<EmotionScore>> {
        self.emotion.subscribe()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Copy of the conversation so far.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.lock_transcript().messages().to_vec()
    }

    fn lock_transcript(&self) -> MutexGuard<'_, ConversationTranscript> {
        self.transcript.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run one turn for `clip`, or drop it if a turn is already running.
    pub async fn on_utterance(&self, clip: AudioClip) -> TurnOutcome {
        if !self.state.try_begin() {
            debug!(
                "dropping {:.1}s utterance: turn in progress ({})",
                clip.duration().as_secs_f32(),
                self.state.phase()
            );
            self.events.emit(RuntimeEvent::UtteranceDropped);
            return TurnOutcome::Dropped;
        }
        self.capture.pause();
        let _guard = TurnGuard::new(&self.state, self.capture.as_ref());
        self.finish_turn(self.run_turn(clip).await)
    }

    /// Answer the latest user message again.
    ///
    /// The previous reply, if it is the last message, is retracted first.
    /// Takes the busy flag like a spoken turn and is dropped while one runs.
    pub async fn regenerate(&self) -> TurnOutcome {
        if !self.state.try_begin() {
            debug!("regenerate ignored: turn in progress ({})", self.state.phase());
            return TurnOutcome::Dropped;
        }
        self.capture.pause();
        let _guard = TurnGuard::new(&self.state, self.capture.as_ref());
        self.finish_turn(self.run_regenerate().await)
    }

    fn finish_turn(&self, result: StageResult<TurnReport>) -> TurnOutcome {
        match result {
            Ok(report) => {
                info!("turn complete in {}ms", report.elapsed.as_millis());
                TurnOutcome::Completed(report)
            }
            Err((phase, error)) => {
                error!("turn aborted while {phase}: {error}");
                self.events.emit(RuntimeEvent::TurnFailed {
                    phase,
                    message: error.to_string(),
                });
                TurnOutcome::Aborted { phase, error }
            }
        }
    }

    async fn run_turn(&self, clip: AudioClip) -> StageResult<TurnReport> {
        let started = Instant::now();
        let c = &self.collaborators;

        let transcript = self
            .within(
                "speech-to-text",
                self.stt_timeout_secs,
                c.stt.transcribe(&clip, &self.session),
            )
            .await
            .and_then(|text| {
                let text = text.trim().to_owned();
                if text.is_empty() {
                    Err(AssistantError::Stt("empty transcription".into()))
                } else {
                    Ok(text)
                }
            })
            .map_err(|e| (TurnPhase::SttPending, e))?;
        info!("heard: {transcript:?}");
        self.events.emit(RuntimeEvent::Transcription {
            text: transcript.clone(),
        });

        self.state.advance(TurnPhase::UploadPending);
        let (frames_used, image_url) = self.publish_frames().await;

        self.state.advance(TurnPhase::AnalysisPending);
        let user = ChatMessage::user_with_image(transcript.clone(), image_url.as_deref());
        let history = {
            let mut t = self.lock_transcript();
            t.append(user);
            t.messages().to_vec()
        };
        debug!("chat history: {} messages", history.len());

        let (emotion, reply) = tokio::join!(
            self.score_emotion(&transcript, image_url.as_deref()),
            self.chat(&history),
        );
        self.emotion.send_replace(emotion);
        self.events.emit(RuntimeEvent::Emotion { score: emotion });

        let reply = reply.map_err(|e| (TurnPhase::AnalysisPending, e))?;
        self.record_reply(&reply);
        self.speak(&reply).await?;

        Ok(TurnReport {
            transcript,
            image_url,
            frames_used,
            emotion,
            reply,
            elapsed: started.elapsed(),
        })
    }

    async fn run_regenerate(&self) -> StageResult<TurnReport> {
        let started = Instant::now();
        self.state.advance(TurnPhase::AnalysisPending);

        let (prompt, image_url, history) = {
            let mut t = self.lock_transcript();
            if let Some(old) = t.retract_reply() {
                debug!("retracted reply: {}", old.content.text());
            }
            let Some(user) = t.pending_user() else {
                return Err((
                    TurnPhase::AnalysisPending,
                    AssistantError::Pipeline("no user message to answer".into()),
                ));
            };
            (
                user.content.text(),
                user.content.image_url().map(str::to_owned),
                t.messages().to_vec(),
            )
        };
        info!("regenerating reply to {prompt:?} ({} messages)", history.len());

        let reply = self
            .chat(&history)
            .await
            .map_err(|e| (TurnPhase::AnalysisPending, e))?;
        self.record_reply(&reply);
        self.speak(&reply).await?;

        Ok(TurnReport {
            transcript: prompt,
            image_url,
            frames_used: 0,
            emotion: self.latest_emotion(),
            reply,
            elapsed: started.elapsed(),
        })
    }

    /// Stream a completion for `history`, forwarding deltas as events.
    async fn chat(&self, history: &[ChatMessage]) -> Result<String> {
        let events = self.events.clone();
        let on_delta = move |text: &str| {
            events.emit(RuntimeEvent::AssistantDelta {
                text: text.to_owned(),
            });
        };
        self.bounded(
            "chat completion",
            self.collaborators
                .chat
                .complete(history, &self.session, &on_delta),
        )
        .await
    }

    fn record_reply(&self, reply: &str) {
        self.lock_transcript().append(ChatMessage::assistant(reply));
        self.events.emit(RuntimeEvent::AssistantReply {
            text: reply.to_owned(),
        });
    }

    /// Synthesize `reply` and play it to the end.
    async fn speak(&self, reply: &str) -> StageResult<()> {
        let c = &self.collaborators;
        self.state.advance(TurnPhase::TtsPending);
        let audio = self
            .bounded("speech synthesis", c.tts.synthesize(reply, &self.session))
            .await
            .map_err(|e| (TurnPhase::TtsPending, e))?;

        self.state.advance(TurnPhase::PlaybackPending);
        self.within(
            "playback",
            self.timeouts.playback_timeout_secs,
            c.player.play(audio),
        )
        .await
        .map_err(|e| (TurnPhase::PlaybackPending, e))
    }

    /// Snapshot and clear the frame buffer, composite and publish.
    ///
    /// Never fails the turn: any problem yields no image URL. An empty
    /// buffer composites to the placeholder, which is not uploaded.
    async fn publish_frames(&self) -> (usize, Option<String>) {
        let frames = self.frames.take_latest(self.settings.max_screenshots);
        let count = frames.len();
        let settings = self.settings.clone();
        let composite: Result<CompositeImage> =
            tokio::task::spawn_blocking(move || grid::composite(&frames, &settings))
                .await
                .unwrap_or_else(|e| {
                    Err(AssistantError::Image(format!("composite task failed: {e}")))
                });

        let image_url = match composite {
            Ok(image) if image.is_placeholder() => {
                debug!("no frames buffered; continuing without an image");
                None
            }
            Ok(image) => match self
                .bounded("image upload", self.collaborators.publisher.publish(&image))
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("frame grid upload failed, continuing without image: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("frame compositing failed, continuing without image: {e}");
                None
            }
        };
        self.events.emit(RuntimeEvent::CompositeReady {
            frames: count,
            image_url: image_url.clone(),
        });
        (count, image_url)
    }

    /// Emotion failures are reported as an unknown score.
    async fn score_emotion(&self, text: &str, image_url: Option<&str>) -> Option<EmotionScore> {
        let scored = self
            .bounded(
                "emotion scoring",
                self.collaborators.emotion.score(text, image_url, &self.session),
            )
            .await;
        match scored {
            Ok(score) => score,
            Err(e) => {
                warn!("emotion scoring failed, score unknown: {e}");
                None
            }
        }
    }

    /// Apply the per-request deadline to a collaborator call.
    async fn bounded<T>(&self, what: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.within(what, self.timeouts.request_timeout_secs, fut).await
    }

    async fn within<T>(
        &self,
        what: &'static str,
        secs: u64,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let secs = secs.max(1);
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(AssistantError::Timeout { what, secs }),
        }
    }
}
