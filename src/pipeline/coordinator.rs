//! Conversation coordinator that wires all stages together.
//!
//! Stages run as independent tokio tasks connected by channels:
//! microphone capture → recorder (silence detection) → turn dispatcher, with
//! the frame sampler filling the shared frame buffer alongside. A failure to
//! open the microphone ends the run with that error.

use crate::audio::capture::{AudioInput, Microphone};
use crate::audio::recorder::{CaptureControl, Recorder};
use crate::audio::silence::SilenceDetector;
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::{AudioChunk, AudioClip, SessionContext};
use crate::pipeline::orchestrator::{TurnOrchestrator, TurnOutcome};
use crate::runtime::{EventSink, RuntimeEvent};
use crate::services::Collaborators;
use crate::video::sampler::{FrameBuffer, FrameSampler, FrameSource};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const AUDIO_CHANNEL_SIZE: usize = 64;
const CLIP_CHANNEL_SIZE: usize = 4;

/// Runs a voice conversation until cancelled.
pub struct ConversationCoordinator {
    config: AssistantConfig,
    session: SessionContext,
    collaborators: Collaborators,
    audio_input: Option<Arc<dyn AudioInput>>,
    frame_source: Option<Arc<dyn FrameSource>>,
    regenerate_rx: Option<mpsc::Receiver<()>>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    cancel: CancellationToken,
}

impl ConversationCoordinator {
    pub fn new(config: AssistantConfig, session: SessionContext, collaborators: Collaborators) -> Self {
        Self {
            config,
            session,
            collaborators,
            audio_input: None,
            frame_source: None,
            regenerate_rx: None,
            runtime_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Attach a camera. Without one, every turn uses the placeholder image.
    pub fn with_frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// Replace the system microphone.
    pub fn with_audio_input(mut self, input: Arc<dyn AudioInput>) -> Self {
        self.audio_input = Some(input);
        self
    }

    /// Each message on `rx` asks for the last reply to be generated again.
    pub fn with_regenerate_requests(mut self, rx: mpsc::Receiver<()>) -> Self {
        self.regenerate_rx = Some(rx);
        self
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every stage until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture settings are invalid or the
    /// microphone cannot be opened.
    pub async fn run(self) -> Result<()> {
        self.config.capture.validate()?;
        info!(
            "starting conversation (lang {}, voice mode {}, scene {})",
            self.session.lang, self.session.voice_mode, self.session.scene
        );

        let events = self.runtime_tx.clone().map(EventSink::new).unwrap_or_default();
        let cancel = self.cancel.clone();

        let (audio_tx, audio_rx) = mpsc::channel::<AudioChunk>(AUDIO_CHANNEL_SIZE);
        let (clip_tx, clip_rx) = mpsc::channel::<AudioClip>(CLIP_CHANNEL_SIZE);

        // Stage 1: microphone capture
        let input: Arc<dyn AudioInput> = match self.audio_input.clone() {
            Some(input) => input,
            None => Arc::new(Microphone::new(self.config.audio.clone())),
        };
        let capture_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run_capture_stage(input, audio_tx, cancel).await })
        };

        // Stage 2: silence-aware recorder
        let detector = SilenceDetector::new(&self.config.capture, &self.config.audio);
        let (recorder, capture) = Recorder::new(detector);
        let recorder_handle = {
            let cancel = cancel.clone();
            let events = events.clone();
            tokio::spawn(async move {
                recorder.run(audio_rx, clip_tx, events, cancel).await;
            })
        };

        // Stage 3: frame sampler (only with a camera)
        let frames = FrameBuffer::new(self.config.capture.max_screenshots);
        let sampler_handle = self.frame_source.clone().map(|source| {
            let sampler = FrameSampler::new(
                source,
                frames.clone(),
                self.config.capture.clone(),
                capture.subscribe(),
            );
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sampler.run(cancel).await;
            })
        });
        if sampler_handle.is_none() {
            info!("no frame source configured; turns run without images");
        }

        // Stage 4: turn dispatcher
        let control: Arc<dyn CaptureControl> = Arc::new(capture.clone());
        let orchestrator = Arc::new(TurnOrchestrator::new(
            &self.config,
            self.session.clone(),
            self.collaborators.clone(),
            control,
            frames,
            events,
        ));
        let dispatch_handle = {
            let cancel = cancel.clone();
            let regenerate = self.regenerate_rx;
            tokio::spawn(async move {
                run_dispatch_stage(orchestrator, clip_rx, regenerate, cancel).await;
            })
        };

        capture.start();
        info!("listening");

        let captured = capture_handle
            .await
            .unwrap_or_else(|e| Err(AssistantError::Audio(format!("capture task failed: {e}"))));
        if captured.is_err() {
            // Without audio nothing else can make progress.
            cancel.cancel();
        }
        let _ = tokio::join!(recorder_handle, dispatch_handle);
        if let Some(handle) = sampler_handle {
            let _ = handle.await;
        }
        info!("conversation shutdown complete");
        captured
    }
}

// -- Stage runner functions --

async fn run_capture_stage(
    input: Arc<dyn AudioInput>,
    tx: mpsc::Sender<AudioChunk>,
    cancel: CancellationToken,
) -> Result<()> {
    let result = input.stream(tx, cancel).await;
    if let Err(e) = &result {
        error!("capture stage error: {e}");
    }
    result
}

/// Next regenerate request; never resolves once there is no sender.
async fn next_request(rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Hands each finalized clip, and each regenerate request, to the
/// orchestrator on its own task.
///
/// The recorder keeps running during a turn, so clips that arrive while one
/// is in flight reach `on_utterance` and are dropped there.
async fn run_dispatch_stage(
    orchestrator: Arc<TurnOrchestrator>,
    mut clips: mpsc::Receiver<AudioClip>,
    mut regenerate: Option<mpsc::Receiver<()>>,
    cancel: CancellationToken,
) {
    let mut turns = JoinSet::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            clip = clips.recv() => {
                let Some(clip) = clip else { break };
                let orchestrator = Arc::clone(&orchestrator);
                turns.spawn(async move { orchestrator.on_utterance(clip).await });
            }
            request = next_request(&mut regenerate) => match request {
                Some(()) => {
                    let orchestrator = Arc::clone(&orchestrator);
                    turns.spawn(async move { orchestrator.regenerate().await });
                }
                None => regenerate = None,
            },
            Some(done) = turns.join_next() => match done {
                Ok(TurnOutcome::Completed(report)) => debug!(
                    "turn reply ({} frames, emotion {:?}): {}",
                    report.frames_used, report.emotion, report.reply
                ),
                Ok(TurnOutcome::Aborted { phase, .. }) => debug!("turn ended early while {phase}"),
                Ok(TurnOutcome::Dropped) => {}
                Err(e) => warn!("turn task failed: {e}"),
            },
        }
    }
    // Aborts any in-flight turn; its guard resumes capture.
    turns.shutdown().await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::audio::playback::AudioPlayer;
    use crate::emotion::EmotionScore;
    use crate::pipeline::messages::{ChatMessage, SynthesizedAudio};
    use crate::pipeline::turn::TurnPhase;
    use crate::services::{AssetPublisher, ChatCompletion, EmotionScorer, SpeechToText, TextToSpeech};
    use crate::video::grid::CompositeImage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    /// Every collaborator; chat blocks until released.
    struct Gated {
        release: Notify,
        chats: AtomicUsize,
    }

    #[async_trait]
    impl SpeechToText for Gated {
        async fn transcribe(&self, _: &AudioClip, _: &SessionContext) -> Result<String> {
            Ok("hi".into())
        }
    }

    #[async_trait]
    impl EmotionScorer for Gated {
        async fn score(&self, _: &str, _: Option<&str>, _: &SessionContext) -> Result<Option<EmotionScore>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl ChatCompletion for Gated {
        async fn complete(
            &self,
            _: &[ChatMessage],
            _: &SessionContext,
            _: &(dyn for<'d> Fn(&'d str) + Send + Sync),
        ) -> Result<String> {
            self.chats.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok("ok".into())
        }
    }

    #[async_trait]
    impl TextToSpeech for Gated {
        async fn synthesize(&self, _: &str, _: &SessionContext) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio {
                bytes: bytes::Bytes::new(),
                content_type: None,
            })
        }
    }

    #[async_trait]
    impl AssetPublisher for Gated {
        async fn publish(&self, _: &CompositeImage) -> Result<String> {
            Ok("https://img".into())
        }
    }

    #[async_trait]
    impl AudioPlayer for Gated {
        async fn play(&self, _: SynthesizedAudio) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct LoggedCapture(Mutex<Vec<&'static str>>);

    impl CaptureControl for LoggedCapture {
        fn pause(&self) {
            self.0.lock().unwrap().push("pause");
        }
        fn resume(&self) {
            self.0.lock().unwrap().push("resume");
        }
    }

    fn clip() -> AudioClip {
        AudioClip {
            samples: vec![0.2; 800],
            sample_rate: 16_000,
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn dispatcher_drops_clips_while_busy() {
        let gated = Arc::new(Gated {
            release: Notify::new(),
            chats: AtomicUsize::new(0),
        });
        let collaborators = Collaborators {
            stt: gated.clone(),
            emotion: gated.clone(),
            chat: gated.clone(),
            tts: gated.clone(),
            publisher: gated.clone(),
            player: gated.clone(),
        };
        let capture = Arc::new(LoggedCapture::default());
        let orchestrator = Arc::new(TurnOrchestrator::new(
            &AssistantConfig::default(),
            SessionContext::default(),
            collaborators,
            capture.clone(),
            FrameBuffer::new(1),
            EventSink::disabled(),
        ));
        let mut phase = orchestrator.subscribe_phase();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatch_stage(
            Arc::clone(&orchestrator),
            rx,
            None,
            cancel.clone(),
        ));

        tx.send(clip()).await.unwrap();
        phase
            .wait_for(|p| *p == TurnPhase::AnalysisPending)
            .await
            .unwrap();
        while gated.chats.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(clip()).await.unwrap();
        tx.send(clip()).await.unwrap();
        // Give the dispatcher time to hand both clips over.
        tokio::time::sleep(Duration::from_millis(50)).await;

        gated.release.notify_one();
        phase.wait_for(|p| *p == TurnPhase::Idle).await.unwrap();

        assert_eq!(gated.chats.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.transcript().len(), 2);
        assert_eq!(*capture.0.lock().unwrap(), vec!["pause", "resume"]);

        cancel.cancel();
        dispatcher.await.unwrap();
    }

    /// Answers instantly; counts chat calls.
    #[derive(Default)]
    struct Canned {
        chats: AtomicUsize,
    }

    #[async_trait]
    impl SpeechToText for Canned {
        async fn transcribe(&self, _: &AudioClip, _: &SessionContext) -> Result<String> {
            Ok("how far to the exit".into())
        }
    }

    #[async_trait]
    impl EmotionScorer for Canned {
        async fn score(&self, _: &str, _: Option<&str>, _: &SessionContext) -> Result<Option<EmotionScore>> {
            Ok(EmotionScore::new(1))
        }
    }

    #[async_trait]
    impl ChatCompletion for Canned {
        async fn complete(
            &self,
            _: &[ChatMessage],
            _: &SessionContext,
            _: &(dyn for<'d> Fn(&'d str) + Send + Sync),
        ) -> Result<String> {
            let n = self.chats.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("reply {n}"))
        }
    }

    #[async_trait]
    impl TextToSpeech for Canned {
        async fn synthesize(&self, _: &str, _: &SessionContext) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio {
                bytes: bytes::Bytes::new(),
                content_type: None,
            })
        }
    }

    #[async_trait]
    impl AssetPublisher for Canned {
        async fn publish(&self, _: &CompositeImage) -> Result<String> {
            Ok("https://img".into())
        }
    }

    #[async_trait]
    impl AudioPlayer for Canned {
        async fn play(&self, _: SynthesizedAudio) -> Result<()> {
            Ok(())
        }
    }

    fn canned() -> (Arc<Canned>, Collaborators) {
        let canned = Arc::new(Canned::default());
        let collaborators = Collaborators {
            stt: canned.clone(),
            emotion: canned.clone(),
            chat: canned.clone(),
            tts: canned.clone(),
            publisher: canned.clone(),
            player: canned.clone(),
        };
        (canned, collaborators)
    }

    struct DeadMic;

    #[async_trait]
    impl AudioInput for DeadMic {
        async fn stream(&self, _: mpsc::Sender<AudioChunk>, _: CancellationToken) -> Result<()> {
            Err(AssistantError::Audio("no default input device".into()))
        }
    }

    /// Speaks once (speech then silence) and stays open until cancelled.
    struct OneUtterance;

    #[async_trait]
    impl AudioInput for OneUtterance {
        async fn stream(&self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()> {
            for amplitude in [0.2; 5].into_iter().chain([0.0; 5]) {
                let chunk = AudioChunk {
                    samples: vec![amplitude; 1_600],
                    sample_rate: 16_000,
                    captured_at: Instant::now(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    async fn next_reply(rx: &mut broadcast::Receiver<RuntimeEvent>) -> String {
        loop {
            if let RuntimeEvent::AssistantReply { text } = rx.recv().await.unwrap() {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn microphone_failure_ends_the_run_with_its_error() {
        let (_, collaborators) = canned();
        let coordinator =
            ConversationCoordinator::new(AssistantConfig::default(), SessionContext::default(), collaborators)
                .with_audio_input(Arc::new(DeadMic));

        let result = tokio::time::timeout(Duration::from_secs(5), coordinator.run())
            .await
            .expect("run should return once capture fails");
        let err = result.unwrap_err();
        assert!(matches!(err, AssistantError::Audio(_)), "{err}");
    }

    #[tokio::test]
    async fn spoken_turn_and_regenerate_run_end_to_end() {
        let mut config = AssistantConfig::default();
        config.capture.silence_duration_ms = 300;
        let (canned, collaborators) = canned();
        let (events_tx, mut events_rx) = broadcast::channel(256);
        let (regen_tx, regen_rx) = mpsc::channel(1);

        let coordinator = ConversationCoordinator::new(config, SessionContext::default(), collaborators)
            .with_audio_input(Arc::new(OneUtterance))
            .with_runtime_events(events_tx)
            .with_regenerate_requests(regen_rx);
        let cancel = coordinator.cancel_token();
        let run = tokio::spawn(coordinator.run());

        let first = tokio::time::timeout(Duration::from_secs(5), next_reply(&mut events_rx))
            .await
            .unwrap();
        assert_eq!(first, "reply 1");

        regen_tx.send(()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), next_reply(&mut events_rx))
            .await
            .unwrap();
        assert_eq!(second, "reply 2");
        assert_eq!(canned.chats.load(Ordering::SeqCst), 2);

        cancel.cancel();
        run.await.unwrap().unwrap();
    }
}
