//! Recorder stage: drives the [`SilenceDetector`] from the capture stream.
//!
//! The microphone stream runs for the whole session. Recording is switched
//! on and off through a [`CaptureHandle`]; finalized clips are forwarded to
//! the turn dispatcher.

use crate::audio::silence::SilenceDetector;
use crate::pipeline::messages::{AudioChunk, AudioClip};
use crate::runtime::{EventSink, RuntimeEvent};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Start/stop requests for the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    Start,
    Stop,
}

/// Pause/resume seam used by the turn orchestrator.
pub trait CaptureControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Cloneable handle to a running [`Recorder`].
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
    recording: watch::Receiver<bool>,
}

impl CaptureHandle {
    pub fn start(&self) {
        if self.cmd_tx.send(CaptureCommand::Start).is_err() {
            debug!("recorder gone, start ignored");
        }
    }

    pub fn stop(&self) {
        if self.cmd_tx.send(CaptureCommand::Stop).is_err() {
            debug!("recorder gone, stop ignored");
        }
    }

    pub fn is_recording(&self) -> bool {
        *self.recording.borrow()
    }

    /// Observe recording on/off transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.recording.clone()
    }
}

impl CaptureControl for CaptureHandle {
    fn pause(&self) {
        self.stop();
    }

    fn resume(&self) {
        self.start();
    }
}

/// Owns the detector and the command/recording channels.
pub struct Recorder {
    detector: SilenceDetector,
    cmd_rx: mpsc::UnboundedReceiver<CaptureCommand>,
    recording_tx: watch::Sender<bool>,
}

impl Recorder {
    pub fn new(detector: SilenceDetector) -> (Self, CaptureHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (recording_tx, recording) = watch::channel(false);
        let recorder = Self {
            detector,
            cmd_rx,
            recording_tx,
        };
        (recorder, CaptureHandle { cmd_tx, recording })
    }

    /// Run until cancelled or the audio stream ends.
    pub async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioChunk>,
        clip_tx: mpsc::Sender<AudioClip>,
        events: EventSink,
        cancel: CancellationToken,
    ) {
        let mut handles_alive = true;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                cmd = self.cmd_rx.recv(), if handles_alive => {
                    match cmd {
                        Some(CaptureCommand::Start) => self.set_recording(true, &events),
                        Some(CaptureCommand::Stop) => self.set_recording(false, &events),
                        // Every handle dropped; keep draining audio so the
                        // capture stream never backs up.
                        None => handles_alive = false,
                    }
                }
                chunk = audio_rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    let recording = self.detector.is_recording();
                    let (db, clip) = self.detector.process_chunk(&chunk);
                    let level = if recording {
                        self.detector.volume_range().level(db)
                    } else {
                        0.0
                    };
                    events.emit(RuntimeEvent::Volume { db, level });

                    if let Some(clip) = clip {
                        self.publish_recording(false, &events);
                        if clip_tx.send(clip).await.is_err() {
                            info!("clip receiver closed, recorder exiting");
                            break;
                        }
                    }
                }
            }
        }
        self.detector.stop();
        self.publish_recording(false, &events);
    }

    fn set_recording(&mut self, active: bool, events: &EventSink) {
        if active {
            if !self.detector.is_recording() {
                self.detector.start();
            }
        } else {
            self.detector.stop();
        }
        self.publish_recording(active, events);
    }

    fn publish_recording(&self, active: bool, events: &EventSink) {
        let changed = self.recording_tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
        if changed {
            debug!("recording: {active}");
            events.emit(RuntimeEvent::Recording { active });
        }
    }
}
