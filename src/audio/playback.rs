//! Speaker playback of synthesized replies via cpal.
//!
//! Playback resolves only once the last sample has been handed to the
//! device, so the turn does not resume listening while the assistant is
//! still talking.

use crate::audio::decode::{DecodedAudio, decode_to_mono};
use crate::audio::resample::resample;
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::SynthesizedAudio;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Extra wall time allowed beyond the clip length before playback is
/// declared stuck.
const DRAIN_MARGIN: Duration = Duration::from_secs(3);

/// Plays an audio blob to completion.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Resolves when playback has naturally ended.
    async fn play(&self, audio: SynthesizedAudio) -> Result<()>;
}

/// [`AudioPlayer`] backed by the system output device.
///
/// The device is opened per reply on a blocking thread; the output stream is
/// dropped as soon as the clip has drained.
#[derive(Debug, Clone)]
pub struct SpeakerPlayer {
    config: AudioConfig,
}

impl SpeakerPlayer {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AudioPlayer for SpeakerPlayer {
    async fn play(&self, audio: SynthesizedAudio) -> Result<()> {
        let config = self.config.clone();
        // Dropping this future (turn timeout, shutdown) silences the device.
        let stop = StopOnDrop::default();
        let flag = stop.flag();
        tokio::task::spawn_blocking(move || {
            let decoded = decode_to_mono(&audio.bytes, audio.content_type.as_deref())?;
            debug!(
                "decoded reply: {:.2}s at {}Hz",
                decoded.duration_secs(),
                decoded.sample_rate
            );
            CpalPlayback::new(&config)?.play(&decoded, &flag)
        })
        .await
        .map_err(|e| AssistantError::Playback(format!("playback task failed: {e}")))?
    }
}

/// Raises a shared stop flag when dropped.
#[derive(Debug, Default)]
struct StopOnDrop(Arc<AtomicBool>);

impl StopOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
}

impl CpalPlayback {
    /// Open the configured (or default) output device at its native format.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| AssistantError::Playback(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    AssistantError::Playback(format!("output device '{name}' not found"))
                })?
        } else {
            host.default_output_device()
                .ok_or_else(|| AssistantError::Playback("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());

        let default_config = device
            .default_output_config()
            .map_err(|e| AssistantError::Playback(format!("no default output config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            "using output device: {device_name} ({}Hz, {} channels)",
            stream_config.sample_rate, stream_config.channels
        );

        Ok(Self {
            device,
            stream_config,
        })
    }

    /// Play decoded audio through the output device.
    ///
    /// Blocks until all samples have been played or `stop` is raised, in
    /// which case the stream is closed mid-clip.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be created or never drains.
    pub fn play(&mut self, audio: &DecodedAudio, stop: &AtomicBool) -> Result<()> {
        let device_rate = self.stream_config.sample_rate;
        let channels = usize::from(self.stream_config.channels.max(1));
        let samples = resample(&audio.samples, audio.sample_rate, device_rate);
        let expected = Duration::from_secs_f64(samples.len() as f64 / f64::from(device_rate));

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples,
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    // Same mono sample on every channel of a frame.
                    for frame in data.chunks_mut(channels) {
                        let value = buf.next_sample();
                        frame.fill(value);
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| AssistantError::Playback(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AssistantError::Playback(format!("failed to start output stream: {e}")))?;

        let deadline = Instant::now() + expected + DRAIN_MARGIN;
        let drained = wait_for_drain(&buffer, stop, deadline);
        drop(stream);
        match drained? {
            Drain::Finished => debug!("playback finished ({:.2}s)", expected.as_secs_f32()),
            Drain::Stopped => info!("playback stopped early"),
        }
        Ok(())
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| AssistantError::Playback(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Drain {
    Finished,
    Stopped,
}

/// Poll until the buffer has been played out, `stop` is raised or `deadline` passes.
fn wait_for_drain(
    buffer: &Mutex<PlaybackBuffer>,
    stop: &AtomicBool,
    deadline: Instant,
) -> Result<Drain> {
    loop {
        if stop.load(Ordering::Acquire) {
            return Ok(Drain::Stopped);
        }
        {
            let buf = buffer.lock().map_err(|e| {
                AssistantError::Playback(format!("playback buffer lock poisoned: {e}"))
            })?;
            if buf.finished {
                return Ok(Drain::Finished);
            }
            if Instant::now() > deadline {
                return Err(AssistantError::Playback(format!(
                    "output device stalled at {}/{} samples",
                    buf.position,
                    buf.samples.len()
                )));
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

impl PlaybackBuffer {
    fn next_sample(&mut self) -> f32 {
        match self.samples.get(self.position) {
            Some(&s) => {
                self.position += 1;
                s
            }
            None => {
                self.finished = true;
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn pending_buffer() -> Mutex<PlaybackBuffer> {
        Mutex::new(PlaybackBuffer {
            samples: vec![0.1; 48_000],
            position: 0,
            finished: false,
        })
    }

    #[test]
    fn raised_stop_flag_ends_the_drain_wait() {
        let buffer = pending_buffer();
        let stop = AtomicBool::new(true);
        let far = Instant::now() + Duration::from_secs(600);
        assert_eq!(wait_for_drain(&buffer, &stop, far).unwrap(), Drain::Stopped);
    }

    #[test]
    fn dropping_the_guard_stops_a_blocked_player() {
        let buffer = Arc::new(pending_buffer());
        let guard = StopOnDrop::default();
        let flag = guard.flag();
        let waiter = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                let far = Instant::now() + Duration::from_secs(600);
                wait_for_drain(&buffer, &flag, far)
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.join().unwrap().unwrap(), Drain::Stopped);
    }

    #[test]
    fn drain_reports_finish_and_stall() {
        let stop = AtomicBool::new(false);
        let done = Mutex::new(PlaybackBuffer {
            samples: Vec::new(),
            position: 0,
            finished: true,
        });
        let soon = Instant::now() + Duration::from_secs(5);
        assert_eq!(wait_for_drain(&done, &stop, soon).unwrap(), Drain::Finished);

        let stuck = pending_buffer();
        let past = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            wait_for_drain(&stuck, &stop, past),
            Err(AssistantError::Playback(_))
        ));
    }

    #[test]
    fn buffer_marks_finished_only_after_last_sample() {
        let mut buf = PlaybackBuffer {
            samples: vec![0.1, 0.2],
            position: 0,
            finished: false,
        };
        assert_eq!(buf.next_sample(), 0.1);
        assert_eq!(buf.next_sample(), 0.2);
        assert!(!buf.finished);
        assert_eq!(buf.next_sample(), 0.0);
        assert!(buf.finished);
    }
}
