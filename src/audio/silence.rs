//! Silence-aware utterance detection.
//!
//! Measures chunk volume in dBFS and finalizes the recorded clip once the
//! volume has stayed below the silent threshold for the configured duration
//! after speech was heard. Timing is derived from sample counts, so the
//! detector is deterministic for a given input.

use crate::config::{AudioConfig, CaptureSettings};
use crate::pipeline::messages::{AudioChunk, AudioClip};
use std::time::Instant;
use tracing::{debug, info};

/// Silence-aware recorder state for one capture session.
pub struct SilenceDetector {
    /// Samples recorded since `start()`.
    buffer: Vec<f32>,
    recording: bool,
    /// Whether any chunk reached the threshold since `start()`.
    heard_speech: bool,
    /// Consecutive silent samples at the tail of the buffer.
    silent_samples: usize,
    silence_duration_ms: u32,
    silent_threshold_db: f32,
    min_decibels: f32,
    sample_rate: u32,
    started_at: Option<Instant>,
    volume: VolumeRange,
}

/// Running min/max of observed volume, used to normalize the meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRange {
    pub min_db: f32,
    pub max_db: f32,
}

impl VolumeRange {
    /// Initial range: the measurement floor up to full scale.
    fn reset(floor_db: f32) -> Self {
        Self {
            min_db: floor_db,
            max_db: 0.0,
        }
    }

    fn observe(&mut self, db: f32) {
        if db > self.max_db {
            self.max_db = db;
        }
        if db < self.min_db {
            self.min_db = db;
        }
    }

    /// Position of `db` within the observed range, in `0.0..=1.0`.
    pub fn level(&self, db: f32) -> f32 {
        let span = self.max_db - self.min_db;
        if span <= f32::EPSILON {
            return 0.0;
        }
        ((db - self.min_db) / span).clamp(0.0, 1.0)
    }
}

impl SilenceDetector {
    pub fn new(settings: &CaptureSettings, audio: &AudioConfig) -> Self {
        info!(
            "silence detector: threshold={}dB, silence={}ms",
            settings.silent_threshold_db, settings.silence_duration_ms
        );
        Self {
            buffer: Vec::new(),
            recording: false,
            heard_speech: false,
            silent_samples: 0,
            silence_duration_ms: settings.silence_duration_ms,
            silent_threshold_db: settings.silent_threshold_db,
            min_decibels: audio.min_decibels,
            sample_rate: audio.input_sample_rate,
            started_at: None,
            volume: VolumeRange::reset(audio.min_decibels),
        }
    }

    /// Begin a new recording. Resets the volume meter range, keeps thresholds.
    pub fn start(&mut self) {
        self.buffer.clear();
        self.heard_speech = false;
        self.silent_samples = 0;
        self.started_at = Some(Instant::now());
        self.volume = VolumeRange::reset(self.min_decibels);
        self.recording = true;
    }

    /// Stop recording and discard any partial utterance.
    pub fn stop(&mut self) {
        if self.recording && !self.buffer.is_empty() {
            debug!("discarding {} partial samples", self.buffer.len());
        }
        self.recording = false;
        self.buffer.clear();
        self.heard_speech = false;
        self.silent_samples = 0;
        self.started_at = None;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn volume_range(&self) -> VolumeRange {
        self.volume
    }

    /// Volume of `samples` in dBFS, floored at `min_decibels`.
    pub fn measure_db(&self, samples: &[f32]) -> f32 {
        to_dbfs(compute_rms(samples), self.min_decibels)
    }

    /// Feed one chunk. Returns the measured volume and, when an utterance
    /// just ended, the finalized clip (recording stops at that point).
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> (f32, Option<AudioClip>) {
        let db = self.measure_db(&chunk.samples);
        if !self.recording {
            return (db, None);
        }
        self.volume.observe(db);

        self.buffer.extend_from_slice(&chunk.samples);
        if db >= self.silent_threshold_db {
            self.heard_speech = true;
            self.silent_samples = 0;
            return (db, None);
        }

        self.silent_samples += chunk.samples.len();
        let silence_limit = self.silence_limit_samples();

        if !self.heard_speech {
            // Keep at most one silence window of pre-roll before speech.
            if self.buffer.len() > silence_limit {
                let excess = self.buffer.len() - silence_limit;
                self.buffer.drain(..excess);
            }
            return (db, None);
        }

        if self.silent_samples >= silence_limit {
            let clip = AudioClip {
                samples: std::mem::take(&mut self.buffer),
                sample_rate: self.sample_rate,
                started_at: self.started_at.unwrap_or_else(Instant::now),
            };
            info!(
                "utterance finalized: {:.1}s after {}ms of silence",
                clip.duration().as_secs_f32(),
                self.silence_duration_ms
            );
            self.stop();
            return (db, Some(clip));
        }

        (db, None)
    }

    fn silence_limit_samples(&self) -> usize {
        (self.silence_duration_ms as usize * self.sample_rate as usize) / 1000
    }
}

/// Compute RMS energy of audio samples.
fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn to_dbfs(rms: f32, floor_db: f32) -> f32 {
    if rms <= 0.0 {
        return floor_db;
    }
    (20.0 * rms.log10()).max(floor_db)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const RATE: u32 = 16_000;
    /// 100 ms chunks.
    const CHUNK: usize = 1_600;

    fn detector(silence_ms: u32, threshold_db: f32) -> SilenceDetector {
        let settings = CaptureSettings {
            silence_duration_ms: silence_ms,
            silent_threshold_db: threshold_db,
            ..CaptureSettings::default()
        };
        SilenceDetector::new(&settings, &AudioConfig::default())
    }

    fn chunk(amplitude: f32) -> AudioChunk {
        AudioChunk {
            samples: vec![amplitude; CHUNK],
            sample_rate: RATE,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn dbfs_of_full_scale_is_zero() {
        let d = detector(2500, -30.0);
        assert!(d.measure_db(&[1.0; 64]).abs() < 1e-4);
        assert!((d.measure_db(&[0.1; 64]) + 20.0).abs() < 1e-3);
        assert_eq!(d.measure_db(&[0.0; 64]), -100.0);
        assert_eq!(d.measure_db(&[]), -100.0);
    }

    #[test]
    fn emits_after_silence_duration_following_speech() {
        let mut d = detector(500, -30.0);
        d.start();
        // 0.1 amplitude = -20 dB (speech), 0.001 = -60 dB (silence).
        for _ in 0..5 {
            assert!(d.process_chunk(&chunk(0.1)).1.is_none());
        }
        for _ in 0..4 {
            assert!(d.process_chunk(&chunk(0.001)).1.is_none());
        }
        let (_, clip) = d.process_chunk(&chunk(0.001));
        let clip = clip.expect("clip after 500ms of silence");
        assert_eq!(clip.samples.len(), 10 * CHUNK);
        assert_eq!(clip.sample_rate, RATE);
        assert!(!d.is_recording(), "recording stops on emission");
    }

    #[test]
    fn speech_resets_silence_timer() {
        let mut d = detector(500, -30.0);
        d.start();
        d.process_chunk(&chunk(0.1));
        for _ in 0..4 {
            assert!(d.process_chunk(&chunk(0.001)).1.is_none());
        }
        d.process_chunk(&chunk(0.1));
        for _ in 0..4 {
            assert!(d.process_chunk(&chunk(0.001)).1.is_none());
        }
        assert!(d.process_chunk(&chunk(0.001)).1.is_some());
    }

    #[test]
    fn silence_alone_never_emits_and_preroll_is_bounded() {
        let mut d = detector(500, -30.0);
        d.start();
        for _ in 0..50 {
            assert!(d.process_chunk(&chunk(0.0)).1.is_none());
        }
        assert!(d.is_recording());
        assert!(d.buffer.len() <= 8_000);
    }

    #[test]
    fn stop_discards_partial_utterance() {
        let mut d = detector(500, -30.0);
        d.start();
        d.process_chunk(&chunk(0.1));
        d.stop();
        assert!(!d.is_recording());
        for _ in 0..10 {
            assert!(d.process_chunk(&chunk(0.001)).1.is_none());
        }
    }

    #[test]
    fn chunks_while_stopped_are_ignored() {
        let mut d = detector(500, -30.0);
        let (db, clip) = d.process_chunk(&chunk(0.5));
        assert!(db > -30.0);
        assert!(clip.is_none());
        assert!(d.buffer.is_empty());
    }

    #[test]
    fn restart_resets_volume_range_but_not_threshold() {
        let mut d = detector(500, -30.0);
        d.start();
        // Clipped input above full scale widens the range.
        d.process_chunk(&chunk(2.0));
        assert!(d.volume_range().max_db > 6.0);

        d.start();
        assert_eq!(d.volume_range(), VolumeRange::reset(-100.0));
        assert_eq!(d.silent_threshold_db, -30.0);
        assert_eq!(d.silence_duration_ms, 500);
    }

    #[test]
    fn volume_level_normalizes_within_range() {
        let mut range = VolumeRange::reset(-100.0);
        assert_eq!(range, VolumeRange { min_db: -100.0, max_db: 0.0 });
        assert!((range.level(-50.0) - 0.5).abs() < 1e-6);
        assert_eq!(range.level(-100.0), 0.0);
        assert_eq!(range.level(0.0), 1.0);

        range.observe(-20.0);
        assert!((range.level(-60.0) - 0.4).abs() < 1e-6);
        range.observe(20.0);
        assert!((range.level(-40.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn first_chunk_after_start_gets_a_meaningful_level() {
        let mut d = detector(500, -30.0);
        d.start();
        let (db, _) = d.process_chunk(&chunk(0.1));
        let level = d.volume_range().level(db);
        assert!((level - 0.8).abs() < 1e-3, "level {level}");
    }
}
