//! Microphone input for the recorder.
//!
//! The input stream stays open for the whole conversation; whether audio is
//! kept is decided downstream. The device callback downmixes and hands
//! samples to a [`ChunkAssembler`], which converts them to the detector rate
//! and cuts even chunks so silence timing does not depend on the buffer size
//! the device happens to pick.

use crate::audio::resample::{downmix, resample};
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use crate::pipeline::messages::AudioChunk;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

/// Length of every chunk handed to the recorder.
const CHUNK_MS: u32 = 100;

/// Anything that can feed microphone chunks to the recorder.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Send chunks to `tx` until `cancel` fires.
    ///
    /// Returns an error when the input cannot be opened.
    async fn stream(&self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()>;
}

/// The configured (or default) system microphone.
#[derive(Debug, Clone)]
pub struct Microphone {
    config: AudioConfig,
}

impl Microphone {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// Names of every input device the host reports.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| AssistantError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }
}

#[async_trait]
impl AudioInput for Microphone {
    async fn stream(&self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()> {
        let config = self.config.clone();
        let runtime = tokio::runtime::Handle::current();
        // The cpal stream must stay on the thread that built it.
        tokio::task::spawn_blocking(move || {
            let stream = open_input(&config, tx)?;
            runtime.block_on(cancel.cancelled());
            drop(stream);
            info!("microphone closed");
            Ok(())
        })
        .await
        .map_err(|e| AssistantError::Audio(format!("microphone thread failed: {e}")))?
    }
}

fn open_input(config: &AudioConfig, tx: mpsc::Sender<AudioChunk>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match &config.input_device {
        Some(name) => host
            .input_devices()
            .map_err(|e| AssistantError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
            .ok_or_else(|| AssistantError::Audio(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| AssistantError::Audio("no default input device".into()))?,
    };
    let native = device
        .default_input_config()
        .map_err(|e| AssistantError::Audio(format!("no default input config: {e}")))?;
    let stream_config = cpal::StreamConfig {
        channels: native.channels(),
        sample_rate: native.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = stream_config.channels;
    let mut assembler =
        ChunkAssembler::new(stream_config.sample_rate, config.input_sample_rate, CHUNK_MS);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for samples in assembler.push(&downmix(data, channels)) {
                    let chunk = AudioChunk {
                        samples,
                        sample_rate: assembler.target_rate,
                        captured_at: Instant::now(),
                    };
                    // Never block the device thread.
                    if tx.try_send(chunk).is_err() {
                        trace!("recorder behind, chunk dropped");
                    }
                }
            },
            |err| error!("microphone stream error: {err}"),
            None,
        )
        .map_err(|e| AssistantError::Audio(format!("failed to build input stream: {e}")))?;
    stream
        .play()
        .map_err(|e| AssistantError::Audio(format!("failed to start input stream: {e}")))?;

    info!(
        "microphone open: {}Hz x{channels} -> {}Hz mono, {CHUNK_MS}ms chunks",
        stream_config.sample_rate, config.input_sample_rate
    );
    Ok(stream)
}

/// Collects device-rate mono audio into fixed-length chunks at the target rate.
#[derive(Debug)]
pub(crate) struct ChunkAssembler {
    native_rate: u32,
    target_rate: u32,
    chunk_len: usize,
    pending: Vec<f32>,
}

impl ChunkAssembler {
    pub(crate) fn new(native_rate: u32, target_rate: u32, chunk_ms: u32) -> Self {
        let chunk_len = (target_rate as usize * chunk_ms as usize / 1000).max(1);
        Self {
            native_rate,
            target_rate,
            chunk_len,
            pending: Vec::with_capacity(chunk_len * 2),
        }
    }

    /// Add one device buffer; returns every chunk it completed.
    pub(crate) fn push(&mut self, mono: &[f32]) -> Vec<Vec<f32>> {
        self.pending
            .extend(resample(mono, self.native_rate, self.target_rate));
        let mut ready = Vec::new();
        while self.pending.len() >= self.chunk_len {
            let rest = self.pending.split_off(self.chunk_len);
            ready.push(std::mem::replace(&mut self.pending, rest));
        }
        ready
    }
}
