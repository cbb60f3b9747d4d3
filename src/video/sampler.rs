//! Periodic camera frame sampling into the shared frame buffer.

use crate::config::CaptureSettings;
use crate::error::{AssistantError, Result};
use crate::video::frame::JpegFrame;
use async_trait::async_trait;
use image::DynamicImage;
use image::imageops::FilterType;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Anything that can hand out the current camera picture.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Whether the video stream is live. Inactive sources are never sampled.
    fn is_active(&self) -> bool {
        true
    }

    /// The current frame, or `None` if no picture is available right now.
    async fn grab(&self) -> Result<Option<DynamicImage>>;
}

/// Reads a still image that an external camera tool keeps overwriting.
#[derive(Debug, Clone)]
pub struct SnapshotFileSource {
    path: PathBuf,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FrameSource for SnapshotFileSource {
    async fn grab(&self) -> Result<Option<DynamicImage>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // A half-written snapshot is skipped until the next tick.
        match image::load_from_memory(&bytes) {
            Ok(img) => Ok(Some(img)),
            Err(e) => {
                debug!("skipping unreadable snapshot {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }
}

/// Bounded FIFO of sampled frames shared by the sampler and the orchestrator.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    inner: Arc<Mutex<VecDeque<JpegFrame>>>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JpegFrame>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a frame, evicting the oldest once full.
    pub fn push(&self, frame: JpegFrame) {
        let mut frames = self.lock();
        frames.push_back(frame);
        while frames.len() > self.capacity {
            frames.pop_front();
        }
    }

    /// Snapshot the newest `max` frames (oldest first) and clear the buffer
    /// in the same critical section.
    pub fn take_latest(&self, max: usize) -> Vec<JpegFrame> {
        let mut frames = self.lock();
        let skip = frames.len().saturating_sub(max);
        frames.drain(..).skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Samples the frame source while recording is active.
pub struct FrameSampler {
    source: Arc<dyn FrameSource>,
    buffer: FrameBuffer,
    settings: CaptureSettings,
    recording: watch::Receiver<bool>,
}

impl FrameSampler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        buffer: FrameBuffer,
        settings: CaptureSettings,
        recording: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            buffer,
            settings,
            recording,
        }
    }

    /// Take one sample. Returns `true` if a frame was appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or the frame cannot be encoded.
    pub async fn sample_once(&self) -> Result<bool> {
        if !*self.recording.borrow() || !self.source.is_active() {
            return Ok(false);
        }
        let Some(image) = self.source.grab().await? else {
            return Ok(false);
        };
        if image.width() == 0 || image.height() == 0 {
            return Ok(false);
        }

        let width = self.settings.image_width;
        let quality = self.settings.jpeg_quality();
        let frame = tokio::task::spawn_blocking(move || downscale_and_encode(&image, width, quality))
            .await
            .map_err(|e| AssistantError::Video(format!("frame encode task failed: {e}")))??;

        // The flag may have dropped while encoding; never attach late frames.
        if !*self.recording.borrow() {
            return Ok(false);
        }
        self.buffer.push(frame);
        Ok(true)
    }

    /// Sample on a fixed interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let period = Duration::from_millis(self.settings.interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("frame sampler running every {}ms", period.as_millis());

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sample_once().await {
                        warn!("frame sample failed: {e}");
                    }
                }
            }
        }
    }
}

fn downscale_and_encode(image: &DynamicImage, width: u32, quality: u8) -> Result<JpegFrame> {
    let width = width.max(1);
    let height = ((f64::from(width) * f64::from(image.height())) / f64::from(image.width()))
        .round()
        .max(1.0) as u32;
    let scaled = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    JpegFrame::encode(&scaled, quality)
}
