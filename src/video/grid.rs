//! Frame grid compositor.
//!
//! Packs the frames of one turn into a single JPEG so the vision models get
//! every frame through one image URL. Frames are laid out row-major (frame 0
//! top-left) in cells of `image_width` pixels, with the cell height taken
//! from the first frame's aspect ratio. Trailing cells stay black.

use crate::config::CaptureSettings;
use crate::error::{AssistantError, Result};
use crate::video::frame::{JpegFrame, data_url_bytes, encode_jpeg};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use tracing::debug;

/// 1×1 transparent PNG returned when a turn has no frames.
pub const PLACEHOLDER_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8/wcAAwAB/2lXzAAAACV0RVh0ZGF0ZTpjcmVhdGU9MjAyMy0xMC0xOFQxNTo0MDozMCswMDowMEfahTAAAAAldEVYdGRhdGU6bW9kaWZ5PTIwMjMtMTAtMThUMTU6NDA6MzArMDA6MDBa8cKfAAAAAElFTkSuQmCC";

/// Largest canvas edge a baseline JPEG can carry.
const MAX_CANVAS_EDGE: u32 = u16::MAX as u32;

/// Cell geometry for a grid of `count` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl GridLayout {
    /// Layout for `count` frames whose first frame is `first_width`×`first_height`.
    pub fn new(count: usize, columns: u32, cell_width: u32, first_width: u32, first_height: u32) -> Self {
        let columns = columns.max(1);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let cell_width = cell_width.max(1);
        let cell_height = if first_width == 0 {
            cell_width
        } else {
            ((f64::from(cell_width) * f64::from(first_height)) / f64::from(first_width))
                .round()
                .max(1.0) as u32
        };
        Self {
            columns,
            rows: count.div_ceil(columns),
            cell_width,
            cell_height,
        }
    }

    /// Canvas dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Image`] when an edge overflows or exceeds
    /// what a JPEG can hold.
    pub fn canvas_size(&self) -> Result<(u32, u32)> {
        let width = self.columns.checked_mul(self.cell_width);
        let height = self.rows.checked_mul(self.cell_height);
        match (width, height) {
            (Some(w), Some(h)) if w <= MAX_CANVAS_EDGE && h <= MAX_CANVAS_EDGE => Ok((w, h)),
            _ => Err(AssistantError::Image(format!(
                "grid of {}x{} cells of {}x{} px is too large",
                self.columns, self.rows, self.cell_width, self.cell_height
            ))),
        }
    }

    /// Top-left pixel of cell `index`.
    pub fn cell_origin(&self, index: u32) -> (u32, u32) {
        (
            (index % self.columns) * self.cell_width,
            (index / self.columns) * self.cell_height,
        )
    }
}

/// Output of [`composite`]: a data URL plus how many frames went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeImage {
    data_url: String,
    frames: usize,
}

impl CompositeImage {
    pub fn placeholder() -> Self {
        Self {
            data_url: PLACEHOLDER_DATA_URL.to_owned(),
            frames: 0,
        }
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_placeholder(&self) -> bool {
        self.frames == 0
    }

    /// Encoded image bytes (JPEG, or PNG for the placeholder).
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Image`] if the payload is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        data_url_bytes(&self.data_url)
    }
}

/// Draw `frames` into a grid canvas.
///
/// # Errors
///
/// Returns [`AssistantError::Image`] when there is nothing to draw or the
/// canvas would be too large.
pub fn render_grid(frames: &[DynamicImage], columns: u32, cell_width: u32) -> Result<RgbImage> {
    let first = frames
        .first()
        .ok_or_else(|| AssistantError::Image("no frames to composite".into()))?;
    let layout = GridLayout::new(frames.len(), columns, cell_width, first.width(), first.height());
    let (w, h) = layout.canvas_size()?;
    let mut canvas = RgbImage::new(w, h);

    for (i, frame) in frames.iter().enumerate() {
        let cell = imageops::resize(
            &frame.to_rgb8(),
            layout.cell_width,
            layout.cell_height,
            FilterType::Triangle,
        );
        let (x, y) = layout.cell_origin(i as u32);
        imageops::replace(&mut canvas, &cell, i64::from(x), i64::from(y));
    }
    Ok(canvas)
}

/// Composite the turn's frames into one JPEG data URL.
///
/// An empty input yields the placeholder image rather than an error.
///
/// # Errors
///
/// Returns [`AssistantError::Image`] if a frame cannot be decoded or the
/// grid cannot be encoded.
pub fn composite(frames: &[JpegFrame], settings: &CaptureSettings) -> Result<CompositeImage> {
    if frames.is_empty() {
        return Ok(CompositeImage::placeholder());
    }
    let decoded = frames
        .iter()
        .map(JpegFrame::decode)
        .collect::<Result<Vec<_>>>()?;
    let canvas = render_grid(&decoded, settings.columns, settings.image_width)?;
    let jpeg = encode_jpeg(&canvas, settings.jpeg_quality())?;
    debug!(
        "composited {} frames into {}x{} grid ({} bytes)",
        frames.len(),
        canvas.width(),
        canvas.height(),
        jpeg.len()
    );
    Ok(CompositeImage {
        data_url: format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)),
        frames: frames.len(),
    })
}
