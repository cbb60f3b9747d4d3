//! JPEG frames carried as `data:` URLs.

use crate::error::{AssistantError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

const JPEG_PREFIX: &str = "data:image/jpeg;base64,";

/// One downscaled camera frame, encoded as a base64 JPEG data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegFrame(String);

impl JpegFrame {
    /// Encode an RGB image at `quality` (1..=100).
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Image`] if the JPEG encoder fails.
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self> {
        let bytes = encode_jpeg(image, quality)?;
        Ok(Self(format!("{JPEG_PREFIX}{}", STANDARD.encode(bytes))))
    }

    /// Raw JPEG bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Image`] if the payload is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        data_url_bytes(&self.0)
    }

    /// Decode to pixels.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Image`] if the payload cannot be decoded.
    pub fn decode(&self) -> Result<DynamicImage> {
        let bytes = self.to_bytes()?;
        image::load_from_memory(&bytes)
            .map_err(|e| AssistantError::Image(format!("cannot decode frame: {e}")))
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| AssistantError::Image(format!("JPEG encode failed: {e}")))?;
    Ok(out)
}

/// Decode the base64 payload of a `data:` URL.
pub(crate) fn data_url_bytes(url: &str) -> Result<Vec<u8>> {
    let (_, payload) = url
        .split_once(',')
        .ok_or_else(|| AssistantError::Image("not a data URL".into()))?;
    STANDARD
        .decode(payload)
        .map_err(|e| AssistantError::Image(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn encode_then_decode_keeps_dimensions() {
        let img = RgbImage::from_pixel(64, 48, image::Rgb([200, 10, 10]));
        let frame = JpegFrame::encode(&img, 60).unwrap();
        assert!(frame.0.starts_with(JPEG_PREFIX));
        assert_eq!(&frame.to_bytes().unwrap()[..2], &[0xFF, 0xD8]);
        let back = frame.decode().unwrap();
        assert_eq!((back.width(), back.height()), (64, 48));
    }

    #[test]
    fn payloads_that_are_not_data_urls_fail_to_decode() {
        assert!(matches!(data_url_bytes("no comma"), Err(AssistantError::Image(_))));
        assert!(matches!(
            data_url_bytes("data:image/jpeg;base64,@@@"),
            Err(AssistantError::Image(_))
        ));
    }
}
