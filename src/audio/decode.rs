//! In-memory decoding of synthesized speech (mp3/wav) with symphonia.

use crate::error::{AssistantError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded mono PCM.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode an encoded audio blob to mono f32.
///
/// `content_type` is used as a probe hint only; the container is sniffed
/// from the bytes.
///
/// # Errors
///
/// Returns [`AssistantError::Playback`] when the blob cannot be probed or decoded.
pub fn decode_to_mono(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(AssistantError::Playback("audio blob is empty".into()));
    }

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(mime) = content_type {
        hint.mime_type(mime);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AssistantError::Playback(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AssistantError::Playback("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AssistantError::Playback(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(AssistantError::Playback(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Corrupt frames are skipped, matching browser playback.
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(AssistantError::Playback(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let channels = spec.channels.count().max(1);
        let frames = decoded.capacity() as u64;

        let too_small = sample_buf
            .as_ref()
            .is_none_or(|b| b.capacity() < decoded.frames() * channels);
        if too_small {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }

        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let data = buf.samples();
        if channels == 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    if sample_rate == 0 {
        return Err(AssistantError::Playback("unknown sample rate".into()));
    }
    if out.is_empty() {
        return Err(AssistantError::Playback("audio contained no samples".into()));
    }

    Ok(DecodedAudio {
        samples: out,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn stereo_wav(frames: usize, rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames {
                w.write_sample(i16::MAX / 2).unwrap();
                w.write_sample(0_i16).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_and_downmixes() {
        let wav = stereo_wav(2_400, 24_000);
        let audio = decode_to_mono(&wav, Some("audio/wav")).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.samples.len(), 2_400);
        assert!((audio.samples[10] - 0.25).abs() < 0.01);
        assert!((audio.duration_secs() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn empty_blob_is_rejected() {
        let err = decode_to_mono(&[], None).unwrap_err();
        assert!(matches!(err, AssistantError::Playback(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_to_mono(b"definitely not audio", Some("audio/mpeg")).is_err());
    }
}
