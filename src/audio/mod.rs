//! Microphone capture, silence-aware recording and speaker playback via cpal.

pub mod capture;
pub mod decode;
pub mod playback;
pub mod recorder;
pub(crate) mod resample;
pub mod silence;

pub use capture::{AudioInput, Microphone};
pub use playback::{AudioPlayer, SpeakerPlayer};
pub use recorder::{CaptureControl, CaptureHandle, Recorder};
pub use silence::SilenceDetector;
