//! Camera frame sampling and grid compositing.

pub mod frame;
pub mod grid;
pub mod sampler;

pub use frame::JpegFrame;
pub use grid::{CompositeImage, GridLayout, composite};
pub use sampler::{FrameBuffer, FrameSampler, FrameSource, SnapshotFileSource};
