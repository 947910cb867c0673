//! Video capture and pacing module
//!
//! V4L2 capture backends, pixel normalization to RGB24, frame pacing and
//! the per-stream producer that feeds the session transport.

pub mod capture;
pub mod clock;
pub mod convert;
pub mod device;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod producer;
pub mod source;

pub use capture::{DepthPairSource, SingleCameraSource};
pub use clock::{FrameClock, PacedTimestamp, VIDEO_CLOCK_RATE};
pub use device::{VideoDevice, VideoDeviceInfo};
pub use encoder::{H264Config, H264Encoder};
pub use format::{PixelFormat, Resolution};
pub use frame::RgbFrame;
pub use producer::{MediaSample, MediaSink, TrackProducer};
pub use source::{open_source, FrameSource, FrameSourceSpec, SourceKind, StreamSelect};
