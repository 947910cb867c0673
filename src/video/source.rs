//! Frame source abstraction
//!
//! A frame source is one camera backend normalized behind a single trait:
//! the producer asks for exactly one frame per pacing tick and never sees
//! which device, format or stream variant sits underneath.

use async_trait::async_trait;

use crate::error::Result;
use crate::video::capture::{DepthPairSource, SingleCameraSource};
use crate::video::format::Resolution;
use crate::video::frame::RgbFrame;

/// Backend kind for a frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Single color camera on one V4L2 node
    Rgb,
    /// Depth sensor exposing a Z16 node and a color node
    DepthColorPair,
}

/// Which stream of a multi-stream sensor to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelect {
    Color,
    DepthVisualized,
}

/// Immutable description of the frame source to open
#[derive(Debug, Clone, Copy)]
pub struct FrameSourceSpec {
    pub kind: SourceKind,
    pub selector: StreamSelect,
    /// Device index for single-camera sources
    pub device_index: u32,
    pub resolution: Resolution,
    pub target_fps: u32,
}

impl FrameSourceSpec {
    /// Stream label used in logs and producer exit reports
    pub fn label(&self) -> String {
        match (self.kind, self.selector) {
            (SourceKind::Rgb, _) => format!("rgb{}", self.device_index),
            (SourceKind::DepthColorPair, StreamSelect::Color) => "depth-cam-color".to_string(),
            (SourceKind::DepthColorPair, StreamSelect::DepthVisualized) => {
                "depth-cam-depth".to_string()
            }
        }
    }
}

/// A camera backend producing one canonical RGB24 frame per call.
///
/// `capture_one` fails with `ReadFailure` when the device stops
/// delivering and with `StreamNotLive` after `close`. `close` is
/// idempotent.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture, convert and return exactly one frame
    async fn capture_one(&self) -> Result<RgbFrame>;

    /// Release the backing device handle(s)
    async fn close(&self);

    /// Stream label for logs
    fn label(&self) -> &str;
}

/// Open the backend described by the spec
pub async fn open_source(spec: &FrameSourceSpec) -> Result<Box<dyn FrameSource>> {
    match spec.kind {
        SourceKind::Rgb => {
            let source = SingleCameraSource::open(spec).await?;
            Ok(Box::new(source))
        }
        SourceKind::DepthColorPair => {
            let source = DepthPairSource::open(spec).await?;
            Ok(Box::new(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let spec = FrameSourceSpec {
            kind: SourceKind::Rgb,
            selector: StreamSelect::Color,
            device_index: 2,
            resolution: Resolution::VGA,
            target_fps: 30,
        };
        assert_eq!(spec.label(), "rgb2");

        let spec = FrameSourceSpec {
            kind: SourceKind::DepthColorPair,
            selector: StreamSelect::DepthVisualized,
            device_index: 0,
            resolution: Resolution::VGA,
            target_fps: 30,
        };
        assert_eq!(spec.label(), "depth-cam-depth");
    }
}
