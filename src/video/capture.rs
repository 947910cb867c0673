//! V4L2 capture backends
//!
//! Pull-based capture using memory-mapped buffers: the owning producer
//! requests exactly one frame per pacing tick, so there is no free-running
//! capture thread. All V4L2 calls run on the blocking pool.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;

use super::convert::{self, DepthVisualizer};
use super::device::{self, VideoDevice};
use super::format::{PixelFormat, Resolution};
use super::frame::RgbFrame;
use super::source::{FrameSource, FrameSourceSpec, StreamSelect};
use crate::error::{AppError, Result};

/// Memory-mapped capture buffers per stream
const CAPTURE_BUFFERS: u32 = 4;
/// Open retries when the device reports busy
const OPEN_RETRIES: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Frames smaller than this are driver glitches, re-read
const MIN_FRAME_SIZE: usize = 128;
/// Re-reads before an undersized stream counts as failed
const READ_ATTEMPTS: u32 = 3;

/// Device-loss errnos: ENXIO, ENODEV, EIO, EPIPE, ESHUTDOWN
fn is_device_lost(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(6) | Some(19) | Some(5) | Some(32) | Some(108))
}

fn read_failure(device: &str, err: &io::Error) -> AppError {
    let reason = if is_device_lost(err) {
        format!("device lost: {}", err)
    } else {
        err.to_string()
    };
    AppError::ReadFailure {
        device: device.to_string(),
        reason,
    }
}

fn open_device_retrying(path: &Path) -> Result<VideoDevice> {
    let mut last_error = None;

    for attempt in 0..OPEN_RETRIES {
        match VideoDevice::open(path) {
            Ok(device) => return Ok(device),
            Err(e) => {
                if !e.to_string().to_lowercase().contains("busy") {
                    return Err(e);
                }
                warn!(
                    "Device busy on attempt {}/{}, retrying in {}ms",
                    attempt + 1,
                    OPEN_RETRIES,
                    OPEN_RETRY_DELAY.as_millis()
                );
                std::thread::sleep(OPEN_RETRY_DELAY);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::DeviceUnavailable {
        device: path.display().to_string(),
        reason: "open failed after retries".to_string(),
    }))
}

/// One negotiated V4L2 stream delivering raw device-format frames
struct CameraStream {
    path: String,
    resolution: Resolution,
    format: PixelFormat,
    stream: MmapStream<'static>,
}

impl CameraStream {
    /// Open a color stream, negotiating the best format the device offers
    fn open_color(path: &Path, resolution: Resolution, fps: u32) -> Result<Self> {
        let device = open_device_retrying(path)?;
        let caps = device.capabilities()?;
        if !caps.video_capture {
            return Err(AppError::DeviceUnavailable {
                device: path.display().to_string(),
                reason: "not a video capture device".to_string(),
            });
        }

        let format = device
            .info()?
            .best_color_format()
            .ok_or_else(|| AppError::DeviceUnavailable {
                device: path.display().to_string(),
                reason: "no supported color format".to_string(),
            })?;

        Self::start(device, resolution, fps, format)
    }

    /// Open the Z16 depth stream of a depth sensor node
    fn open_depth(path: &Path, resolution: Resolution, fps: u32) -> Result<Self> {
        let device = open_device_retrying(path)?;
        Self::start(device, resolution, fps, PixelFormat::Depth16)
    }

    fn start(
        device: VideoDevice,
        resolution: Resolution,
        fps: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let path = device.path.display().to_string();

        let actual = device.set_format(resolution, format)?;
        let actual_format =
            PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
                AppError::VideoError(format!("Driver selected unsupported format {}", actual.fourcc))
            })?;

        if fps > 0 {
            if let Err(e) = device.set_fps(fps) {
                warn!("Failed to set frame rate on {}: {}", path, e);
            }
        }

        let stream = MmapStream::with_buffers(device.inner(), Type::VideoCapture, CAPTURE_BUFFERS)
            .map_err(|e| AppError::DeviceUnavailable {
                device: path.clone(),
                reason: format!("stream setup failed: {}", e),
            })?;

        info!(
            "Capture stream on {}: {}x{} {}",
            path, actual.width, actual.height, actual_format
        );

        Ok(Self {
            path,
            resolution: Resolution::new(actual.width, actual.height),
            format: actual_format,
            stream,
        })
    }

    /// Dequeue one frame and copy out the valid bytes
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        for _ in 0..READ_ATTEMPTS {
            let (buf, meta) = CaptureStream::next(&mut self.stream)
                .map_err(|e| read_failure(&self.path, &e))?;

            let used = meta.bytesused as usize;
            let len = if used > 0 { used.min(buf.len()) } else { buf.len() };
            if len < MIN_FRAME_SIZE {
                debug!("Dropping small frame from {}: {} bytes", self.path, len);
                continue;
            }
            return Ok(buf[..len].to_vec());
        }

        Err(AppError::ReadFailure {
            device: self.path.clone(),
            reason: "no valid frame after repeated reads".to_string(),
        })
    }
}

struct SingleInner {
    stream: CameraStream,
    sequence: u64,
}

/// Single color camera on one V4L2 node
pub struct SingleCameraSource {
    label: String,
    device: String,
    inner: Arc<Mutex<Option<SingleInner>>>,
}

impl SingleCameraSource {
    /// Open the camera selected by the spec's device index
    pub async fn open(spec: &FrameSourceSpec) -> Result<Self> {
        let label = spec.label();
        let path = device::device_path(spec.device_index);
        let device = path.display().to_string();
        let resolution = spec.resolution;
        let fps = spec.target_fps;

        let stream =
            tokio::task::spawn_blocking(move || CameraStream::open_color(&path, resolution, fps))
                .await
                .map_err(|e| AppError::Internal(format!("open task failed: {}", e)))??;

        Ok(Self {
            label,
            device,
            inner: Arc::new(Mutex::new(Some(SingleInner {
                stream,
                sequence: 0,
            }))),
        })
    }
}

#[async_trait::async_trait]
impl FrameSource for SingleCameraSource {
    async fn capture_one(&self) -> Result<RgbFrame> {
        let inner = self.inner.clone();
        let label = self.label.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| AppError::StreamNotLive(label))?;

            let raw = state.stream.read_frame()?;
            let rgb = convert::to_rgb24(state.stream.format, &raw, state.stream.resolution)?;
            let sequence = state.sequence;
            state.sequence += 1;
            Ok(RgbFrame::from_vec(rgb, state.stream.resolution, sequence))
        })
        .await
        .map_err(|e| AppError::Internal(format!("capture task failed: {}", e)))?
    }

    async fn close(&self) {
        let inner = self.inner.clone();
        let device = self.device.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if inner.lock().take().is_some() {
                debug!("Released capture device {}", device);
            }
        })
        .await;
    }

    fn label(&self) -> &str {
        &self.label
    }
}

struct DepthInner {
    depth: CameraStream,
    color: CameraStream,
    visualizer: DepthVisualizer,
    sequence: u64,
}

/// Depth sensor exposing a Z16 node and a color node on one bus.
///
/// Both streams are read every tick to keep them in step; the selector
/// decides which one becomes the emitted frame.
pub struct DepthPairSource {
    label: String,
    selector: StreamSelect,
    inner: Arc<Mutex<Option<DepthInner>>>,
}

impl DepthPairSource {
    /// Discover and open the first connected depth sensor
    pub async fn open(spec: &FrameSourceSpec) -> Result<Self> {
        let label = spec.label();
        let selector = spec.selector;
        let resolution = spec.resolution;
        let fps = spec.target_fps;

        let inner = tokio::task::spawn_blocking(move || -> Result<DepthInner> {
            let pair = device::find_depth_pair()?;
            info!(
                "Depth sensor: depth node {:?}, color node {:?}",
                pair.depth, pair.color
            );

            let depth = CameraStream::open_depth(&pair.depth, resolution, fps)?;
            let color = CameraStream::open_color(&pair.color, resolution, fps)?;
            let visualizer = DepthVisualizer::new(depth.resolution);

            Ok(DepthInner {
                depth,
                color,
                visualizer,
                sequence: 0,
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("open task failed: {}", e)))??;

        Ok(Self {
            label,
            selector,
            inner: Arc::new(Mutex::new(Some(inner))),
        })
    }
}

#[async_trait::async_trait]
impl FrameSource for DepthPairSource {
    async fn capture_one(&self) -> Result<RgbFrame> {
        let inner = self.inner.clone();
        let label = self.label.clone();
        let selector = self.selector;

        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| AppError::StreamNotLive(label))?;

            let depth_raw = state.depth.read_frame()?;
            let color_raw = state.color.read_frame()?;

            let (rgb, resolution) = match selector {
                StreamSelect::Color => {
                    let rgb =
                        convert::to_rgb24(state.color.format, &color_raw, state.color.resolution)?;
                    (rgb, state.color.resolution)
                }
                StreamSelect::DepthVisualized => {
                    let rgb = state.visualizer.convert(&depth_raw)?;
                    (rgb, state.depth.resolution)
                }
            };

            let sequence = state.sequence;
            state.sequence += 1;
            Ok(RgbFrame::from_vec(rgb, resolution, sequence))
        })
        .await
        .map_err(|e| AppError::Internal(format!("capture task failed: {}", e)))?
    }

    async fn close(&self) {
        let inner = self.inner.clone();
        let label = self.label.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if inner.lock().take().is_some() {
                debug!("Released depth sensor streams for {}", label);
            }
        })
        .await;
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_errnos() {
        for errno in [6, 19, 5, 32, 108] {
            let err = io::Error::from_raw_os_error(errno);
            assert!(is_device_lost(&err), "errno {} should be device loss", errno);
        }
        // EAGAIN is transient, not device loss
        let err = io::Error::from_raw_os_error(11);
        assert!(!is_device_lost(&err));
    }

    #[test]
    fn test_read_failure_marks_device_loss() {
        let err = io::Error::from_raw_os_error(19);
        let mapped = read_failure("/dev/video0", &err);
        let text = mapped.to_string();
        assert!(text.contains("/dev/video0"), "{}", text);
        assert!(text.contains("device lost"), "{}", text);
    }
}
