//! V4L2 device enumeration and capability query
//!
//! Besides plain webcams this understands depth sensors that expose two
//! V4L2 nodes on one physical bus: a Z16 depth node and a color node.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::Format;
use v4l::FourCC;

use super::format::{PixelFormat, Resolution};
use crate::error::{AppError, Result};

/// Information about a video device
#[derive(Debug, Clone)]
pub struct VideoDeviceInfo {
    /// Device path (e.g., /dev/video0)
    pub path: PathBuf,
    /// Device name from driver
    pub name: String,
    /// Driver name
    pub driver: String,
    /// Bus info, shared by nodes of one physical sensor
    pub bus_info: String,
    /// Supported pixel formats
    pub formats: Vec<FormatInfo>,
    /// Device capabilities
    pub capabilities: DeviceCapabilities,
}

impl VideoDeviceInfo {
    /// Whether the device exposes a Z16 depth stream
    pub fn has_depth(&self) -> bool {
        self.formats.iter().any(|f| f.format == PixelFormat::Depth16)
    }

    /// Best color format the device offers, if any
    pub fn best_color_format(&self) -> Option<PixelFormat> {
        self.formats
            .iter()
            .map(|f| f.format)
            .filter(|f| *f != PixelFormat::Depth16)
            .max_by_key(|f| f.priority())
    }
}

/// Information about a supported format
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Pixel format
    pub format: PixelFormat,
    /// Supported resolutions
    pub resolutions: Vec<ResolutionInfo>,
    /// Description from driver
    pub description: String,
}

/// Information about a supported resolution and frame rates
#[derive(Debug, Clone)]
pub struct ResolutionInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Vec<u32>,
}

impl ResolutionInfo {
    pub fn new(width: u32, height: u32, fps: Vec<u32>) -> Self {
        Self { width, height, fps }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Device capabilities
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub video_capture: bool,
    pub streaming: bool,
}

/// Path for a camera selected by index
pub fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{}", index))
}

/// Wrapper around a V4L2 video device
pub struct VideoDevice {
    pub path: PathBuf,
    device: Device,
}

impl VideoDevice {
    /// Open a video device by path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening video device: {:?}", path);

        let device = Device::with_path(&path).map_err(|e| AppError::DeviceUnavailable {
            device: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { path, device })
    }

    /// Get device capabilities
    pub fn capabilities(&self) -> Result<DeviceCapabilities> {
        let caps = self
            .device
            .query_caps()
            .map_err(|e| AppError::VideoError(format!("Failed to query capabilities: {}", e)))?;

        Ok(DeviceCapabilities {
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    /// Get detailed device information
    pub fn info(&self) -> Result<VideoDeviceInfo> {
        let caps = self
            .device
            .query_caps()
            .map_err(|e| AppError::VideoError(format!("Failed to query capabilities: {}", e)))?;

        let capabilities = DeviceCapabilities {
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
        };

        let formats = self.enumerate_formats()?;

        Ok(VideoDeviceInfo {
            path: self.path.clone(),
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus_info: caps.bus.clone(),
            formats,
            capabilities,
        })
    }

    /// Enumerate supported formats
    pub fn enumerate_formats(&self) -> Result<Vec<FormatInfo>> {
        let mut formats = Vec::new();

        let format_descs = self
            .device
            .enum_formats()
            .map_err(|e| AppError::VideoError(format!("Failed to enumerate formats: {}", e)))?;

        for desc in format_descs {
            if let Some(format) = PixelFormat::from_fourcc(desc.fourcc) {
                let resolutions = self.enumerate_resolutions(desc.fourcc)?;

                formats.push(FormatInfo {
                    format,
                    resolutions,
                    description: desc.description.clone(),
                });
            } else {
                debug!(
                    "Skipping unsupported format: {:?} ({})",
                    desc.fourcc, desc.description
                );
            }
        }

        formats.sort_by(|a, b| b.format.priority().cmp(&a.format.priority()));

        Ok(formats)
    }

    /// Enumerate resolutions for a specific format
    fn enumerate_resolutions(&self, fourcc: FourCC) -> Result<Vec<ResolutionInfo>> {
        let mut resolutions = Vec::new();

        match self.device.enum_framesizes(fourcc) {
            Ok(sizes) => {
                for size in sizes {
                    match size.size {
                        v4l::framesize::FrameSizeEnum::Discrete(d) => {
                            let fps =
                                self.enumerate_fps(fourcc, d.width, d.height).unwrap_or_default();
                            resolutions.push(ResolutionInfo::new(d.width, d.height, fps));
                        }
                        v4l::framesize::FrameSizeEnum::Stepwise(s) => {
                            // For stepwise, probe the common resolutions
                            for res in [Resolution::VGA, Resolution::HD720, Resolution::HD1080] {
                                if res.width >= s.min_width
                                    && res.width <= s.max_width
                                    && res.height >= s.min_height
                                    && res.height <= s.max_height
                                {
                                    let fps = self
                                        .enumerate_fps(fourcc, res.width, res.height)
                                        .unwrap_or_default();
                                    resolutions.push(ResolutionInfo::new(
                                        res.width, res.height, fps,
                                    ));
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                debug!("Failed to enumerate frame sizes for {:?}: {}", fourcc, e);
            }
        }

        resolutions.sort_by(|a, b| (b.width * b.height).cmp(&(a.width * a.height)));
        resolutions.dedup_by(|a, b| a.width == b.width && a.height == b.height);

        Ok(resolutions)
    }

    /// Enumerate FPS for a specific resolution
    fn enumerate_fps(&self, fourcc: FourCC, width: u32, height: u32) -> Result<Vec<u32>> {
        let mut fps_list = Vec::new();

        match self.device.enum_frameintervals(fourcc, width, height) {
            Ok(intervals) => {
                for interval in intervals {
                    if let v4l::frameinterval::FrameIntervalEnum::Discrete(fraction) =
                        interval.interval
                    {
                        if fraction.numerator > 0 {
                            fps_list.push(fraction.denominator / fraction.numerator);
                        }
                    }
                }
            }
            Err(_) => {
                // If enumeration fails, assume 30fps
                fps_list.push(30);
            }
        }

        fps_list.sort_by(|a, b| b.cmp(a));
        fps_list.dedup();
        Ok(fps_list)
    }

    /// Set capture format
    pub fn set_format(&self, resolution: Resolution, format: PixelFormat) -> Result<Format> {
        let fmt = Format::new(resolution.width, resolution.height, format.to_fourcc());

        let actual = self
            .device
            .set_format(&fmt)
            .map_err(|e| AppError::VideoError(format!("Failed to set format: {}", e)))?;

        if actual.width != resolution.width || actual.height != resolution.height {
            warn!(
                "Requested {}, got {}x{}",
                resolution, actual.width, actual.height
            );
        }

        Ok(actual)
    }

    /// Request a capture frame rate; drivers are free to pick the nearest
    pub fn set_fps(&self, fps: u32) -> Result<()> {
        let params = v4l::video::capture::Parameters::with_fps(fps);
        self.device
            .set_params(&params)
            .map_err(|e| AppError::VideoError(format!("Failed to set frame rate: {}", e)))?;
        Ok(())
    }

    /// Get the inner device reference (for stream setup)
    pub fn inner(&self) -> &Device {
        &self.device
    }

    /// Take the inner device
    pub fn into_inner(self) -> Device {
        self.device
    }
}

/// Enumerate all video capture devices
pub fn enumerate_devices() -> Result<Vec<VideoDeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev")
        .map_err(|e| AppError::VideoError(format!("Failed to read /dev: {}", e)))?
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        let index: u32 = match name.strip_prefix("video").and_then(|n| n.parse().ok()) {
            Some(i) => i,
            None => continue,
        };

        debug!("Found video device: {:?} (index {})", path, index);

        match VideoDevice::open(&path) {
            Ok(device) => match device.info() {
                Ok(info) => {
                    if info.capabilities.video_capture && !info.formats.is_empty() {
                        devices.push((index, info));
                    } else {
                        debug!("Skipping non-capture device: {:?}", path);
                    }
                }
                Err(e) => {
                    debug!("Failed to get info for {:?}: {}", path, e);
                }
            },
            Err(e) => {
                debug!("Failed to open {:?}: {}", path, e);
            }
        }
    }

    devices.sort_by_key(|(index, _)| *index);
    let devices: Vec<VideoDeviceInfo> = devices.into_iter().map(|(_, info)| info).collect();

    info!("Found {} video capture devices", devices.len());
    Ok(devices)
}

/// Depth and color node paths of one physical depth sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthPairPaths {
    pub depth: PathBuf,
    pub color: PathBuf,
}

/// Pair a Z16 depth node with a color node on the same bus
pub fn pair_depth_nodes(devices: &[VideoDeviceInfo]) -> Option<DepthPairPaths> {
    for depth_node in devices.iter().filter(|d| d.has_depth()) {
        let color_node = devices.iter().find(|d| {
            d.path != depth_node.path
                && d.bus_info == depth_node.bus_info
                && d.best_color_format().is_some()
        });
        if let Some(color_node) = color_node {
            return Some(DepthPairPaths {
                depth: depth_node.path.clone(),
                color: color_node.path.clone(),
            });
        }
    }
    None
}

/// Find a connected depth sensor's node pair
pub fn find_depth_pair() -> Result<DepthPairPaths> {
    let devices = enumerate_devices()?;
    pair_depth_nodes(&devices).ok_or_else(|| AppError::DeviceUnavailable {
        device: "depth sensor".to_string(),
        reason: "no Z16 depth node with a color node on the same bus".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(path: &str, bus: &str, formats: Vec<PixelFormat>) -> VideoDeviceInfo {
        VideoDeviceInfo {
            path: PathBuf::from(path),
            name: "test".to_string(),
            driver: "test".to_string(),
            bus_info: bus.to_string(),
            formats: formats
                .into_iter()
                .map(|format| FormatInfo {
                    format,
                    resolutions: vec![ResolutionInfo::new(640, 480, vec![30])],
                    description: String::new(),
                })
                .collect(),
            capabilities: DeviceCapabilities {
                video_capture: true,
                streaming: true,
            },
        }
    }

    #[test]
    fn test_pairs_depth_with_color_on_same_bus() {
        let devices = vec![
            synthetic("/dev/video0", "usb-0000:00:14.0-1", vec![PixelFormat::Yuyv]),
            synthetic("/dev/video2", "usb-0000:00:14.0-2", vec![PixelFormat::Depth16]),
            synthetic(
                "/dev/video4",
                "usb-0000:00:14.0-2",
                vec![PixelFormat::Yuyv, PixelFormat::Mjpeg],
            ),
        ];
        let pair = pair_depth_nodes(&devices).unwrap();
        assert_eq!(pair.depth, PathBuf::from("/dev/video2"));
        assert_eq!(pair.color, PathBuf::from("/dev/video4"));
    }

    #[test]
    fn test_no_pair_without_matching_bus() {
        let devices = vec![
            synthetic("/dev/video0", "usb-1", vec![PixelFormat::Depth16]),
            synthetic("/dev/video2", "usb-2", vec![PixelFormat::Yuyv]),
        ];
        assert!(pair_depth_nodes(&devices).is_none());
    }

    #[test]
    fn test_best_color_format_skips_depth() {
        let info = synthetic(
            "/dev/video0",
            "usb-1",
            vec![PixelFormat::Depth16, PixelFormat::Grey, PixelFormat::Yuyv],
        );
        assert_eq!(info.best_color_format(), Some(PixelFormat::Yuyv));
        assert!(info.has_depth());
    }
}
