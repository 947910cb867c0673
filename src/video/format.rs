//! Pixel format definitions for the capture pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc;

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed format, the common webcam raw format
    Yuyv,
    /// MJPEG compressed format
    Mjpeg,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
    /// Grayscale format
    Grey,
    /// 16-bit depth in millimeters (V4L2 Z16)
    Depth16,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> fourcc::FourCC {
        match self {
            PixelFormat::Yuyv => fourcc::FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => fourcc::FourCC::new(b"MJPG"),
            PixelFormat::Rgb24 => fourcc::FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => fourcc::FourCC::new(b"BGR3"),
            PixelFormat::Grey => fourcc::FourCC::new(b"GREY"),
            PixelFormat::Depth16 => fourcc::FourCC::new(b"Z16 "),
        }
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: fourcc::FourCC) -> Option<Self> {
        let repr = fourcc.repr;
        match &repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"GREY" | b"Y800" => Some(PixelFormat::Grey),
            b"Z16 " => Some(PixelFormat::Depth16),
            _ => None,
        }
    }

    /// Check if format is compressed (variable frame size)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Get bytes per pixel for uncompressed formats
    /// Returns None for compressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Yuyv | PixelFormat::Depth16 => Some(2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Grey => Some(1),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Calculate expected frame size for a given resolution
    /// Returns None for compressed formats (variable size)
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| resolution.pixels() as usize * bpp)
    }

    /// Get priority for format selection (higher is better)
    /// Raw formats are preferred so we skip a decompress step
    pub fn priority(&self) -> u8 {
        match self {
            PixelFormat::Yuyv => 80,
            PixelFormat::Rgb24 => 70,
            PixelFormat::Bgr24 => 69,
            PixelFormat::Mjpeg => 50,
            PixelFormat::Grey => 10,
            PixelFormat::Depth16 => 5,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Grey => "GREY",
            PixelFormat::Depth16 => "Z16",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YUYV" => Ok(PixelFormat::Yuyv),
            "MJPEG" | "MJPG" => Ok(PixelFormat::Mjpeg),
            "RGB24" => Ok(PixelFormat::Rgb24),
            "BGR24" => Ok(PixelFormat::Bgr24),
            "GREY" | "GRAY" => Ok(PixelFormat::Grey),
            "Z16" | "DEPTH16" => Ok(PixelFormat::Depth16),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is valid
    pub fn is_valid(&self) -> bool {
        self.width >= 160 && self.width <= 7680 && self.height >= 120 && self.height <= 4320
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Common resolutions
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip() {
        for format in [
            PixelFormat::Yuyv,
            PixelFormat::Mjpeg,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Grey,
            PixelFormat::Depth16,
        ] {
            assert_eq!(PixelFormat::from_fourcc(format.to_fourcc()), Some(format));
        }
    }

    #[test]
    fn test_depth_fourcc_has_trailing_space() {
        assert_eq!(&PixelFormat::Depth16.to_fourcc().repr, b"Z16 ");
    }

    #[test]
    fn test_frame_sizes() {
        let vga = Resolution::VGA;
        assert_eq!(PixelFormat::Yuyv.frame_size(vga), Some(640 * 480 * 2));
        assert_eq!(PixelFormat::Rgb24.frame_size(vga), Some(640 * 480 * 3));
        assert_eq!(PixelFormat::Depth16.frame_size(vga), Some(640 * 480 * 2));
        assert_eq!(PixelFormat::Mjpeg.frame_size(vga), None);
    }

    #[test]
    fn test_raw_preferred_over_mjpeg() {
        assert!(PixelFormat::Yuyv.priority() > PixelFormat::Mjpeg.priority());
    }
}
