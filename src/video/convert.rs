//! Pixel format conversion utilities
//!
//! Every capture backend normalizes device-native buffers to packed RGB24
//! before frames leave the video module. Raw formats use software loops,
//! MJPEG goes through turbojpeg, and Z16 depth gets a fixed contrast
//! scale plus a jet-style color map for viewing.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Contrast scale applied to raw millimeter depth before color mapping.
/// Visual-only: 0.03 maps ~8.5 m to full scale, it does not round-trip
/// back to metric depth.
pub const DEPTH_VIS_SCALE: f32 = 0.03;

/// Calculate RGB24 buffer size for a given resolution
pub fn rgb24_buffer_size(resolution: Resolution) -> usize {
    resolution.pixels() as usize * 3
}

fn check_input_len(actual: usize, expected: usize) -> Result<()> {
    if actual < expected {
        return Err(AppError::VideoError(format!(
            "Input buffer too small: {} < {}",
            actual, expected
        )));
    }
    Ok(())
}

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601 limited range)
pub fn yuyv_to_rgb24(yuyv: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    // 4:2:2 chroma is shared by pixel pairs, rows must be even-width
    if width % 2 != 0 {
        return Err(AppError::VideoError(format!(
            "YUYV requires an even width, got {}",
            width
        )));
    }
    check_input_len(yuyv.len(), width * height * 2)?;

    let mut rgb = vec![0u8; width * height * 3];
    for row in 0..height {
        let src_row = row * width * 2;
        let dst_row = row * width * 3;
        for col in (0..width).step_by(2) {
            let src = src_row + col * 2;
            // YUYV: Y0, U0, Y1, V0 shared by the pixel pair
            let y0 = yuyv[src] as i32;
            let u = yuyv[src + 1] as i32;
            let y1 = yuyv[src + 2] as i32;
            let v = yuyv[src + 3] as i32;

            let dst = dst_row + col * 3;
            write_yuv_pixel(&mut rgb[dst..dst + 3], y0, u, v);
            write_yuv_pixel(&mut rgb[dst + 3..dst + 6], y1, u, v);
        }
    }
    Ok(rgb)
}

fn write_yuv_pixel(out: &mut [u8], y: i32, u: i32, v: i32) {
    let c = 298 * (y - 16);
    let d = u - 128;
    let e = v - 128;
    out[0] = clamp_u8((c + 409 * e + 128) >> 8);
    out[1] = clamp_u8((c - 100 * d - 208 * e + 128) >> 8);
    out[2] = clamp_u8((c + 516 * d + 128) >> 8);
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert BGR24 to RGB24 (channel swap)
pub fn bgr24_to_rgb24(bgr: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
    let expected = rgb24_buffer_size(resolution);
    check_input_len(bgr.len(), expected)?;

    let mut rgb = vec![0u8; expected];
    for (src, dst) in bgr[..expected].chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(rgb)
}

/// Convert 8-bit greyscale to RGB24 (channel replication)
pub fn grey_to_rgb24(grey: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
    let pixels = resolution.pixels() as usize;
    check_input_len(grey.len(), pixels)?;

    let mut rgb = vec![0u8; pixels * 3];
    for (src, dst) in grey[..pixels].iter().zip(rgb.chunks_exact_mut(3)) {
        dst[0] = *src;
        dst[1] = *src;
        dst[2] = *src;
    }
    Ok(rgb)
}

/// Decode an MJPEG frame to RGB24 via turbojpeg
pub fn mjpeg_to_rgb24(jpeg: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
    let image = turbojpeg::decompress(jpeg, turbojpeg::PixelFormat::RGB)
        .map_err(|e| AppError::VideoError(format!("MJPEG decode failed: {}", e)))?;

    if image.width as u32 != resolution.width || image.height as u32 != resolution.height {
        return Err(AppError::VideoError(format!(
            "MJPEG frame is {}x{}, expected {}",
            image.width, image.height, resolution
        )));
    }

    let row_bytes = image.width * 3;
    if image.pitch == row_bytes {
        return Ok(image.pixels);
    }
    // Decoder used a padded pitch, repack rows tightly
    let mut rgb = vec![0u8; image.width * image.height * 3];
    for row in 0..image.height {
        let src = row * image.pitch;
        let dst = row * row_bytes;
        rgb[dst..dst + row_bytes].copy_from_slice(&image.pixels[src..src + row_bytes]);
    }
    Ok(rgb)
}

/// Colorizes 16-bit depth frames for viewing.
///
/// Raw millimeter values are scaled by [`DEPTH_VIS_SCALE`], clamped to
/// 8 bits and mapped through a precomputed jet-style lookup table.
pub struct DepthVisualizer {
    resolution: Resolution,
    lut: [[u8; 3]; 256],
}

impl DepthVisualizer {
    pub fn new(resolution: Resolution) -> Self {
        let mut lut = [[0u8; 3]; 256];
        for (value, entry) in lut.iter_mut().enumerate() {
            *entry = jet_color(value as u8);
        }
        Self { resolution, lut }
    }

    /// Convert a Z16 depth buffer to a colorized RGB24 buffer
    pub fn convert(&self, depth: &[u8]) -> Result<Vec<u8>> {
        let pixels = self.resolution.pixels() as usize;
        check_input_len(depth.len(), pixels * 2)?;

        let mut rgb = vec![0u8; pixels * 3];
        match bytemuck::try_cast_slice::<u8, u16>(&depth[..pixels * 2]) {
            Ok(values) => self.map_values(values, &mut rgb),
            Err(_) => {
                // Source buffer was not 2-byte aligned, decode per element
                let values: Vec<u16> = depth[..pixels * 2]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                self.map_values(&values, &mut rgb);
            }
        }
        Ok(rgb)
    }

    fn map_values(&self, values: &[u16], rgb: &mut [u8]) {
        for (raw, dst) in values.iter().zip(rgb.chunks_exact_mut(3)) {
            let scaled = (*raw as f32 * DEPTH_VIS_SCALE).round().min(255.0) as u8;
            let color = self.lut[scaled as usize];
            dst[0] = color[0];
            dst[1] = color[1];
            dst[2] = color[2];
        }
    }
}

/// Jet color map entry for an 8-bit value: dark blue at 0, green mid
/// scale, dark red at 255.
fn jet_color(value: u8) -> [u8; 3] {
    let x = value as f32 / 255.0;
    let channel = |center: f32| {
        let v = 1.5 - (4.0 * x - center).abs();
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// One-shot dispatch from a capture format to RGB24
pub fn to_rgb24(format: PixelFormat, input: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb24_buffer_size(resolution);
            check_input_len(input.len(), expected)?;
            Ok(input[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb24(input, resolution),
        PixelFormat::Bgr24 => bgr24_to_rgb24(input, resolution),
        PixelFormat::Grey => grey_to_rgb24(input, resolution),
        PixelFormat::Mjpeg => mjpeg_to_rgb24(input, resolution),
        PixelFormat::Depth16 => Err(AppError::VideoError(
            "Z16 depth requires DepthVisualizer, not a color conversion".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_levels() {
        let resolution = Resolution::new(2, 1);
        // Both pixels Y=16 (black) with neutral chroma
        let black = yuyv_to_rgb24(&[16, 128, 16, 128], resolution).unwrap();
        assert_eq!(black, vec![0, 0, 0, 0, 0, 0]);
        // Both pixels Y=235 (white) with neutral chroma
        let white = yuyv_to_rgb24(&[235, 128, 235, 128], resolution).unwrap();
        assert_eq!(white, vec![255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_bgr_swap() {
        let resolution = Resolution::new(1, 1);
        let rgb = bgr24_to_rgb24(&[10, 20, 30], resolution).unwrap();
        assert_eq!(rgb, vec![30, 20, 10]);
    }

    #[test]
    fn test_grey_replication() {
        let resolution = Resolution::new(2, 1);
        let rgb = grey_to_rgb24(&[7, 200], resolution).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_short_input_rejected() {
        let resolution = Resolution::new(4, 4);
        assert!(yuyv_to_rgb24(&[0u8; 8], resolution).is_err());
        assert!(bgr24_to_rgb24(&[0u8; 8], resolution).is_err());
    }

    #[test]
    fn test_yuyv_odd_width_rejected() {
        // The pixel-pair loop would read past the last row otherwise
        let resolution = Resolution::new(3, 1);
        let err = yuyv_to_rgb24(&[0u8; 6], resolution).unwrap_err();
        assert!(err.to_string().contains("even width"), "{}", err);
    }

    #[test]
    fn test_depth_scale_and_clamp() {
        let vis = DepthVisualizer::new(Resolution::new(3, 1));
        // 0 mm, 4250 mm (~ scale 128), 20000 mm (clamps to 255)
        let mut depth = Vec::new();
        for mm in [0u16, 4250, 20000] {
            depth.extend_from_slice(&mm.to_le_bytes());
        }
        let rgb = vis.convert(&depth).unwrap();

        // Near depth maps to the blue end, far depth to the red end
        let near = &rgb[0..3];
        let far = &rgb[6..9];
        assert!(near[2] > near[0], "near should be blue: {:?}", near);
        assert!(far[0] > far[2], "far should be red: {:?}", far);
        // Mid scale is green dominated
        let mid = &rgb[3..6];
        assert!(mid[1] >= mid[0] && mid[1] >= mid[2], "mid: {:?}", mid);
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet_color(0), [0, 0, 128]);
        assert_eq!(jet_color(255), [128, 0, 0]);
    }

    #[test]
    fn test_mjpeg_round_trip() {
        let resolution = Resolution::new(16, 16);
        let rgb: Vec<u8> = (0..16 * 16).flat_map(|i| [i as u8, 0, 255 - i as u8]).collect();
        let image = turbojpeg::Image {
            pixels: rgb.as_slice(),
            width: 16,
            pitch: 16 * 3,
            height: 16,
            format: turbojpeg::PixelFormat::RGB,
        };
        let jpeg = turbojpeg::compress(image, 90, turbojpeg::Subsamp::Sub2x2).unwrap();
        let decoded = mjpeg_to_rgb24(&jpeg, resolution).unwrap();
        assert_eq!(decoded.len(), 16 * 16 * 3);
    }

    #[test]
    fn test_dispatch_rejects_depth() {
        let resolution = Resolution::new(2, 2);
        assert!(to_rgb24(PixelFormat::Depth16, &[0u8; 8], resolution).is_err());
    }
}
