//! H.264 encoding at the transport boundary
//!
//! Canonical RGB24 frames become Annex-B bitstreams right before they are
//! written to the outbound track. One encoder instance per track, fixed
//! settings for the stream lifetime.

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::YUVBuffer;

use crate::error::{AppError, Result};
use crate::video::format::Resolution;
use crate::video::frame::RgbFrame;

/// Default target bitrate in kbit/s
const DEFAULT_BITRATE_KBPS: u32 = 2000;

/// Settings for one outbound H.264 stream
#[derive(Debug, Clone)]
pub struct H264Config {
    pub resolution: Resolution,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

impl H264Config {
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self {
            resolution,
            fps,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }

    pub fn with_bitrate_kbps(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }
}

/// Software H.264 encoder over openh264
pub struct H264Encoder {
    config: H264Config,
    encoder: Encoder,
    frames: u64,
}

impl H264Encoder {
    pub fn new(config: H264Config) -> Result<Self> {
        let encoder_config = EncoderConfig::new(config.resolution.width, config.resolution.height)
            .max_frame_rate(config.fps.max(1) as f32)
            .set_bitrate_bps(config.bitrate_kbps * 1000)
            .enable_skip_frame(false);

        let encoder = Encoder::with_config(encoder_config)
            .map_err(|e| AppError::VideoError(format!("H.264 encoder init failed: {}", e)))?;

        Ok(Self {
            config,
            encoder,
            frames: 0,
        })
    }

    /// Encode one canonical frame to an Annex-B bitstream.
    ///
    /// The frame must match the configured resolution; streams do not
    /// change size mid-session.
    pub fn encode(&mut self, frame: &RgbFrame) -> Result<Bytes> {
        if frame.resolution != self.config.resolution {
            return Err(AppError::VideoError(format!(
                "Frame is {}, encoder expects {}",
                frame.resolution, self.config.resolution
            )));
        }

        let width = self.config.resolution.width as usize;
        let height = self.config.resolution.height as usize;
        let yuv = YUVBuffer::with_rgb(width, height, frame.data());

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| AppError::VideoError(format!("H.264 encode failed: {}", e)))?;

        self.frames += 1;
        Ok(Bytes::from(bitstream.to_vec()))
    }

    /// Frames encoded so far
    pub fn frames_encoded(&self) -> u64 {
        self.frames
    }

    pub fn config(&self) -> &H264Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame(resolution: Resolution) -> RgbFrame {
        let data = vec![0u8; resolution.pixels() as usize * 3];
        RgbFrame::from_vec(data, resolution, 0)
    }

    #[test]
    fn test_first_frame_is_annex_b() {
        let resolution = Resolution::new(64, 64);
        let mut encoder = H264Encoder::new(H264Config::new(resolution, 30)).unwrap();
        let out = encoder.encode(&black_frame(resolution)).unwrap();
        assert!(!out.is_empty());
        // Annex-B start code
        assert!(
            out.starts_with(&[0, 0, 0, 1]) || out.starts_with(&[0, 0, 1]),
            "unexpected stream head: {:?}",
            &out[..out.len().min(8)]
        );
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_resolution_mismatch_rejected() {
        let mut encoder =
            H264Encoder::new(H264Config::new(Resolution::new(64, 64), 30)).unwrap();
        let frame = black_frame(Resolution::new(32, 32));
        assert!(encoder.encode(&frame).is_err());
    }
}
