//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::Resolution;

/// A decoded frame in the canonical pipeline format (packed RGB24).
///
/// Capture backends convert whatever the device delivers into this
/// before handing it to the producer, so everything downstream of a
/// frame source deals with exactly one layout.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    /// Packed RGB24 data, width * height * 3 bytes
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Frame sequence number within the stream
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub capture_ts: Instant,
}

impl RgbFrame {
    /// Create a new frame
    pub fn new(data: Bytes, resolution: Resolution, sequence: u64) -> Self {
        debug_assert_eq!(data.len(), resolution.pixels() as usize * 3);
        Self {
            data,
            resolution,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(data: Vec<u8>, resolution: Resolution, sequence: u64) -> Self {
        Self::new(Bytes::from(data), resolution, sequence)
    }

    /// Get frame data as a byte slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get width
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Get height
    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Get age of this frame (time since capture)
    pub fn age(&self) -> std::time::Duration {
        self.capture_ts.elapsed()
    }
}
