//! Outbound and inbound video tracks
//!
//! The robot side wraps a sample-writing local track behind the producer's
//! MediaSink seam, encoding canonical frames to H.264 on the way in. The
//! operator side pumps a remote track's RTP payloads into a FrameSink,
//! delimiting frames on the RTP marker bit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};
use crate::video::clock::VIDEO_CLOCK_RATE;
use crate::video::encoder::{H264Config, H264Encoder};
use crate::video::producer::{MediaSample, MediaSink};

/// Video track configuration
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    /// Track ID
    pub track_id: String,
    /// Stream ID
    pub stream_id: String,
    /// Target frame rate, sets the per-sample duration
    pub fps: u32,
    /// Target bitrate
    pub bitrate_kbps: u32,
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            track_id: "video0".to_string(),
            stream_id: "teleop-stream".to_string(),
            fps: 30,
            bitrate_kbps: 2000,
        }
    }
}

impl VideoTrackConfig {
    /// Config for one producer stream, track id matching its label
    pub fn for_stream(label: &str, fps: u32) -> Self {
        Self {
            track_id: label.to_string(),
            fps,
            ..Default::default()
        }
    }
}

/// RTP codec capability for the fixed H.264 baseline stream
pub fn h264_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/H264".to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_string(),
        rtcp_feedback: vec![],
    }
}

/// Robot-side outbound track.
///
/// Implements [`MediaSink`]: each delivered sample is encoded and written
/// as one media sample with the track's nominal frame duration. The
/// encoder is created from the first frame's dimensions, which may differ
/// from the requested capture size if the driver adjusted it.
pub struct OutboundVideoTrack {
    config: VideoTrackConfig,
    track: Arc<TrackLocalStaticSample>,
    encoder: Mutex<Option<H264Encoder>>,
}

impl OutboundVideoTrack {
    pub fn new(config: VideoTrackConfig) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            h264_codec_capability(),
            config.track_id.clone(),
            config.stream_id.clone(),
        ));

        Self {
            config,
            track,
            encoder: Mutex::new(None),
        }
    }

    /// The local track to register on the peer connection
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn config(&self) -> &VideoTrackConfig {
        &self.config
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.config.fps.max(1) as u64)
    }
}

#[async_trait]
impl MediaSink for OutboundVideoTrack {
    async fn deliver(&self, sample: MediaSample) -> Result<()> {
        let encoded = {
            let mut guard = self.encoder.lock();
            if guard.is_none() {
                let config = H264Config::new(sample.image.resolution, self.config.fps)
                    .with_bitrate_kbps(self.config.bitrate_kbps);
                info!(
                    "[{}] encoder ready: {} @ {} fps",
                    self.config.track_id, sample.image.resolution, self.config.fps
                );
                *guard = Some(H264Encoder::new(config)?);
            }
            match guard.as_mut() {
                Some(encoder) => encoder.encode(&sample.image)?,
                None => {
                    return Err(AppError::Internal("encoder not initialized".to_string()))
                }
            }
        };

        self.track
            .write_sample(&Sample {
                data: encoded,
                duration: self.frame_duration(),
                ..Default::default()
            })
            .await
            .map_err(|e| AppError::Transport(format!("sample write failed: {}", e)))
    }
}

/// One complete received frame, delimited by the RTP marker bit
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub track_id: String,
    /// 1-based count of complete frames on this track
    pub number: u64,
    /// Concatenated RTP payloads of the frame
    pub payload: Bytes,
}

/// Operator-side delivery seam for received frames.
///
/// Rendering is out of scope; the built-in sink only counts and logs.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn on_frame(&self, frame: ReceivedFrame);
}

/// Frames between received-progress logs
const RECEIVE_LOG_INTERVAL: u64 = 30;

/// Default sink: counts complete frames and logs progress
#[derive(Default)]
pub struct CountingFrameSink {
    frames: Mutex<u64>,
}

impl CountingFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        *self.frames.lock()
    }
}

#[async_trait]
impl FrameSink for CountingFrameSink {
    async fn on_frame(&self, frame: ReceivedFrame) {
        let mut count = self.frames.lock();
        *count = frame.number;
        if frame.number % RECEIVE_LOG_INTERVAL == 0 {
            info!("[{}] received {} frames", frame.track_id, frame.number);
        }
    }
}

/// Pump a remote track into a frame sink until the track ends
pub fn spawn_remote_reader(
    track: Arc<TrackRemote>,
    sink: Arc<dyn FrameSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let track_id = track.id();
        info!("Remote track {} started", track_id);

        let mut assembly: Vec<u8> = Vec::new();
        let mut frames = 0u64;

        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    assembly.extend_from_slice(&packet.payload);
                    if packet.header.marker {
                        frames += 1;
                        let payload = Bytes::from(std::mem::take(&mut assembly));
                        sink.on_frame(ReceivedFrame {
                            track_id: track_id.clone(),
                            number: frames,
                            payload,
                        })
                        .await;
                    }
                }
                Err(e) => {
                    debug!("Remote track {} ended after {} frames: {}", track_id, frames, e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clock::PacedTimestamp;
    use crate::video::format::Resolution;
    use crate::video::frame::RgbFrame;

    #[test]
    fn test_codec_capability() {
        let capability = h264_codec_capability();
        assert_eq!(capability.mime_type, "video/H264");
        assert_eq!(capability.clock_rate, 90_000);
        assert!(capability.sdp_fmtp_line.contains("packetization-mode=1"));
    }

    #[test]
    fn test_stream_config_uses_label() {
        let config = VideoTrackConfig::for_stream("rgb42", 15);
        assert_eq!(config.track_id, "rgb42");
        assert_eq!(config.fps, 15);
        assert_eq!(config.stream_id, "teleop-stream");
    }

    #[tokio::test]
    async fn test_deliver_encodes_without_bound_transport() {
        // Unbound tracks accept samples, so the encode path is testable
        // without a peer connection.
        let sink = OutboundVideoTrack::new(VideoTrackConfig::for_stream("test", 30));
        let resolution = Resolution::new(64, 64);
        let sample = MediaSample {
            image: RgbFrame::from_vec(vec![0u8; 64 * 64 * 3], resolution, 0),
            pts: PacedTimestamp {
                sequence: 0,
                ticks: 0,
                clock_rate: VIDEO_CLOCK_RATE,
            },
        };

        sink.deliver(sample).await.unwrap();
        assert!(sink.encoder.lock().is_some());
    }

    #[tokio::test]
    async fn test_counting_sink_tracks_frame_number() {
        let sink = CountingFrameSink::new();
        for number in 1..=3 {
            sink.on_frame(ReceivedFrame {
                track_id: "video0".to_string(),
                number,
                payload: Bytes::from_static(b"x"),
            })
            .await;
        }
        assert_eq!(sink.frames(), 3);
    }
}
