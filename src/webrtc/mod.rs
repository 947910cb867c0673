//! Session transport and negotiation
//!
//! Everything between the canonical video pipeline and the remote peer:
//! the signaling channel to the rendezvous service, the peer connection
//! wrapper, the pure negotiation state machine with its async driver,
//! the H.264 video tracks and the robot-control command channel.
//!
//! ```text
//! TrackProducer                           SignalingChannel (WebSocket)
//!       |                                        |
//!       v                                        v
//! OutboundVideoTrack (H.264)  <----  SessionNegotiator (step + driver)
//!       |                                        |
//!       v                                        v
//! SessionTransport (RTCPeerConnection, robot-control DataChannel)
//! ```

pub mod command;
pub mod config;
pub mod negotiator;
pub mod peer;
pub mod signaling;
pub mod track;

pub use command::{CommandChannel, COMMAND_CHANNEL_LABEL};
pub use config::WebRtcConfig;
pub use negotiator::{step, SessionEffect, SessionEvent, SessionNegotiator, SessionState};
pub use peer::{SessionTransport, TransportEvent};
pub use signaling::{
    CandidateInit, SessionSdp, SignalMessage, SignalingChannel, SignalingEvent,
};
pub use track::{
    spawn_remote_reader, CountingFrameSink, FrameSink, OutboundVideoTrack, ReceivedFrame,
    VideoTrackConfig,
};
