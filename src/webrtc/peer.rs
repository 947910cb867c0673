//! WebRTC peer connection wrapper
//!
//! Owns the single peer connection for a session and surfaces the few
//! things the negotiator cares about as [`TransportEvent`]s: locally
//! gathered ICE candidates (trickled as they appear) and the
//! connected/failed transitions of the connection state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::signaling::{CandidateInit, SessionSdp};
use super::track::{spawn_remote_reader, FrameSink, OutboundVideoTrack};
use crate::error::{AppError, Result};

/// Transport-side events fed into the negotiator
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A locally gathered ICE candidate, ready to trickle to the peer
    LocalCandidate(CandidateInit),
    /// The peer connection reached the connected state
    Connected,
    /// The peer connection failed
    Failed,
}

/// Peer connection wrapper for one session
pub struct SessionTransport {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl SessionTransport {
    /// Create a peer connection with default codecs and interceptors
    pub async fn new(config: &WebRtcConfig) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Transport(format!("codec registration failed: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::Transport(format!("interceptor registration failed: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        // Host candidates on loopback let two peers on one machine pair
        // without STUN.
        setting_engine.set_include_loopback_candidate(true);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let pc = api
            .new_peer_connection(config.rtc_configuration())
            .await
            .map_err(|e| AppError::Transport(format!("peer connection setup failed: {}", e)))?;
        let pc = Arc::new(pc);

        let (event_tx, event_rx) = mpsc::channel(32);
        register_event_handlers(&pc, event_tx);

        Ok((
            Self {
                pc,
                closed: AtomicBool::new(false),
            },
            event_rx,
        ))
    }

    /// The underlying peer connection, for channel setup
    pub fn inner(&self) -> Arc<RTCPeerConnection> {
        self.pc.clone()
    }

    /// Register an outbound video track on the connection
    pub async fn add_outbound_video(&self, track: &OutboundVideoTrack) -> Result<()> {
        self.pc
            .add_track(track.sample_track())
            .await
            .map_err(|e| AppError::Transport(format!("video track rejected: {}", e)))?;

        info!("Video track {} added", track.config().track_id);
        Ok(())
    }

    /// Declare a receive-only video section and pump any arriving track
    /// into the given sink
    pub async fn expect_inbound_video(&self, sink: Arc<dyn FrameSink>) -> Result<()> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::Transport(format!("recvonly transceiver rejected: {}", e)))?;

        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            spawn_remote_reader(track, sink.clone());
            Box::pin(async {})
        }));

        Ok(())
    }

    /// Create an offer and install it as the local description
    pub async fn create_offer(&self) -> Result<SessionSdp> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Transport(format!("offer creation failed: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| AppError::Transport(format!("local description rejected: {}", e)))?;

        Ok(SessionSdp {
            sdp: offer.sdp,
            kind: "offer".to_string(),
        })
    }

    /// Apply a remote offer and produce the local answer
    pub async fn accept_offer(&self, offer: &SessionSdp) -> Result<SessionSdp> {
        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| AppError::Transport(format!("invalid remote offer: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| AppError::Transport(format!("remote offer rejected: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Transport(format!("answer creation failed: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| AppError::Transport(format!("local description rejected: {}", e)))?;

        Ok(SessionSdp {
            sdp: answer.sdp,
            kind: "answer".to_string(),
        })
    }

    /// Apply the remote answer to our outstanding offer.
    ///
    /// The rendezvous endpoint can replay an answer; applying one again
    /// once the connection is stable would error, so repeats are dropped.
    pub async fn accept_answer(&self, answer: &SessionSdp) -> Result<()> {
        if self.pc.signaling_state() != RTCSignalingState::HaveLocalOffer {
            warn!(
                "Ignoring answer in signaling state {}",
                self.pc.signaling_state()
            );
            return Ok(());
        }

        let remote = RTCSessionDescription::answer(answer.sdp.clone())
            .map_err(|e| AppError::Transport(format!("invalid remote answer: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| AppError::Transport(format!("remote answer rejected: {}", e)))
    }

    /// Add a trickled remote ICE candidate
    pub async fn add_remote_candidate(&self, candidate: &CandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::Transport(format!("ICE candidate rejected: {}", e)))
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pc
            .close()
            .await
            .map_err(|e| AppError::Transport(format!("close failed: {}", e)))?;

        info!("Peer connection closed");
        Ok(())
    }
}

fn register_event_handlers(pc: &Arc<RTCPeerConnection>, event_tx: mpsc::Sender<TransportEvent>) {
    let events = event_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            info!("Transport state: {}", state);
            let event = match state {
                RTCPeerConnectionState::Connected => Some(TransportEvent::Connected),
                RTCPeerConnectionState::Failed => Some(TransportEvent::Failed),
                RTCPeerConnectionState::Disconnected => {
                    // May recover on its own, only failure is terminal
                    warn!("Transport disconnected, waiting for recovery or failure");
                    None
                }
                _ => None,
            };
            if let Some(event) = event {
                let _ = events.send(event).await;
            }
        })
    }));

    let events = event_tx;
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(c) => c,
                None => {
                    debug!("ICE gathering complete");
                    return;
                }
            };

            match candidate.to_json() {
                Ok(json) => {
                    debug!("Local ICE candidate: {}", json.candidate);
                    let _ = events
                        .send(TransportEvent::LocalCandidate(CandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        }))
                        .await;
                }
                Err(e) => warn!("Could not serialize ICE candidate: {}", e),
            }
        })
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::track::CountingFrameSink;

    fn local_config() -> WebRtcConfig {
        // No STUN so tests never touch the network
        WebRtcConfig {
            stun_servers: vec![],
        }
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let (operator, _operator_events) = SessionTransport::new(&local_config()).await.unwrap();
        let (robot, _robot_events) = SessionTransport::new(&local_config()).await.unwrap();

        operator
            .expect_inbound_video(Arc::new(CountingFrameSink::new()))
            .await
            .unwrap();

        let offer = operator.create_offer().await.unwrap();
        assert_eq!(offer.kind, "offer");
        assert!(offer.sdp.starts_with("v=0"));

        let answer = robot.accept_offer(&offer).await.unwrap();
        assert_eq!(answer.kind, "answer");

        operator.accept_answer(&answer).await.unwrap();

        operator.close().await.unwrap();
        robot.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_answer_is_dropped() {
        let (operator, _operator_events) = SessionTransport::new(&local_config()).await.unwrap();
        let (robot, _robot_events) = SessionTransport::new(&local_config()).await.unwrap();

        operator
            .expect_inbound_video(Arc::new(CountingFrameSink::new()))
            .await
            .unwrap();

        let offer = operator.create_offer().await.unwrap();
        let answer = robot.accept_offer(&offer).await.unwrap();

        operator.accept_answer(&answer).await.unwrap();
        // A replayed answer lands after the state left have-local-offer
        // and must not surface as a transport error.
        operator.accept_answer(&answer).await.unwrap();

        operator.close().await.unwrap();
        robot.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _events) = SessionTransport::new(&local_config()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
