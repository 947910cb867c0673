//! Role-level session assembly
//!
//! `RoleController` wires the pieces for one session end to end: the
//! signaling channel, the peer transport, the negotiator driver, and on
//! the robot side the capture producer and command pump. It also owns
//! the teardown sequence: producers first (releasing capture devices),
//! then signaling, then the transport. Teardown runs exactly once no
//! matter how the session ends, user interrupt and fatal error both
//! funnel into the same linear path.

use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Role, SessionConfig};
use crate::error::{AppError, Result};
use crate::video::{open_source, TrackProducer};
use crate::webrtc::{
    CommandChannel, CountingFrameSink, OutboundVideoTrack, SessionNegotiator, SessionState,
    SessionTransport, SignalingChannel, VideoTrackConfig, WebRtcConfig,
};

/// Builds and runs one session for the configured role
pub struct RoleController {
    role: Role,
    config: SessionConfig,
}

impl RoleController {
    pub fn new(role: Role, config: SessionConfig) -> Self {
        Self { role, config }
    }

    /// Run the session until it ends or `shutdown` fires.
    ///
    /// Returns Ok for a clean close, the causing error when the session
    /// failed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        match self.role {
            Role::Robot => self.run_robot(shutdown).await,
            Role::Operator => self.run_operator(shutdown).await,
        }
    }

    async fn run_robot(self, shutdown: CancellationToken) -> Result<()> {
        let config = &self.config;
        let spec = config.source_spec();
        info!(
            "Starting robot session: {} at {} @ {} fps",
            spec.label(),
            config.resolution,
            config.fps
        );

        // Open the camera before dialing out so a missing device fails
        // without touching the network.
        let source = open_source(&spec).await?;

        let (signaling, signaling_rx) = SignalingChannel::connect(&config.signaling_url).await?;
        let signaling = Arc::new(signaling);

        let webrtc_config = WebRtcConfig {
            stun_servers: config.stun_servers.clone(),
        };
        let (transport, transport_rx) = SessionTransport::new(&webrtc_config).await?;
        let transport = Arc::new(transport);

        // Register before negotiation so the operator's channel is
        // picked up whenever it is announced.
        let (_command, mut command_rx) = CommandChannel::accept(&transport.inner());

        let track = Arc::new(OutboundVideoTrack::new(VideoTrackConfig::for_stream(
            source.label(),
            config.fps,
        )));
        if let Err(e) = transport.add_outbound_video(&track).await {
            let _ = transport.close().await;
            return Err(e);
        }

        let session_cancel = shutdown.child_token();

        let pump_cancel = session_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    maybe = command_rx.recv() => match maybe {
                        Some(value) => info!("Command received: {}", value),
                        None => break,
                    },
                }
            }
        });

        let producer = TrackProducer::new(source, config.fps, track.clone());
        let mut producer_handle = tokio::spawn(producer.run(session_cancel.child_token()));

        let (negotiator, _state_rx) = SessionNegotiator::new(
            self.role,
            signaling.clone(),
            transport.clone(),
            signaling_rx,
            transport_rx,
        );
        let mut driver = tokio::spawn(negotiator.run(session_cancel.clone()));

        let mut driver_state = None;
        let mut producer_outcome = None;
        tokio::select! {
            _ = session_cancel.cancelled() => info!("Shutdown requested"),
            joined = &mut driver => driver_state = Some(join_state(joined)),
            joined = &mut producer_handle => producer_outcome = Some(join_producer(joined)),
        }

        // Stop what is still running, then collect it in teardown order.
        session_cancel.cancel();
        let producer_outcome = match producer_outcome {
            Some(outcome) => outcome,
            None => join_producer(producer_handle.await),
        };
        let driver_state = match driver_state {
            Some(state) => state,
            None => join_state(driver.await),
        };

        signaling.close();
        if let Err(e) = transport.close().await {
            warn!("Transport close: {}", e);
        }
        info!("Session ended in state {}", driver_state);

        let (label, frames) = producer_outcome;
        if let Err(e) = frames {
            debug!("[{}] producer outcome: {}", label, e);
            return Err(e);
        }
        if driver_state == SessionState::Failed {
            return Err(AppError::Transport("session failed".to_string()));
        }
        Ok(())
    }

    async fn run_operator(self, shutdown: CancellationToken) -> Result<()> {
        let config = &self.config;
        info!("Starting operator session");

        let (signaling, signaling_rx) = SignalingChannel::connect(&config.signaling_url).await?;
        let signaling = Arc::new(signaling);

        let webrtc_config = WebRtcConfig {
            stun_servers: config.stun_servers.clone(),
        };
        let (transport, transport_rx) = SessionTransport::new(&webrtc_config).await?;
        let transport = Arc::new(transport);

        // The command channel must exist before the offer is built so
        // its section rides in the SDP.
        let (_command, mut command_rx) = match CommandChannel::create(&transport.inner()).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        let frame_sink = Arc::new(CountingFrameSink::new());
        if let Err(e) = transport.expect_inbound_video(frame_sink).await {
            let _ = transport.close().await;
            return Err(e);
        }

        let session_cancel = shutdown.child_token();

        let pump_cancel = session_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    maybe = command_rx.recv() => match maybe {
                        Some(value) => debug!("Command channel message: {}", value),
                        None => break,
                    },
                }
            }
        });

        let (negotiator, _state_rx) = SessionNegotiator::new(
            self.role,
            signaling.clone(),
            transport.clone(),
            signaling_rx,
            transport_rx,
        );
        let mut driver = tokio::spawn(negotiator.run(session_cancel.clone()));

        let mut driver_state = None;
        tokio::select! {
            _ = session_cancel.cancelled() => info!("Shutdown requested"),
            joined = &mut driver => driver_state = Some(join_state(joined)),
        }

        session_cancel.cancel();
        let driver_state = match driver_state {
            Some(state) => state,
            None => join_state(driver.await),
        };

        signaling.close();
        if let Err(e) = transport.close().await {
            warn!("Transport close: {}", e);
        }
        info!("Session ended in state {}", driver_state);

        if driver_state == SessionState::Failed {
            return Err(AppError::Transport("session failed".to_string()));
        }
        Ok(())
    }
}

fn join_state(joined: std::result::Result<SessionState, JoinError>) -> SessionState {
    joined.unwrap_or_else(|e| {
        warn!("Negotiator task panicked: {}", e);
        SessionState::Failed
    })
}

fn join_producer(
    joined: std::result::Result<(String, Result<u64>), JoinError>,
) -> (String, Result<u64>) {
    joined.unwrap_or_else(|e| {
        (
            "video".to_string(),
            Err(AppError::Internal(format!("producer task panicked: {}", e))),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::config::CameraChoice;

    const WAIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_operator_shutdown_is_clean_even_when_signaled_twice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Rendezvous stand-in: accept one client, discard its traffic
        // until it hangs up.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let config =
            SessionConfig::default().with_signaling_url(format!("ws://{}/ws", addr));
        let controller = RoleController::new(Role::Operator, config);

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(controller.run(shutdown.clone()));

        // Let the offer go out, then interrupt twice in a row.
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        shutdown.cancel();

        let result = timeout(WAIT, run).await.unwrap().unwrap();
        assert!(result.is_ok());
        timeout(WAIT, server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_robot_fails_before_dialing_when_camera_is_missing() {
        // Device probing happens before the signaling connect, so this
        // never reaches the default URL.
        let config = SessionConfig::default()
            .with_camera(CameraChoice::Rgb)
            .with_camera_index(99);
        let controller = RoleController::new(Role::Robot, config);

        let result = controller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::DeviceUnavailable { .. })));
    }
}
