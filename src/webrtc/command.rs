//! Robot-control command channel
//!
//! A single data channel labeled `robot-control` carries operator
//! commands as JSON. The operator creates it before offering so the
//! channel is negotiated in the initial SDP; the robot picks it up when
//! the peer announces it. Sends fail fast with [`AppError::NotReady`]
//! until the channel reports open, nothing is queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{AppError, Result};

/// Data channel label used by both roles
pub const COMMAND_CHANNEL_LABEL: &str = "robot-control";

/// Inbound command buffer depth
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Handle to the robot-control channel for one session
pub struct CommandChannel {
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    ready: Arc<AtomicBool>,
}

impl CommandChannel {
    fn empty() -> Self {
        Self {
            channel: Arc::new(Mutex::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Operator side: create the channel up front so it rides in the offer
    pub async fn create(
        pc: &Arc<RTCPeerConnection>,
    ) -> Result<(Self, mpsc::Receiver<serde_json::Value>)> {
        let (inbound_tx, inbound_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let this = Self::empty();

        let dc = pc
            .create_data_channel(COMMAND_CHANNEL_LABEL, None)
            .await
            .map_err(|e| AppError::Transport(format!("data channel creation failed: {}", e)))?;

        attach_handlers(&dc, this.ready.clone(), inbound_tx);
        *this.channel.lock() = Some(dc);

        info!(
            "Command channel '{}' created, waiting for open",
            COMMAND_CHANNEL_LABEL
        );
        Ok((this, inbound_rx))
    }

    /// Robot side: adopt the channel when the peer announces it
    pub fn accept(pc: &Arc<RTCPeerConnection>) -> (Self, mpsc::Receiver<serde_json::Value>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let this = Self::empty();

        let slot = this.channel.clone();
        let ready = this.ready.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let inbound_tx = inbound_tx.clone();
            let slot = slot.clone();
            let ready = ready.clone();

            Box::pin(async move {
                if dc.label() != COMMAND_CHANNEL_LABEL {
                    info!("Ignoring unexpected data channel '{}'", dc.label());
                    return;
                }

                info!("Command channel '{}' announced by peer", dc.label());
                attach_handlers(&dc, ready, inbound_tx);
                *slot.lock() = Some(dc);
            })
        }));

        (this, inbound_rx)
    }

    /// Whether the channel is currently open for sending
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Send one command as JSON text.
    ///
    /// Fails with [`AppError::NotReady`] while the channel has not opened
    /// yet or has closed again.
    pub async fn send(&self, command: &serde_json::Value) -> Result<()> {
        if !self.is_ready() {
            return Err(AppError::NotReady);
        }

        let dc = self.channel.lock().clone();
        let dc = dc.ok_or(AppError::NotReady)?;

        let text = serde_json::to_string(command)?;
        dc.send_text(text)
            .await
            .map_err(|e| AppError::Transport(format!("command send failed: {}", e)))?;

        Ok(())
    }
}

fn attach_handlers(
    dc: &Arc<RTCDataChannel>,
    ready: Arc<AtomicBool>,
    inbound_tx: mpsc::Sender<serde_json::Value>,
) {
    let label = dc.label().to_string();

    let ready_open = ready.clone();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        ready_open.store(true, Ordering::SeqCst);
        info!("Command channel '{}' open", open_label);
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        ready.store(false, Ordering::SeqCst);
        info!("Command channel '{}' closed", label);
        Box::pin(async {})
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let inbound_tx = inbound_tx.clone();
        Box::pin(async move {
            match serde_json::from_slice::<serde_json::Value>(&msg.data) {
                Ok(value) => {
                    debug!("Command channel message: {} bytes", msg.data.len());
                    if inbound_tx.send(value).await.is_err() {
                        debug!("Command receiver dropped, discarding message");
                    }
                }
                Err(e) => warn!("Discarding malformed command: {}", e),
            }
        })
    }));
}
