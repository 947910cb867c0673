//! Signaling wire types and rendezvous channel
//!
//! Messages travel as JSON text frames over one persistent WebSocket to
//! the rendezvous service. Envelopes are tagged by `type` and nest the
//! payload under a key of the same name, so an offer reads
//! `{"type":"offer","offer":{"sdp":...,"type":"offer"}}`.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// A session description as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSdp {
    pub sdp: String,
    /// "offer" or "answer"
    #[serde(rename = "type")]
    pub kind: String,
}

/// An ICE candidate as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Signaling envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { offer: SessionSdp },
    Answer { answer: SessionSdp },
    Candidate { candidate: CandidateInit },
}

impl SignalMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalMessage::Offer {
            offer: SessionSdp {
                sdp: sdp.into(),
                kind: "offer".to_string(),
            },
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalMessage::Answer {
            answer: SessionSdp {
                sdp: sdp.into(),
                kind: "answer".to_string(),
            },
        }
    }

    pub fn candidate(candidate: CandidateInit) -> Self {
        SignalMessage::Candidate { candidate }
    }

    /// Envelope tag for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        }
    }
}

/// What the reader task produces, in transport order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(SignalMessage),
    /// Payload arrived but did not decode; carried so the consumer can
    /// log and skip instead of silently dropping
    Malformed(String),
    /// The socket is gone; always the final event
    Closed,
}

struct ChannelInner {
    tx: mpsc::Sender<SignalMessage>,
    reader: JoinHandle<()>,
    _writer: JoinHandle<()>,
}

/// Persistent duplex connection to the rendezvous service.
///
/// `connect` splits the socket into a writer task fed by `send` and a
/// reader task producing [`SignalingEvent`]s. There is no reconnect;
/// once `Closed` is observed the channel is spent.
pub struct SignalingChannel {
    inner: Arc<Mutex<Option<ChannelInner>>>,
}

impl SignalingChannel {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<SignalingEvent>)> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| AppError::SignalingTransport(format!("connect failed: {}", e)))?;
        info!("Connected to signaling at {}", url);

        let (mut sink, mut stream) = ws.split();
        let (tx, mut out_rx) = mpsc::channel::<SignalMessage>(32);
        let (event_tx, event_rx) = mpsc::channel::<SignalingEvent>(64);

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable signal message: {}", e);
                        continue;
                    }
                };
                debug!("Signaling send: {}", message.kind());
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    warn!("Signaling send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(WsMessage::Text(text)) => {
                        let event = match serde_json::from_str::<SignalMessage>(text.as_str()) {
                            Ok(message) => SignalingEvent::Message(message),
                            Err(e) => SignalingEvent::Malformed(e.to_string()),
                        };
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Binary(_)) => {
                        let event =
                            SignalingEvent::Malformed("binary frame on text channel".to_string());
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                }
            }
            let _ = event_tx.send(SignalingEvent::Closed).await;
        });

        let channel = Self {
            inner: Arc::new(Mutex::new(Some(ChannelInner {
                tx,
                reader,
                _writer: writer,
            }))),
        };
        Ok((channel, event_rx))
    }

    /// Queue one message for the writer task.
    ///
    /// Fails fast with `SignalingTransport` once the channel is closed.
    pub async fn send(&self, message: SignalMessage) -> Result<()> {
        let tx = self
            .inner
            .lock()
            .as_ref()
            .map(|inner| inner.tx.clone())
            .ok_or_else(|| {
                AppError::SignalingTransport("signaling channel closed".to_string())
            })?;

        tx.send(message)
            .await
            .map_err(|_| AppError::SignalingTransport("signaling writer is gone".to_string()))
    }

    /// Tear the connection down, idempotent
    pub fn close(&self) {
        if let Some(inner) = self.inner.lock().take() {
            // Dropping the sender ends the writer task, which closes the
            // socket on its way out.
            drop(inner.tx);
            inner.reader.abort();
            info!("Signaling channel closed");
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_envelope_shape() {
        let message = SignalMessage::offer("v=0");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["offer"]["sdp"], "v=0");
        assert_eq!(value["offer"]["type"], "offer");
    }

    #[test]
    fn test_candidate_envelope_round_trip() {
        let wire = json!({
            "type": "candidate",
            "candidate": {
                "candidate": "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        })
        .to_string();

        let message: SignalMessage = serde_json::from_str(&wire).unwrap();
        match &message {
            SignalMessage::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("parsed as {:?}", other),
        }

        let back = serde_json::to_value(&message).unwrap();
        assert_eq!(back["candidate"]["sdpMid"], "0");
    }

    #[test]
    fn test_candidate_tolerates_missing_fields() {
        let wire = json!({
            "type": "candidate",
            "candidate": { "candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host" }
        })
        .to_string();
        let message: SignalMessage = serde_json::from_str(&wire).unwrap();
        match message {
            SignalMessage::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid, None);
                assert_eq!(candidate.sdp_mline_index, None);
            }
            other => panic!("parsed as {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(serde_json::from_str::<SignalMessage>(r#"{"type":"banana"}"#).is_err());
    }

    #[tokio::test]
    async fn test_channel_events_in_order() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // Receive the client's offer, answer with garbage, an echo
            // of the offer, then close.
            let inbound = ws.next().await.unwrap().unwrap();
            let text = inbound.into_text().unwrap();
            assert!(text.as_str().contains("\"offer\""));

            ws.send(WsMessage::Text("not json".into())).await.unwrap();
            ws.send(WsMessage::Text(text)).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let url = format!("ws://{}", addr);
        let (channel, mut events) = SignalingChannel::connect(&url).await.unwrap();
        channel.send(SignalMessage::offer("v=0")).await.unwrap();

        assert!(matches!(
            events.recv().await,
            Some(SignalingEvent::Malformed(_))
        ));
        match events.recv().await {
            Some(SignalingEvent::Message(SignalMessage::Offer { offer })) => {
                assert_eq!(offer.sdp, "v=0");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events.recv().await, Some(SignalingEvent::Closed));

        server.await.unwrap();

        channel.close();
        channel.close();
        assert!(matches!(
            channel.send(SignalMessage::offer("v=0")).await,
            Err(AppError::SignalingTransport(_))
        ));
    }
}
