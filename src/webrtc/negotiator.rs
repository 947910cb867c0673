//! Session negotiation state machine
//!
//! Negotiation is a pure transition function over an explicit state
//! enum, consumed by an async driver. The function decides, the driver
//! talks to the signaling channel and the peer connection. Keeping the
//! decision side effect free makes every ordering of offers, answers
//! and candidates directly testable.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::peer::{SessionTransport, TransportEvent};
use super::signaling::{
    CandidateInit, SessionSdp, SignalMessage, SignalingChannel, SignalingEvent,
};
use crate::config::Role;
use crate::error::{AppError, Result};

/// Session lifecycle states. Closed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SignalingConnected,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SignalingConnected => "signaling-connected",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Everything that can happen to a session, from either side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignalingUp,
    Signal(SignalMessage),
    SignalMalformed(String),
    SignalingClosed,
    LocalCandidate(CandidateInit),
    TransportConnected,
    TransportFailed,
    ShutdownRequested,
}

/// Actions the driver performs in response to a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Create a local offer and send it (operator)
    SendOffer,
    /// Apply the carried remote offer, then create and send the answer
    /// (robot)
    SendAnswer(SessionSdp),
    /// Apply the carried remote answer (operator)
    ApplyAnswer(SessionSdp),
    /// Feed a remote candidate to the transport
    ApplyCandidate(CandidateInit),
    /// Trickle a local candidate to the peer
    SendCandidate(CandidateInit),
}

/// Pure transition function.
///
/// Terminal states absorb every event. Role-mismatched and malformed
/// messages are dropped with a warning, never fatal.
pub fn step(
    role: Role,
    state: SessionState,
    event: SessionEvent,
) -> (SessionState, Vec<SessionEffect>) {
    if state.is_terminal() {
        return (state, vec![]);
    }

    match event {
        SessionEvent::SignalingUp => match (role, state) {
            (Role::Robot, SessionState::Idle) => (SessionState::SignalingConnected, vec![]),
            (Role::Operator, SessionState::Idle) => {
                (SessionState::Negotiating, vec![SessionEffect::SendOffer])
            }
            _ => {
                warn!("Ignoring repeated signaling-up in state {}", state);
                (state, vec![])
            }
        },
        SessionEvent::Signal(message) => on_signal(role, state, message),
        SessionEvent::SignalMalformed(reason) => {
            warn!(
                "{}",
                AppError::MalformedMessage(format!("skipping signaling payload: {}", reason))
            );
            (state, vec![])
        }
        SessionEvent::SignalingClosed => {
            warn!("Signaling closed in state {}", state);
            (SessionState::Failed, vec![])
        }
        SessionEvent::LocalCandidate(candidate) => {
            (state, vec![SessionEffect::SendCandidate(candidate)])
        }
        SessionEvent::TransportConnected => (SessionState::Connected, vec![]),
        SessionEvent::TransportFailed => (SessionState::Failed, vec![]),
        SessionEvent::ShutdownRequested => (SessionState::Closed, vec![]),
    }
}

fn on_signal(
    role: Role,
    state: SessionState,
    message: SignalMessage,
) -> (SessionState, Vec<SessionEffect>) {
    match message {
        // Candidates are valid in every non-terminal phase, whichever
        // side of the offer/answer they arrive on.
        SignalMessage::Candidate { candidate } => {
            (state, vec![SessionEffect::ApplyCandidate(candidate)])
        }
        SignalMessage::Offer { offer } => match role {
            Role::Robot => match state {
                SessionState::SignalingConnected | SessionState::Negotiating => {
                    (SessionState::Negotiating, vec![SessionEffect::SendAnswer(offer)])
                }
                // Renegotiation request on a live session, re-answer in
                // place.
                SessionState::Connected => {
                    info!("Re-answering renegotiation offer");
                    (state, vec![SessionEffect::SendAnswer(offer)])
                }
                _ => {
                    warn!("Ignoring offer in state {}", state);
                    (state, vec![])
                }
            },
            Role::Operator => {
                warn!(
                    "{}",
                    AppError::UnexpectedMessageForRole {
                        role: role.to_string(),
                        message: "offer".to_string(),
                    }
                );
                (state, vec![])
            }
        },
        SignalMessage::Answer { answer } => match role {
            Role::Operator => match state {
                SessionState::Negotiating => {
                    (state, vec![SessionEffect::ApplyAnswer(answer)])
                }
                _ => {
                    warn!("Ignoring answer in state {}", state);
                    (state, vec![])
                }
            },
            Role::Robot => {
                warn!(
                    "{}",
                    AppError::UnexpectedMessageForRole {
                        role: role.to_string(),
                        message: "answer".to_string(),
                    }
                );
                (state, vec![])
            }
        },
    }
}

/// Async driver: maps signaling and transport inputs to events, runs
/// [`step`], publishes the state, and executes the effects.
pub struct SessionNegotiator {
    role: Role,
    signaling: Arc<SignalingChannel>,
    transport: Arc<SessionTransport>,
    signaling_rx: mpsc::Receiver<SignalingEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
}

impl SessionNegotiator {
    pub fn new(
        role: Role,
        signaling: Arc<SignalingChannel>,
        transport: Arc<SessionTransport>,
        signaling_rx: mpsc::Receiver<SignalingEvent>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        (
            Self {
                role,
                signaling,
                transport,
                signaling_rx,
                transport_rx,
                state_tx,
                state: SessionState::Idle,
            },
            state_rx,
        )
    }

    /// Drive the session until it reaches a terminal state.
    ///
    /// The signaling channel is already connected when the driver is
    /// built, so the first event is always SignalingUp.
    pub async fn run(mut self, shutdown: CancellationToken) -> SessionState {
        self.dispatch(SessionEvent::SignalingUp).await;

        while !self.state.is_terminal() {
            let event = tokio::select! {
                _ = shutdown.cancelled() => SessionEvent::ShutdownRequested,
                maybe = self.signaling_rx.recv() => match maybe {
                    Some(SignalingEvent::Message(message)) => SessionEvent::Signal(message),
                    Some(SignalingEvent::Malformed(reason)) => {
                        SessionEvent::SignalMalformed(reason)
                    }
                    Some(SignalingEvent::Closed) | None => SessionEvent::SignalingClosed,
                },
                // The transport senders live inside the connection
                // callbacks, so a closed channel means the transport
                // itself is gone.
                maybe = self.transport_rx.recv() => match maybe {
                    Some(TransportEvent::LocalCandidate(candidate)) => {
                        SessionEvent::LocalCandidate(candidate)
                    }
                    Some(TransportEvent::Connected) => SessionEvent::TransportConnected,
                    Some(TransportEvent::Failed) | None => SessionEvent::TransportFailed,
                },
            };
            self.dispatch(event).await;
        }

        self.state
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let (next, effects) = step(self.role, self.state, event);
        self.transition(next);

        for effect in effects {
            // A bad candidate is survivable, a failed description
            // exchange is not.
            let fatal = matches!(
                effect,
                SessionEffect::SendOffer
                    | SessionEffect::SendAnswer(_)
                    | SessionEffect::ApplyAnswer(_)
            );

            if let Err(e) = self.execute(effect).await {
                if fatal {
                    warn!("Negotiation failed: {}", e);
                    self.transition(SessionState::Failed);
                    return;
                }
                warn!("Candidate exchange hiccup: {}", e);
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if next != self.state {
            info!("Session state: {} -> {}", self.state, next);
            self.state = next;
            let _ = self.state_tx.send(next);
        }
    }

    async fn execute(&self, effect: SessionEffect) -> Result<()> {
        match effect {
            SessionEffect::SendOffer => {
                let offer = self.transport.create_offer().await?;
                debug!("Sending offer");
                self.signaling.send(SignalMessage::Offer { offer }).await
            }
            SessionEffect::SendAnswer(offer) => {
                let answer = self.transport.accept_offer(&offer).await?;
                debug!("Sending answer");
                self.signaling.send(SignalMessage::Answer { answer }).await
            }
            SessionEffect::ApplyAnswer(answer) => self.transport.accept_answer(&answer).await,
            SessionEffect::ApplyCandidate(candidate) => {
                self.transport.add_remote_candidate(&candidate).await
            }
            SessionEffect::SendCandidate(candidate) => {
                self.signaling.send(SignalMessage::Candidate { candidate }).await
            }
        }
    }
}
